//! Events emitted by a flash run.
//!
//! The worker thread never touches observer state. Everything an observer
//! needs (log lines, progress, the reset request and the final result) is sent
//! as a [`FlashEvent`] over an `mpsc` channel.

use log::Level;
use std::fmt;
use std::sync::mpsc::Sender;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ErrorKind;

/// `log` target of the lines mirrored by [`Reporter`].
pub const LOG_TARGET: &str = "ispflash::event";

/// Outcome of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkflowResult {
    /// Whether the workflow completed.
    pub success: bool,
    /// Whether the device accepted the checksum command. Always `false` for
    /// runs that do not program.
    pub checksum_ok: bool,
    /// Why the run failed.
    pub error: Option<ErrorKind>,
}

impl WorkflowResult {
    /// A successful run.
    pub fn succeeded(checksum_ok: bool) -> Self {
        Self {
            success: true,
            checksum_ok,
            error: None,
        }
    }

    /// A failed run.
    pub fn failed(error: Option<ErrorKind>) -> Self {
        Self {
            success: false,
            checksum_ok: false,
            error,
        }
    }
}

/// One timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Wall-clock time the line was produced.
    pub time: SystemTime,
    /// Severity.
    pub level: Level,
    /// Free text.
    pub text: String,
}

impl LogLine {
    /// A line stamped with the current time.
    pub fn now(level: Level, text: impl Into<String>) -> Self {
        Self::at(SystemTime::now(), level, text)
    }

    /// A line stamped with `time`.
    pub fn at(time: SystemTime, level: Level, text: impl Into<String>) -> Self {
        Self {
            time,
            level,
            text: text.into(),
        }
    }

    /// `HH:MM:SS` of the timestamp (UTC).
    pub fn clock(&self) -> String {
        let total_secs = self
            .time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let hours = (total_secs / 3600) % 24;
        let minutes = (total_secs / 60) % 60;
        let seconds = total_secs % 60;
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.clock(), self.text)
    }
}

/// Event sent from the worker to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashEvent {
    /// A log line.
    Log(LogLine),
    /// Progress in percent, non-decreasing within a run.
    Progress(u8),
    /// The device must be reset into its bootloader. The run waits for
    /// [`RunHandle::confirm_reset`](crate::flasher::RunHandle::confirm_reset).
    ResetRequired,
    /// The run is over. Always the last event of a run.
    Finished(WorkflowResult),
}

/// Sends events to the observer and mirrors log lines to the `log` facade.
///
/// A dropped receiver is not an error; the run carries on unobserved.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<Sender<FlashEvent>>,
}

impl Reporter {
    /// Reporter sending to `tx`.
    pub fn new(tx: Sender<FlashEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Reporter that only logs.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Send a raw event.
    pub fn send(&self, event: FlashEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Log at `level`.
    pub fn log(&self, level: Level, text: impl Into<String>) {
        let line = LogLine::now(level, text);
        log::log!(target: LOG_TARGET, level, "{}", line.text);
        self.send(FlashEvent::Log(line));
    }

    /// Log at info level.
    pub fn info(&self, text: impl Into<String>) {
        self.log(Level::Info, text);
    }

    /// Log at warn level.
    pub fn warn(&self, text: impl Into<String>) {
        self.log(Level::Warn, text);
    }

    /// Log at error level.
    pub fn error(&self, text: impl Into<String>) {
        self.log(Level::Error, text);
    }
}

/// Tracks run progress and only ever reports increases.
#[derive(Debug)]
pub struct ProgressTracker {
    reporter: Reporter,
    current: Option<u8>,
}

impl ProgressTracker {
    /// New tracker; nothing reported yet.
    pub fn new(reporter: Reporter) -> Self {
        Self {
            reporter,
            current: None,
        }
    }

    /// Report 0.
    pub fn start(&mut self) {
        self.current = Some(0);
        self.reporter.send(FlashEvent::Progress(0));
    }

    /// Report `percent` (clamped to 100) when it is above the last value.
    pub fn set(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.current.is_some_and(|current| percent <= current) {
            return;
        }
        self.current = Some(percent);
        self.reporter.send(FlashEvent::Progress(percent));
    }

    /// Report `floor(done / total * 100)`.
    #[allow(clippy::cast_possible_truncation)] // at most 100
    pub fn set_ratio(&mut self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let percent = (done.min(total) as u128 * 100 / total as u128) as u8;
        self.set(percent);
    }

    /// Report 100 unless already there.
    pub fn finish(&mut self) {
        self.set(100);
    }

    /// Last reported value.
    pub fn current(&self) -> Option<u8> {
        self.current
    }
}
