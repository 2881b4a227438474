//! Bootloader session state machine.
//!
//! A session lives for exactly one workflow run. It owns the command channel,
//! sends one command at a time, waits the fixed settle delay and classifies
//! whatever text came back. Only a rejected sync is fatal; every other
//! rejection is reported to the caller, which decides what to do with it.

use log::{debug, trace};
use std::fmt::{self, Write as _};
use std::thread;
use std::time::Duration;

use crate::channel::CommandChannel;
use crate::error::{Error, Result};
use crate::event::Reporter;
use crate::port::{PortOpener, SerialConfig};
use crate::protocol::isp::{Command, ProtocolTiming, SectorRange, is_accepted};

/// Maximum number of hex characters in the payload preview.
const PAYLOAD_PREVIEW_CHARS: usize = 200;

/// Where a session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// Sync sent, response pending.
    AwaitingSync,
    /// Device acknowledged the sync.
    Synced,
    /// Prepare sent.
    Preparing,
    /// Prepare answered.
    Prepared,
    /// Erase sent.
    Erasing,
    /// Erase answered.
    Erased,
    /// Write header and payload in flight.
    Writing,
    /// Last write done.
    Written,
    /// Checksum sent.
    Verifying,
    /// Checksum answered.
    Verified,
    /// Sync rejected. Terminal for this session.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Drives the ISP command set over a [`CommandChannel`].
pub struct BootloaderSession<O: PortOpener> {
    channel: CommandChannel<O>,
    timing: ProtocolTiming,
    state: SessionState,
    last_response: String,
    reporter: Reporter,
}

impl<O: PortOpener> BootloaderSession<O> {
    /// Create a session; the port is not opened yet.
    pub fn new(opener: O, timing: ProtocolTiming, reporter: Reporter) -> Self {
        Self {
            channel: CommandChannel::new(opener),
            timing,
            state: SessionState::Idle,
            last_response: String::new(),
            reporter,
        }
    }

    /// Open the serial port.
    pub fn open(&mut self, config: &SerialConfig) -> Result<()> {
        self.channel.open(config)?;
        self.reporter.info(format!(
            "Opened {} at {} baud",
            config.port_name, config.baud_rate
        ));
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the port is open.
    pub fn is_open(&self) -> bool {
        self.channel.is_open()
    }

    /// Refuse to talk to a device that rejected the sync.
    fn ensure_not_failed(&self) -> Result<()> {
        if self.state == SessionState::Failed {
            return Err(Error::SyncFailure(
                "session failed to synchronize earlier".into(),
            ));
        }
        Ok(())
    }

    /// Send one command line and classify the response.
    ///
    /// Returns whether the device accepted the command. The raw response is
    /// logged either way. I/O failures are returned as errors, and nothing is
    /// sent once the session is [`Failed`](SessionState::Failed).
    pub fn send_command(&mut self, command: Command) -> Result<bool> {
        self.ensure_not_failed()?;
        let line = command.to_string();
        debug!("Sending {line:?}");
        self.channel.write_line(&line)?;

        pause(self.timing.settle);

        let response = self.channel.read_available()?;
        let accepted = is_accepted(&response);
        self.reporter.info(format!(
            "{line} -> {:?} ({})",
            response.trim(),
            if accepted { "accepted" } else { "rejected" }
        ));
        self.last_response = response;
        Ok(accepted)
    }

    /// Unlock the bootloader with `U 23130`.
    ///
    /// A rejection leaves the session [`Failed`](SessionState::Failed).
    pub fn sync(&mut self) -> Result<()> {
        self.ensure_not_failed()?;
        self.state = SessionState::AwaitingSync;
        self.reporter.info("Synchronizing with bootloader");

        if self.send_command(Command::Sync)? {
            self.state = SessionState::Synced;
            self.reporter.info("Bootloader synchronized");
            Ok(())
        } else {
            self.state = SessionState::Failed;
            self.reporter.error("Bootloader rejected the sync");
            Err(Error::SyncFailure(std::mem::take(&mut self.last_response)))
        }
    }

    /// Prepare sectors `start..=end` for erase or write.
    pub fn prepare_sectors(&mut self, start: u32, end: u32) -> Result<bool> {
        self.ensure_not_failed()?;
        self.state = SessionState::Preparing;
        let accepted = self.send_command(Command::Prepare { start, end })?;
        self.state = SessionState::Prepared;
        Ok(accepted)
    }

    /// Erase sectors `start..=end`.
    pub fn erase_sectors(&mut self, start: u32, end: u32) -> Result<bool> {
        self.ensure_not_failed()?;
        self.state = SessionState::Erasing;
        let accepted = self.send_command(Command::Erase { start, end })?;
        self.state = SessionState::Erased;
        Ok(accepted)
    }

    /// Prepare then erase `range`.
    ///
    /// A rejected prepare is logged and the erase is still attempted. Returns
    /// whether both were accepted.
    pub fn prepare_and_erase(&mut self, range: SectorRange) -> Result<bool> {
        let prepared = self.prepare_sectors(range.start, range.end)?;
        if !prepared {
            self.reporter
                .warn(format!("Prepare of sectors {range} rejected, erasing anyway"));
        }
        let erased = self.erase_sectors(range.start, range.end)?;
        if !erased {
            self.reporter.warn(format!("Erase of sectors {range} rejected"));
        }
        Ok(prepared && erased)
    }

    /// Write `data` at `address`: a `W` header followed by the raw payload.
    ///
    /// Only the header response is checked. A rejected header is logged and
    /// the payload is sent regardless.
    pub fn write_block(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.ensure_not_failed()?;
        self.state = SessionState::Writing;
        let header = Command::Write {
            address,
            length: data.len(),
        };
        if !self.send_command(header)? {
            self.reporter.warn(format!(
                "Write header rejected at {address}, sending payload anyway"
            ));
        }
        pause(self.timing.write_header_pacing);

        self.reporter.info(format!(
            "Sending {} bytes: {}",
            data.len(),
            payload_preview(data)
        ));
        self.channel.write_bytes(data)?;
        pause(self.timing.write_payload_pacing);

        self.state = SessionState::Written;
        Ok(())
    }

    /// Send `C`.
    pub fn finalize(&mut self) -> Result<bool> {
        self.send_command(Command::Finalize)
    }

    /// Send `CHECKSUM` and classify the answer. No value is compared.
    pub fn verify_checksum(&mut self) -> Result<bool> {
        self.ensure_not_failed()?;
        self.state = SessionState::Verifying;
        let accepted = self.send_command(Command::Checksum)?;
        self.state = SessionState::Verified;
        Ok(accepted)
    }

    /// Close the port. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.channel.is_open() {
            self.channel.close();
            self.reporter.info("Port closed");
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        trace!("Waiting {duration:?}");
        thread::sleep(duration);
    }
}

/// Uppercase hex of the payload, cut to [`PAYLOAD_PREVIEW_CHARS`] with a
/// trailing `...` when longer.
fn payload_preview(data: &[u8]) -> String {
    let shown = &data[..data.len().min(PAYLOAD_PREVIEW_CHARS / 2)];
    let mut preview = String::with_capacity(PAYLOAD_PREVIEW_CHARS + 3);
    for byte in shown {
        let _ = write!(preview, "{byte:02X}");
    }
    if shown.len() < data.len() {
        preview.push_str("...");
    }
    preview
}
