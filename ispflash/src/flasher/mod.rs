//! Flash workflows.
//!
//! [`FlashOrchestrator`] admits at most one run at a time. A run executes on a
//! dedicated worker thread and reports back through [`FlashEvent`]s; the
//! caller gets a [`RunHandle`] immediately.
//!
//! ```text
//!   start() --busy?--> Err(Busy)
//!      |
//!      v
//!   worker: open -> [reset gate] -> sync -> erase -> (program) -> close
//!      |                                                             |
//!      +------ Log / Progress / ResetRequired ----> observer        |
//!      +------ Finished(WorkflowResult) <---------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ispflash::{FlashEvent, FlashOrchestrator, FlashRequest, SerialConfig, Workflow};
//!
//! let orchestrator = FlashOrchestrator::native();
//! let request = FlashRequest::new(
//!     SerialConfig::new("/dev/ttyUSB0", 115200),
//!     Workflow::EraseThenProgram { firmware: "firmware.hex".into() },
//! );
//! let run = orchestrator.start(request)?;
//! for event in run.events() {
//!     match event {
//!         FlashEvent::ResetRequired => run.confirm_reset(),
//!         FlashEvent::Log(line) => println!("{line}"),
//!         FlashEvent::Progress(p) => println!("{p}%"),
//!         FlashEvent::Finished(_) => break,
//!     }
//! }
//! let result = run.wait();
//! assert!(result.success);
//! # Ok::<(), ispflash::Error>(())
//! ```

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::event::{FlashEvent, ProgressTracker, Reporter, WorkflowResult};
use crate::image::MemoryImage;
use crate::port::{PortOpener, SerialConfig};
use crate::protocol::isp::{ProtocolTiming, SectorRange};
use crate::protocol::session::BootloaderSession;

/// Name of the worker thread.
const WORKER_NAME: &str = "ispflash-worker";

/// Progress reported once the prepare step of an erase-only run is done.
const ERASE_PREPARED_PERCENT: u8 = 50;

/// What a run does after syncing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workflow {
    /// Prepare and erase the sector range.
    EraseOnly,
    /// Erase, then write the HEX image and verify.
    EraseThenProgram {
        /// Intel HEX file to program.
        firmware: PathBuf,
    },
}

/// How the device gets into its bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Emit [`FlashEvent::ResetRequired`] and wait for
    /// [`RunHandle::confirm_reset`], then wait the reset settle delay.
    #[default]
    Manual,
    /// The device is already waiting in its bootloader.
    Skip,
}

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct FlashRequest {
    /// Serial link.
    pub serial: SerialConfig,
    /// What to do.
    pub workflow: Workflow,
    /// Reset handling.
    pub reset: ResetMode,
    /// Sectors to prepare and erase.
    pub sectors: SectorRange,
    /// Protocol delays.
    pub timing: ProtocolTiming,
}

impl FlashRequest {
    /// A request with default reset mode, sectors and timing.
    pub fn new(serial: SerialConfig, workflow: Workflow) -> Self {
        Self {
            serial,
            workflow,
            reset: ResetMode::default(),
            sectors: SectorRange::default(),
            timing: ProtocolTiming::default(),
        }
    }

    /// Set the reset mode.
    #[must_use]
    pub fn with_reset(mut self, reset: ResetMode) -> Self {
        self.reset = reset;
        self
    }

    /// Set the sector range.
    #[must_use]
    pub fn with_sectors(mut self, sectors: SectorRange) -> Self {
        self.sectors = sectors;
        self
    }

    /// Set the protocol timing.
    #[must_use]
    pub fn with_timing(mut self, timing: ProtocolTiming) -> Self {
        self.timing = timing;
        self
    }
}

/// Runs flash workflows one at a time.
pub struct FlashOrchestrator<O> {
    opener: O,
    busy: Arc<AtomicBool>,
}

#[cfg(feature = "native")]
impl FlashOrchestrator<crate::port::NativePortOpener> {
    /// Orchestrator for real serial ports.
    pub fn native() -> Self {
        Self::new(crate::port::NativePortOpener)
    }
}

impl<O> FlashOrchestrator<O>
where
    O: PortOpener + Clone + 'static,
{
    /// Create an orchestrator opening ports through `opener`.
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a run is active.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start a run on a worker thread.
    ///
    /// Fails with [`Error::Busy`] when a run is already active; nothing is
    /// opened or spawned in that case.
    pub fn start(&self, request: FlashRequest) -> Result<RunHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Flash run rejected: another run is active");
            return Err(Error::Busy);
        }
        let busy = BusyFlag(Arc::clone(&self.busy));

        let (event_tx, event_rx) = mpsc::channel();
        let (reset_tx, reset_rx) = mpsc::channel();
        let opener = self.opener.clone();

        debug!("Starting {:?} on {}", request.workflow, request.serial.port_name);
        let worker = thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || {
                let mut run = RunGuard::new(busy, Reporter::new(event_tx));
                let result = run.execute(opener, &request, &reset_rx);
                run.complete(result);
                result
            })?;

        Ok(RunHandle {
            events: event_rx,
            reset: reset_tx,
            worker,
        })
    }
}

/// Handle to an active run.
pub struct RunHandle {
    events: Receiver<FlashEvent>,
    reset: Sender<()>,
    worker: JoinHandle<WorkflowResult>,
}

impl RunHandle {
    /// Events of this run. [`FlashEvent::Finished`] is always last.
    pub fn events(&self) -> &Receiver<FlashEvent> {
        &self.events
    }

    /// Signal that the device has been reset into its bootloader.
    pub fn confirm_reset(&self) {
        let _ = self.reset.send(());
    }

    /// Wait for the run to end.
    ///
    /// A run still waiting for a reset confirmation proceeds without one.
    pub fn wait(self) -> WorkflowResult {
        let Self { worker, reset, .. } = self;
        drop(reset);
        worker.join().unwrap_or_else(|_| {
            warn!("Flash worker panicked");
            WorkflowResult::failed(None)
        })
    }
}

/// Clears the busy flag when dropped.
struct BusyFlag(Arc<AtomicBool>);

impl Drop for BusyFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-run bookkeeping. Dropping it without [`RunGuard::complete`] (a worker
/// panic) still reports progress 100, frees the orchestrator and sends
/// `Finished`.
struct RunGuard {
    busy: Option<BusyFlag>,
    reporter: Reporter,
    progress: ProgressTracker,
    finished: bool,
}

impl RunGuard {
    fn new(busy: BusyFlag, reporter: Reporter) -> Self {
        Self {
            busy: Some(busy),
            progress: ProgressTracker::new(reporter.clone()),
            reporter,
            finished: false,
        }
    }

    fn execute<O: PortOpener>(
        &mut self,
        opener: O,
        request: &FlashRequest,
        reset_rx: &Receiver<()>,
    ) -> WorkflowResult {
        self.progress.start();

        let mut session = BootloaderSession::new(opener, request.timing, self.reporter.clone());
        let outcome = self.drive(&mut session, request, reset_rx);
        session.close();

        match outcome {
            Ok(result) => result,
            Err(e) => {
                self.reporter.error(format!("Operation failed: {e}"));
                WorkflowResult::failed(Some(e.kind()))
            },
        }
    }

    fn drive<O: PortOpener>(
        &mut self,
        session: &mut BootloaderSession<O>,
        request: &FlashRequest,
        reset_rx: &Receiver<()>,
    ) -> Result<WorkflowResult> {
        session.open(&request.serial)?;
        self.wait_for_reset(request, reset_rx);
        session.sync()?;

        match &request.workflow {
            Workflow::EraseOnly => self.erase_only(session, request.sectors),
            Workflow::EraseThenProgram { firmware } => {
                self.erase_then_program(session, request.sectors, firmware)
            },
        }
    }

    fn wait_for_reset(&self, request: &FlashRequest, reset_rx: &Receiver<()>) {
        if request.reset == ResetMode::Skip {
            return;
        }
        self.reporter.info("Waiting for device reset");
        self.reporter.send(FlashEvent::ResetRequired);
        if reset_rx.recv().is_err() {
            self.reporter
                .warn("Reset confirmation withdrawn, continuing without it");
        }
        if !request.timing.reset_settle.is_zero() {
            thread::sleep(request.timing.reset_settle);
        }
    }

    fn erase_only<O: PortOpener>(
        &mut self,
        session: &mut BootloaderSession<O>,
        sectors: SectorRange,
    ) -> Result<WorkflowResult> {
        self.reporter.info(format!("Erasing sectors {sectors}"));
        let prepared = session.prepare_sectors(sectors.start, sectors.end)?;
        self.progress.set(ERASE_PREPARED_PERCENT);
        let erased = session.erase_sectors(sectors.start, sectors.end)?;

        if prepared && erased {
            self.reporter.info("Erase complete");
            Ok(WorkflowResult::succeeded(false))
        } else {
            Err(Error::CommandRejected(format!(
                "erase of sectors {sectors} (prepare {}, erase {})",
                verdict(prepared),
                verdict(erased)
            )))
        }
    }

    fn erase_then_program<O: PortOpener>(
        &mut self,
        session: &mut BootloaderSession<O>,
        sectors: SectorRange,
        firmware: &Path,
    ) -> Result<WorkflowResult> {
        if !session.prepare_and_erase(sectors)? {
            self.reporter
                .warn("Erase step not acknowledged, programming anyway");
        }

        let image = MemoryImage::from_file(firmware)?;
        self.reporter.info(format!(
            "Loaded {} ({} bytes, {} data records)",
            firmware.display(),
            image.len(),
            image.data_record_count()
        ));

        let segments = image.segments();
        let total: usize = segments.iter().map(|s| s.data.len()).sum();
        let mut written = 0;
        for segment in &segments {
            if segment.data.is_empty() {
                self.reporter
                    .warn(format!("Skipping empty segment at {}", segment.address));
                continue;
            }
            self.reporter.info(format!(
                "Writing {} bytes at {}",
                segment.data.len(),
                segment.address
            ));
            session.write_block(segment.address, segment.data)?;
            written += segment.data.len();
            self.progress.set_ratio(written, total);
        }

        if !session.finalize()? {
            self.reporter.warn("Finalize not acknowledged");
        }
        let checksum_ok = session.verify_checksum()?;
        if checksum_ok {
            self.reporter.info("Checksum verified");
        } else {
            self.reporter.warn("Checksum not acknowledged");
        }

        self.reporter.info("Programming complete");
        Ok(WorkflowResult::succeeded(checksum_ok))
    }

    fn complete(&mut self, result: WorkflowResult) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.progress.finish();
        self.busy.take();

        match result.error {
            None => self.reporter.info("Done"),
            Some(kind) => self.reporter.error(format!("Run failed: {kind}")),
        }
        self.reporter.send(FlashEvent::Finished(result));
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.complete(WorkflowResult::failed(None));
        }
    }
}

fn verdict(accepted: bool) -> &'static str {
    if accepted { "accepted" } else { "rejected" }
}
