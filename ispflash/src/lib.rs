//! # ispflash
//!
//! A library for flashing microcontrollers through their serial ISP
//! bootloader.
//!
//! This crate provides the core functionality for programming a device over a
//! line-oriented ASCII bootloader protocol, including:
//!
//! - Intel HEX decoding into a flat memory image
//! - A serial command channel (write lines, write raw bytes, drain responses)
//! - The bootloader session: sync, prepare, erase, write, finalize, checksum
//! - Erase-only and erase-then-program workflows on a worker thread, with
//!   progress and log events
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use ispflash::{FlashEvent, FlashOrchestrator, FlashRequest, SerialConfig, Workflow};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let orchestrator = FlashOrchestrator::native();
//!     let run = orchestrator.start(FlashRequest::new(
//!         SerialConfig::new("/dev/ttyUSB0", 115200),
//!         Workflow::EraseOnly,
//!     ))?;
//!
//!     for event in run.events() {
//!         match event {
//!             FlashEvent::ResetRequired => run.confirm_reset(),
//!             FlashEvent::Log(line) => println!("{line}"),
//!             FlashEvent::Progress(_) => {},
//!             FlashEvent::Finished(result) => {
//!                 println!("success: {}", result.success);
//!                 break;
//!             },
//!         }
//!     }
//!     run.wait();
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod event;
pub mod flasher;
pub mod image;
pub mod port;
pub mod protocol;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortOpener};
pub use {
    channel::{CommandChannel, drain_utf8_lossy},
    error::{Error, ErrorKind, Result},
    event::{FlashEvent, LogLine, ProgressTracker, Reporter, WorkflowResult},
    flasher::{FlashOrchestrator, FlashRequest, ResetMode, RunHandle, Workflow},
    image::{HexRecord, MemoryImage, Segment, decode, decode_str},
    port::{Port, PortOpener, SerialConfig},
    protocol::{
        BootloaderSession, Command, ProtocolTiming, SectorRange, SessionState, is_accepted,
    },
};
