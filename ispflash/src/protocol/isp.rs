//! ISP bootloader wire format.
//!
//! Commands are ASCII lines: a verb followed by space-separated decimal
//! arguments, terminated by `\n`.
//!
//! ```text
//! U 23130              unlock / sync
//! P <start> <end>      prepare sectors for erase/write
//! E <start> <end>      erase sectors
//! W <address> <len>    write; followed by exactly <len> raw bytes
//! C                    finalize
//! CHECKSUM             verify
//! ```
//!
//! Responses are free text. They are never parsed, only classified with
//! [`is_accepted`].

use std::fmt;
use std::time::Duration;

/// Unlock code sent with the sync command.
pub const SYNC_MAGIC: u32 = 23130;

/// Substrings that mark a response as accepted.
pub const ACCEPT_MARKERS: [&str; 4] = ["OK", "Synchronized", "019", "LH"];

/// Prefix that marks a response as accepted (return code 0).
pub const ACCEPT_PREFIX: char = '0';

/// Delay between sending a command and reading its response.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Delay after a write header and again after its payload.
pub const WRITE_PACING: Duration = Duration::from_millis(100);

/// Delay between the device-reset signal and the sync command.
pub const RESET_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// First sector erased by default.
pub const DEFAULT_FIRST_SECTOR: u32 = 0;

/// Last sector erased by default.
pub const DEFAULT_LAST_SECTOR: u32 = 29;

/// Bootloader commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Handshake with the unlock code.
    Sync,
    /// Prepare a sector range.
    Prepare {
        /// First sector.
        start: u32,
        /// Last sector (inclusive).
        end: u32,
    },
    /// Erase a sector range.
    Erase {
        /// First sector.
        start: u32,
        /// Last sector (inclusive).
        end: u32,
    },
    /// Write header; the payload follows on the wire.
    Write {
        /// Target address.
        address: u32,
        /// Payload length in bytes.
        length: usize,
    },
    /// Finalize programming.
    Finalize,
    /// Ask the device to verify what was written.
    Checksum,
}

impl Command {
    /// Command verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Sync => "U",
            Self::Prepare { .. } => "P",
            Self::Erase { .. } => "E",
            Self::Write { .. } => "W",
            Self::Finalize => "C",
            Self::Checksum => "CHECKSUM",
        }
    }
}

/// Renders the command line without its terminator.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = self.verb();
        match *self {
            Self::Sync => write!(f, "{verb} {SYNC_MAGIC}"),
            Self::Prepare { start, end } | Self::Erase { start, end } => {
                write!(f, "{verb} {start} {end}")
            },
            Self::Write { address, length } => write!(f, "{verb} {address} {length}"),
            Self::Finalize | Self::Checksum => f.write_str(verb),
        }
    }
}

/// Classify a raw response.
///
/// Accepted when non-empty and either starting with `'0'` or containing one
/// of [`ACCEPT_MARKERS`].
pub fn is_accepted(response: &str) -> bool {
    if response.is_empty() {
        return false;
    }
    response.starts_with(ACCEPT_PREFIX) || ACCEPT_MARKERS.iter().any(|m| response.contains(m))
}

/// Inclusive range of flash sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorRange {
    /// First sector.
    pub start: u32,
    /// Last sector (inclusive).
    pub end: u32,
}

impl SectorRange {
    /// Create a sector range.
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl Default for SectorRange {
    fn default() -> Self {
        Self::new(DEFAULT_FIRST_SECTOR, DEFAULT_LAST_SECTOR)
    }
}

impl fmt::Display for SectorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Fixed delays of the protocol.
///
/// The defaults are the delays the device needs; they are waited out in full,
/// responses are never polled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTiming {
    /// Wait between a command line and reading its response.
    pub settle: Duration,
    /// Wait after a write header before sending the payload.
    pub write_header_pacing: Duration,
    /// Wait after a write payload.
    pub write_payload_pacing: Duration,
    /// Wait after the reset signal before syncing.
    pub reset_settle: Duration,
}

impl Default for ProtocolTiming {
    fn default() -> Self {
        Self {
            settle: SETTLE_DELAY,
            write_header_pacing: WRITE_PACING,
            write_payload_pacing: WRITE_PACING,
            reset_settle: RESET_SETTLE_DELAY,
        }
    }
}

impl ProtocolTiming {
    /// No delays at all. Only useful against simulated devices.
    pub fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            write_header_pacing: Duration::ZERO,
            write_payload_pacing: Duration::ZERO,
            reset_settle: Duration::ZERO,
        }
    }
}
