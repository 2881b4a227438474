//! Error types for ispflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for ispflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for ispflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial read/write, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial connection could not be established or is not open.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed line in an Intel HEX file.
    #[error("Invalid HEX record at line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// Firmware file does not exist.
    #[error("Firmware file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The bootloader did not acknowledge the sync command.
    #[error("Bootloader not synchronized (response: {0:?})")]
    SyncFailure(String),

    /// The bootloader rejected a command.
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Another flash run currently owns the serial port.
    #[error("A flash operation is already in progress")]
    Busy,
}

/// Coarse classification of an [`Error`], carried by workflow results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Port open/close failure or an I/O timeout.
    Connection,
    /// Malformed HEX line.
    Parse,
    /// Missing firmware file.
    NotFound,
    /// Sync rejected by the device.
    SyncFailure,
    /// Advisory command rejection.
    CommandRejected,
    /// Run already active.
    Busy,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Connection(_) => ErrorKind::Connection,
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorKind::Connection,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SyncFailure(_) => ErrorKind::SyncFailure,
            Self::CommandRejected(_) => ErrorKind::CommandRejected,
            Self::Busy => ErrorKind::Busy,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connection => "connection error",
            Self::Parse => "parse error",
            Self::NotFound => "not found",
            Self::SyncFailure => "sync failure",
            Self::CommandRejected => "command rejected",
            Self::Busy => "busy",
        };
        f.write_str(name)
    }
}
