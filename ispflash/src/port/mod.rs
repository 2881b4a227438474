//! Port abstraction for serial communication.
//!
//! The protocol layer never talks to the `serialport` crate directly. It goes
//! through the [`Port`] trait, and ports are created by a [`PortOpener`], so
//! the whole flashing stack can run against a scripted port in tests.
//!
//! ```text
//! +---------------------+
//! |  BootloaderSession  |
//! +----------+----------+
//!            |
//!            v
//! +----------+----------+
//! |   CommandChannel    |
//! +----------+----------+
//!            |
//!            v
//! +----------+----------+     +------------------+
//! |  Port / PortOpener  | --> | NativePort       |
//! +---------------------+     |   (serialport)   |
//!                             +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the bootloader link.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default read/write timeout of a single I/O call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Serial port configuration.
///
/// The link is always 8 data bits, no parity, one stop bit and no flow
/// control; only the port, baud rate and timeout vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Timeout applied to every individual read and write.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }
}

/// Unified port trait for serial communication.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Number of received bytes waiting to be read.
    fn bytes_to_read(&mut self) -> Result<usize>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Creates ports from a [`SerialConfig`].
///
/// Kept separate from [`Port`] so a flash run can open its own port on the
/// worker thread.
pub trait PortOpener: Send + Sync {
    /// The port type produced by this opener.
    type Port: Port + 'static;

    /// Open a port with the given configuration.
    fn open(&self, config: &SerialConfig) -> Result<Self::Port>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortOpener};
