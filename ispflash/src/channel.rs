//! Line-oriented command channel over a serial port.
//!
//! The bootloader speaks newline-terminated ASCII commands and answers with
//! free text. [`CommandChannel`] owns the port for the duration of a run and
//! offers exactly the four primitives the protocol needs: write a line, write
//! raw bytes, drain whatever text has arrived, and close.

use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig};
use log::{debug, trace};
use std::io::Read;

/// Terminator appended to every command line.
pub const LINE_TERMINATOR: &str = "\n";

/// Serial command channel.
pub struct CommandChannel<O: PortOpener> {
    opener: O,
    port: Option<O::Port>,
    pending: Vec<u8>,
}

impl<O: PortOpener> CommandChannel<O> {
    /// Create a closed channel that opens ports through `opener`.
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            port: None,
            pending: Vec::new(),
        }
    }

    /// Open the port described by `config`.
    ///
    /// An already open port is closed first.
    pub fn open(&mut self, config: &SerialConfig) -> Result<()> {
        if self.port.is_some() {
            debug!("Channel already open, closing before reopening");
            self.close();
        }
        let port = self.opener.open(config)?;
        debug!("Opened {} @ {} baud", port.name(), port.baud_rate());
        self.port = Some(port);
        self.pending.clear();
        Ok(())
    }

    /// Whether a port is currently held.
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn port_mut(&mut self) -> Result<&mut O::Port> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::Connection("serial port is not open".into()))
    }

    /// Write `text` followed by the line terminator.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        trace!("> {text}");
        let mut line = String::with_capacity(text.len() + LINE_TERMINATOR.len());
        line.push_str(text);
        line.push_str(LINE_TERMINATOR);
        self.port_mut()?.write_all_bytes(line.as_bytes())
    }

    /// Write raw bytes without any framing.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        trace!("> {} raw bytes", data.len());
        self.port_mut()?.write_all_bytes(data)
    }

    /// Drain all text received since the previous read.
    ///
    /// Never blocks waiting for more data; returns an empty string when
    /// nothing has arrived.
    pub fn read_available(&mut self) -> Result<String> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| Error::Connection("serial port is not open".into()))?;

        loop {
            let waiting = port.bytes_to_read()?;
            if waiting == 0 {
                break;
            }
            let mut buf = vec![0u8; waiting];
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let text = drain_utf8_lossy(&mut self.pending);
        trace!("< {text:?}");
        Ok(text)
    }

    /// Release the port. Safe to call when already closed.
    pub fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                debug!("Error while closing {}: {e}", port.name());
            }
            debug!("Closed {}", port.name());
        }
        self.pending.clear();
    }
}

impl<O: PortOpener> Drop for CommandChannel<O> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drain buffered bytes into text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - An incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('�');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::port::mock::MockOpener;

    fn config() -> SerialConfig {
        SerialConfig::new("mock0", 115200)
    }

    #[test]
    fn test_write_line_appends_terminator() {
        let opener = MockOpener::new();
        let mut channel = CommandChannel::new(opener.clone());
        channel.open(&config()).unwrap();
        channel.write_line("P 0 29").unwrap();

        assert_eq!(opener.state().writes, vec![b"P 0 29\n".to_vec()]);
    }

    #[test]
    fn test_write_bytes_is_unframed() {
        let opener = MockOpener::new();
        let mut channel = CommandChannel::new(opener.clone());
        channel.open(&config()).unwrap();
        channel.write_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();

        assert_eq!(opener.state().writes, vec![vec![0xDE, 0xAD, 0xBE, 0xEF]]);
    }

    #[test]
    fn test_read_available_drains_and_may_be_empty() {
        let opener = MockOpener::new().reply("U", "Synchronized\r\n");
        let mut channel = CommandChannel::new(opener.clone());
        channel.open(&config()).unwrap();

        assert_eq!(channel.read_available().unwrap(), "");
        channel.write_line("U 23130").unwrap();
        assert_eq!(channel.read_available().unwrap(), "Synchronized\r\n");
        assert_eq!(channel.read_available().unwrap(), "");
    }

    #[test]
    fn test_reopen_closes_previous_handle() {
        let opener = MockOpener::new();
        let mut channel = CommandChannel::new(opener.clone());
        channel.open(&config()).unwrap();
        channel.open(&config()).unwrap();

        let state = opener.state();
        assert_eq!(state.opens, 2);
        assert_eq!(state.closes, 1);
        assert!(state.open);
    }

    #[test]
    fn test_close_is_idempotent() {
        let opener = MockOpener::new();
        let mut channel = CommandChannel::new(opener.clone());
        channel.close();
        channel.open(&config()).unwrap();
        channel.close();
        channel.close();

        assert!(!channel.is_open());
        assert_eq!(opener.state().closes, 1);
    }

    #[test]
    fn test_io_on_closed_channel_is_connection_error() {
        let mut channel = CommandChannel::new(MockOpener::new());
        let err = channel.write_line("C").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(
            channel.read_available().unwrap_err().kind(),
            ErrorKind::Connection
        );
    }

    #[test]
    fn test_write_timeout_surfaces_as_io_error() {
        let opener = MockOpener::new();
        let mut channel = CommandChannel::new(opener.clone());
        channel.open(&config()).unwrap();
        opener.state().fail_writes = true;

        let err = channel.write_line("E 0 29").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_open_failure_is_reported() {
        let mut channel = CommandChannel::new(MockOpener::new().failing_open());
        let err = channel.open(&config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!channel.is_open());
    }

    #[test]
    fn test_drain_utf8_lossy_replaces_invalid_bytes_and_continues() {
        let mut buf = vec![0xFF, b'O', 0xFE, b'K'];
        let out = drain_utf8_lossy(&mut buf);
        assert_eq!(out, "�O�K");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_utf8_lossy_keeps_incomplete_suffix() {
        let mut buf = vec![b'0', 0xC3];
        let out = drain_utf8_lossy(&mut buf);
        assert_eq!(out, "0");
        assert_eq!(buf, vec![0xC3]);

        buf.push(0xA9);
        assert_eq!(drain_utf8_lossy(&mut buf), "é");
        assert!(buf.is_empty());
    }
}
