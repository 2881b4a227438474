//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortOpener, SerialConfig},
    },
    log::{debug, trace},
    serialport::{DataBits, FlowControl, Parity, StopBits},
    std::io::{Read, Write},
};

/// Native serial port implementation.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    baud_rate: u32,
}

impl NativePort {
    /// Open a serial port with the given configuration, framed 8N1.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!(
            "Opening {} @ {} baud (timeout {:?})",
            config.port_name, config.baud_rate, config.timeout
        );
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| Error::Connection(format!("cannot open {}: {e}", config.port_name)))?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
            baud_rate: config.baud_rate,
        })
    }

    fn closed_error() -> Error {
        Error::Serial(serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "Port is closed",
        ))
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        match self.port {
            Some(ref mut p) => Ok(p.bytes_to_read()? as usize),
            None => Err(Self::closed_error()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            trace!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed"))
            .and_then(std::io::Write::flush)
    }
}

/// Opens [`NativePort`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePortOpener;

impl PortOpener for NativePortOpener {
    type Port = NativePort;

    fn open(&self, config: &SerialConfig) -> Result<NativePort> {
        NativePort::open(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    #[test]
    fn test_serial_config_defaults() {
        let config = SerialConfig::new("/dev/ttyUSB0", 57600);
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(SerialConfig::default().baud_rate, 115200);
    }

    #[test]
    fn test_open_missing_port_is_connection_error() {
        let config = SerialConfig::new("/dev/ispflash-does-not-exist", 115200);
        let err = NativePortOpener
            .open(&config)
            .err()
            .expect("opening a missing device must fail");
        assert_eq!(err.kind(), ErrorKind::Connection);
    }
}
