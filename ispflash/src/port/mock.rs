//! Scripted in-memory port used by the unit tests.
//!
//! Every newline-terminated write is treated as a command line; if a reply is
//! scripted for its verb, the reply is queued for the next read. Raw payload
//! writes are recorded but never answered.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::port::{Port, PortOpener, SerialConfig};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Every write call, in order.
    pub writes: Vec<Vec<u8>>,
    /// Bytes waiting to be read.
    pub rx: VecDeque<u8>,
    /// Reply per command verb.
    pub replies: HashMap<String, String>,
    pub open: bool,
    pub opens: usize,
    pub closes: usize,
    pub fail_open: bool,
    pub fail_writes: bool,
}

impl MockState {
    /// Command lines written so far, without their terminator.
    pub fn lines(&self) -> Vec<String> {
        self.writes
            .iter()
            .filter(|w| w.ends_with(b"\n"))
            .map(|w| String::from_utf8_lossy(&w[..w.len() - 1]).into_owned())
            .collect()
    }

    /// Verbs of the command lines written so far.
    pub fn verbs(&self) -> Vec<String> {
        self.lines()
            .iter()
            .filter_map(|l| l.split_whitespace().next().map(str::to_string))
            .collect()
    }
}

/// Opener handing out ports that share one [`MockState`].
#[derive(Debug, Clone, Default)]
pub(crate) struct MockOpener {
    state: Arc<Mutex<MockState>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the reply for a command verb.
    pub fn reply(self, verb: &str, response: &str) -> Self {
        self.state()
            .replies
            .insert(verb.to_string(), response.to_string());
        self
    }

    /// Answer every protocol command with an acceptance.
    pub fn accepting_all(self) -> Self {
        self.reply("U", "Synchronized\r\nOK\r\n")
            .reply("P", "0\r\n")
            .reply("E", "0\r\n")
            .reply("W", "0\r\n")
            .reply("C", "0\r\n")
            .reply("CHECKSUM", "OK\r\n")
    }

    pub fn failing_open(self) -> Self {
        self.state().fail_open = true;
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl PortOpener for MockOpener {
    type Port = MockPort;

    fn open(&self, config: &SerialConfig) -> Result<MockPort> {
        let mut state = self.state();
        if state.fail_open {
            return Err(Error::Connection(format!(
                "cannot open {}: no such device",
                config.port_name
            )));
        }
        state.open = true;
        state.opens += 1;
        Ok(MockPort {
            state: Arc::clone(&self.state),
            name: config.port_name.clone(),
            baud_rate: config.baud_rate,
        })
    }
}

pub(crate) struct MockPort {
    state: Arc<Mutex<MockState>>,
    name: String,
    baud_rate: u32,
}

impl MockPort {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn bytes_to_read(&mut self) -> Result<usize> {
        Ok(self.state().rx.len())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state();
        if state.rx.is_empty() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.rx.len());
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write timed out",
            ));
        }
        state.writes.push(buf.to_vec());
        if let Some(line) = buf.strip_suffix(b"\n") {
            let line = String::from_utf8_lossy(line);
            let reply = line
                .split_whitespace()
                .next()
                .and_then(|verb| state.replies.get(verb))
                .cloned();
            if let Some(reply) = reply {
                state.rx.extend(reply.bytes());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
