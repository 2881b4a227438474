//! Bootloader protocol.

pub mod isp;
pub mod session;

pub use isp::{Command, ProtocolTiming, SectorRange, is_accepted};
pub use session::{BootloaderSession, SessionState};
