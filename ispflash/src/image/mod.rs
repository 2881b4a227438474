//! Firmware image formats.

pub mod hex;

pub use hex::{HexRecord, MemoryImage, Segment, decode, decode_str};
