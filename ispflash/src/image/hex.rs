//! Intel HEX decoding.
//!
//! Each record line has the shape
//!
//! ```text
//! +---+-------+---------+------+-----------------+----------+
//! | : | count | address | type |      data       | checksum |
//! +---+-------+---------+------+-----------------+----------+
//! | 1 |   2   |    4    |  2   |   2 * count     |    2     |
//! +---+-------+---------+------+-----------------+----------+
//! ```
//!
//! Only data records (type `00`) are applied to the image. Address-extension,
//! start-address and EOF records are skipped, so images are limited to the
//! 64 KiB reachable through the 16-bit record address. The checksum field is
//! never validated.

use crate::error::{Error, Result};
use log::debug;
use std::fs;
use std::path::Path;

/// Marker that starts every record line.
pub const RECORD_MARK: char = ':';

/// Record type of data records.
pub const RECORD_TYPE_DATA: u8 = 0x00;

/// Characters before the data field: mark, count, address and type.
const HEADER_LEN: usize = 9;

/// A single decoded record line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Number of data bytes declared by the record.
    pub byte_count: u8,
    /// 16-bit load offset.
    pub address: u16,
    /// Record type.
    pub record_type: u8,
    /// Data bytes.
    pub data: Vec<u8>,
}

impl HexRecord {
    /// Parse a `:`-prefixed record line.
    ///
    /// Anything after the declared data bytes (the checksum) is ignored.
    /// The error message does not include a line number; [`decode`] adds it.
    pub fn parse(line: &str) -> std::result::Result<Self, String> {
        let body = line
            .strip_prefix(RECORD_MARK)
            .ok_or_else(|| format!("record must start with '{RECORD_MARK}'"))?;
        if line.len() < HEADER_LEN {
            return Err(format!(
                "record header needs {HEADER_LEN} characters, got {}",
                line.len()
            ));
        }

        let byte_count = hex_u8(body, 0)?;
        let address = (u16::from(hex_u8(body, 2)?) << 8) | u16::from(hex_u8(body, 4)?);
        let record_type = hex_u8(body, 6)?;

        let data_start = HEADER_LEN - 1;
        let data_chars = usize::from(byte_count) * 2;
        if body.len() < data_start + data_chars {
            return Err(format!(
                "declared {byte_count} data bytes but only {} hex characters follow",
                body.len() - data_start
            ));
        }

        let data = (0..usize::from(byte_count))
            .map(|i| hex_u8(body, data_start + i * 2))
            .collect::<std::result::Result<Vec<u8>, String>>()?;

        Ok(Self {
            byte_count,
            address,
            record_type,
            data,
        })
    }

    /// Whether this is a data record.
    pub fn is_data(&self) -> bool {
        self.record_type == RECORD_TYPE_DATA
    }

    /// One past the last byte covered by this record.
    pub fn end(&self) -> usize {
        usize::from(self.address) + self.data.len()
    }
}

/// Decode two hex digits starting at character `pos` of `s`.
fn hex_u8(s: &str, pos: usize) -> std::result::Result<u8, String> {
    let digits = s
        .get(pos..pos + 2)
        .ok_or_else(|| format!("truncated hex byte at column {}", pos + 2))?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("invalid hex digits {digits:?} at column {}", pos + 2));
    }
    u8::from_str_radix(digits, 16)
        .map_err(|_| format!("invalid hex digits {digits:?} at column {}", pos + 2))
}

/// A contiguous run of bytes to program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Flash address of the first byte.
    pub address: u32,
    /// Bytes to write.
    pub data: &'a [u8],
}

/// Flat firmware image decoded from Intel HEX.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    data: Vec<u8>,
    record_count: usize,
    data_record_count: usize,
}

impl MemoryImage {
    /// Load and decode a HEX file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading HEX image from: {}", path.display());

        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        decode_str(&text)
    }

    /// Image bytes, starting at address 0.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no data record contributed any byte.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte at `address`; zero outside the decoded range.
    pub fn byte_at(&self, address: usize) -> u8 {
        self.data.get(address).copied().unwrap_or(0)
    }

    /// The segments to program.
    ///
    /// Always exactly one segment starting at address 0 and spanning the
    /// whole buffer, gaps included.
    pub fn segments(&self) -> Vec<Segment<'_>> {
        vec![Segment {
            address: 0,
            data: &self.data,
        }]
    }

    /// Number of `:` record lines decoded.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Number of data records applied.
    pub fn data_record_count(&self) -> usize {
        self.data_record_count
    }

    fn apply(&mut self, record: &HexRecord) {
        let start = usize::from(record.address);
        let end = record.end();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(&record.data);
    }
}

/// Decode HEX lines into a memory image.
///
/// Lines that do not start with `:` are skipped.
pub fn decode<I, S>(lines: I) -> Result<MemoryImage>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut image = MemoryImage::default();

    for (index, line) in lines.into_iter().enumerate() {
        let line = line.as_ref();
        if !line.starts_with(RECORD_MARK) {
            continue;
        }

        let record = HexRecord::parse(line).map_err(|message| Error::Parse {
            line: index + 1,
            message,
        })?;
        image.record_count += 1;

        if record.is_data() {
            image.apply(&record);
            image.data_record_count += 1;
        }
    }

    debug!(
        "Decoded {} records ({} data), image is {} bytes",
        image.record_count,
        image.data_record_count,
        image.len()
    );
    Ok(image)
}

/// Decode HEX text into a memory image.
pub fn decode_str(text: &str) -> Result<MemoryImage> {
    decode(text.lines())
}
