//! # Encoding Module
//!
//! Turns the raw byte stream into line records and decodes them to text.
//!
//! Records are split on `\n` and keep their terminator, so the parser sees
//! exactly what the device sent.

use log::warn;

use crate::error::ProtocolError;

/// Byte that ends a record.
pub const LINE_FEED: u8 = b'\n';

/// Accumulates bytes and yields complete line records.
#[derive(Debug)]
pub struct LineAssembler {
    partial: Vec<u8>,
    max_record_len: usize,
    overflowed: bool,
    discarded: u64,
}

impl LineAssembler {
    pub fn new(max_record_len: usize) -> Self {
        LineAssembler {
            partial: Vec::with_capacity(max_record_len.min(4096)),
            max_record_len,
            overflowed: false,
            discarded: 0,
        }
    }

    /// Feeds a chunk and returns every record it completed.
    ///
    /// A record whose content, line terminator excluded, grows past the
    /// length limit is dropped up to and including its line feed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        for &byte in chunk {
            if byte == LINE_FEED {
                if self.overflowed {
                    self.overflowed = false;
                } else {
                    self.partial.push(byte);
                    records.push(std::mem::take(&mut self.partial));
                }
                continue;
            }
            if self.overflowed {
                continue;
            }
            // a trailing '\r' belongs to the terminator, not the content
            let limit = if byte == b'\r' {
                self.max_record_len + 1
            } else {
                self.max_record_len
            };
            if self.partial.len() >= limit {
                self.overflowed = true;
                self.discarded += 1;
                warn!(
                    "Discarding record longer than {} bytes: {}",
                    self.max_record_len,
                    hex_preview(&self.partial)
                );
                self.partial.clear();
                continue;
            }
            self.partial.push(byte);
        }
        records
    }

    /// Bytes waiting for a line feed.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Number of oversized records dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

/// Decodes a record as UTF-8.
///
/// Returns `Ok(None)` for a record that holds nothing but line terminators.
///
/// # Examples
///
/// ```
/// use serial_trend::serial::encoding::decode_record;
///
/// assert_eq!(decode_record(b"$A:1\r\n").unwrap(), Some("$A:1\r\n"));
/// assert_eq!(decode_record(b"\r\n").unwrap(), None);
/// assert!(decode_record(&[0x24, 0xFF, 0x0A]).is_err());
/// ```
pub fn decode_record(record: &[u8]) -> Result<Option<&str>, ProtocolError> {
    let text = std::str::from_utf8(record)?;
    if text.trim_end_matches(['\r', '\n']).is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

/// Hex rendering of the first bytes of a record, for log lines.
#[must_use]
pub fn hex_preview(data: &[u8]) -> String {
    const PREVIEW_LEN: usize = 32;
    let shown = &data[..data.len().min(PREVIEW_LEN)];
    if data.len() > PREVIEW_LEN {
        format!("{}..", hex::encode(shown))
    } else {
        hex::encode(shown)
    }
}
