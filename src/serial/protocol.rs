//! # Protocol Module
//!
//! Line protocol spoken by the device. One record per line:
//!
//! ```text
//! $<flag>:<value>\r\n
//! ```
//!
//! The flag names a channel and is otherwise opaque; the value is a floating
//! point number.

use crate::error::ProtocolError;

/// Marker that starts every record.
pub const RECORD_PREFIX: char = '$';

/// Separator between flag and value.
pub const FIELD_SEPARATOR: char = ':';

/// Terminator appended by [`encode_sample`].
pub const RECORD_TERMINATOR: &str = "\r\n";

/// One labeled measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub flag: String,
    pub value: f64,
}

impl Sample {
    pub fn new(flag: impl Into<String>, value: f64) -> Self {
        Sample {
            flag: flag.into(),
            value,
        }
    }
}

fn is_terminator(c: char) -> bool {
    c == '\r' || c == '\n'
}

/// Parses one decoded line into a [`Sample`].
///
/// The line must start with `$` and end with a two character terminator,
/// which is stripped before the payload is split on `:`. Whitespace around
/// the value is ignored; the flag is taken as is.
///
/// # Examples
///
/// ```
/// use serial_trend::serial::protocol::{parse_line, Sample};
///
/// let sample = parse_line("$TEMP:23.5\r\n").unwrap();
/// assert_eq!(sample, Sample::new("TEMP", 23.5));
///
/// assert!(parse_line("TEMP:23.5\r\n").is_err());
/// assert!(parse_line("$TEMP:23.5:X\r\n").is_err());
/// assert!(parse_line("$TEMP:abc\r\n").is_err());
/// ```
pub fn parse_line(line: &str) -> Result<Sample, ProtocolError> {
    let body = line
        .strip_prefix(RECORD_PREFIX)
        .ok_or(ProtocolError::MissingPrefix)?;

    let mut tail = body.char_indices().rev();
    let cut = match (tail.next(), tail.next()) {
        (Some((_, last)), Some((idx, before))) if is_terminator(last) && is_terminator(before) => {
            idx
        }
        _ => return Err(ProtocolError::MissingTerminator),
    };

    let fields: Vec<&str> = body[..cut].split(FIELD_SEPARATOR).collect();
    let [flag, raw] = fields[..] else {
        return Err(ProtocolError::FieldCount {
            found: fields.len(),
        });
    };
    if flag.is_empty() {
        return Err(ProtocolError::EmptyFlag);
    }

    let raw = raw.trim();
    let value = raw
        .parse::<f64>()
        .map_err(|source| ProtocolError::InvalidValue {
            value: raw.to_string(),
            source,
        })?;
    Ok(Sample::new(flag, value))
}

/// Renders a sample in wire form, terminator included.
///
/// # Examples
///
/// ```
/// use serial_trend::serial::protocol::encode_sample;
///
/// assert_eq!(encode_sample("HUM", 41.25).unwrap(), "$HUM:41.25\r\n");
/// assert!(encode_sample("A:B", 1.0).is_err());
/// ```
pub fn encode_sample(flag: &str, value: f64) -> Result<String, ProtocolError> {
    let unencodable = flag.is_empty()
        || flag
            .chars()
            .any(|c| c == RECORD_PREFIX || c == FIELD_SEPARATOR || is_terminator(c));
    if unencodable {
        return Err(ProtocolError::InvalidFlag(flag.to_string()));
    }
    Ok(format!(
        "{RECORD_PREFIX}{flag}{FIELD_SEPARATOR}{value}{RECORD_TERMINATOR}"
    ))
}
