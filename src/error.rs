//! # Error Module
//!
//! This module provides custom error types for the `serial_trend` crate.
//! It uses the `thiserror` crate for ergonomic error handling.
//!
//! Only connection lifecycle and port enumeration failures are surfaced to
//! callers as [`AcquisitionError`]. [`ProtocolError`] describes why a single
//! record was rejected; the read loop logs it and moves on.

use std::num::ParseFloatError;
use std::str::Utf8Error;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for `serial_trend` operations.
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Errors surfaced by the acquisition lifecycle and port enumeration.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// Failed to open serial port.
    #[error("Failed to open serial port '{port_name}': {reason}")]
    PortOpen { port_name: String, reason: String },

    /// The read loop did not stop within the shutdown bound.
    #[error("Read loop did not stop within {waited:?}; worker aborted")]
    ShutdownTimeout { waited: Duration },

    /// The read loop ended abnormally (panic or cancellation).
    #[error("Read loop failed: {0}")]
    Worker(String),

    /// No usable serial port appeared before the retry budget ran out.
    #[error("No serial ports found after {attempts} attempts")]
    NoPortsFound { attempts: u32 },

    /// The platform port listing failed.
    #[error("Failed to enumerate serial ports: {0}")]
    PortEnumeration(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AcquisitionError {
    /// Creates a new port open error.
    #[must_use]
    pub fn port_open(port_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortOpen {
            port_name: port_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new worker error.
    #[must_use]
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Creates a new port enumeration error.
    #[must_use]
    pub fn port_enumeration(msg: impl Into<String>) -> Self {
        Self::PortEnumeration(msg.into())
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// Reasons a single wire record is rejected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Record bytes are not valid UTF-8.
    #[error("Record is not valid UTF-8: {0}")]
    Decode(#[from] Utf8Error),

    /// Line does not start with `$`.
    #[error("Line does not start with '$'")]
    MissingPrefix,

    /// Line does not end with a two character terminator.
    #[error("Line does not end with a two character terminator")]
    MissingTerminator,

    /// Payload did not split into exactly flag and value.
    #[error("Expected 2 ':'-separated fields, found {found}")]
    FieldCount { found: usize },

    /// Flag field is empty.
    #[error("Channel flag is empty")]
    EmptyFlag,

    /// Value field is not a floating point number.
    #[error("Invalid value '{value}': {source}")]
    InvalidValue {
        value: String,
        #[source]
        source: ParseFloatError,
    },

    /// Flag cannot be represented on the wire.
    #[error("Flag '{0}' cannot be encoded")]
    InvalidFlag(String),
}
