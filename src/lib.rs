//! # Serial Trend
//!
//! Acquisition pipeline for line-oriented serial telemetry.
//!
//! A device streams records of the form `$<flag>:<value>\r\n`. The crate
//! reads them on a background tokio task, demultiplexes the values by flag
//! into bounded per-channel queues, and lets a consumer advance fixed-length
//! rolling windows at its own cadence.
//!
//! ## Architecture
//!
//! - [`serial`]: port settings, connection status, record decoding, the line
//!   protocol and the acquisition engine
//! - [`channel`]: per-flag queues and rolling windows
//! - [`port`]: serial port discovery
//! - [`error`]: error types for the crate

pub mod channel;
pub mod error;
pub mod port;
pub mod serial;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::channel::{ChannelStore, SampleSink};
    pub use crate::error::*;
    pub use crate::port::{PortFilter, RetryPolicy, SystemPorts, detect_ports, list_ports};
    pub use crate::serial::{Acquisition, ConnStatus, PortSettings, ReadStats, Sample, parse_line};
}
