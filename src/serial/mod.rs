//! # Serial Module
//!
//! Everything between the device and the channel store: port settings and
//! status, record assembly and decoding, the line protocol, and the
//! acquisition engine that runs the read loop.

pub mod encoding;
pub mod engine;
pub mod port;
pub mod protocol;

pub use engine::{Acquisition, ReadStats};
pub use port::{COMMON_BAUD_RATES, ConnStatus, PortSettings};
pub use protocol::{Sample, encode_sample, parse_line};
