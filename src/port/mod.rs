//! # Port Module
//!
//! Serial port discovery for operator selection.

pub mod ports;

pub use ports::{
    DEFAULT_EXCLUDE_PATTERNS, PortFilter, PortInfo, PortSource, RetryPolicy, SystemPorts,
    describe_port, detect_ports, list_ports, scan_ports, wait_for_ports,
};
