use log::{error, info};
use std::fmt;
use tokio::time::Duration;
use tokio_serial::SerialPortBuilderExt;
pub use tokio_serial::{DataBits, FlowControl, Parity, SerialStream, StopBits};

use crate::error::{AcquisitionError, Result};

/// serial port baud rate
pub const COMMON_BAUD_RATES: &[u32] = &[
    4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 576000, 921600, 1000000,
    1500000, 2000000,
];

/// serial port settings
#[derive(Clone, Debug)]
pub struct PortSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// bound on a single device read
    pub timeout: Duration,
    /// sleep between idle polls until the first byte arrives
    pub idle_backoff: Duration,
    /// how long `close` waits for the read loop
    pub shutdown_timeout: Duration,
    /// longest accepted record, terminator excluded
    pub max_record_len: usize,
    /// consecutive read errors before the connection is considered lost
    pub max_io_errors: u32,
}

/// serial port settings implementation
impl PortSettings {
    /// serial port settings initialization
    pub fn new(port_name: impl Into<String>) -> Self {
        PortSettings {
            port_name: port_name.into(),
            baud_rate: 115200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            timeout: Duration::from_millis(500),
            idle_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(3),
            max_record_len: 1024,
            max_io_errors: 5,
        }
    }

    /// set baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// set read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// set idle back-off
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// set shutdown bound
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// set record length limit
    pub fn with_max_record_len(mut self, max_record_len: usize) -> Self {
        self.max_record_len = max_record_len;
        self
    }

    /// set consecutive read error limit
    pub fn with_max_io_errors(mut self, max_io_errors: u32) -> Self {
        self.max_io_errors = max_io_errors;
        self
    }

    /// check the settings before a connection is attempted
    pub fn validate(&self) -> Result<()> {
        if self.port_name.trim().is_empty() {
            return Err(AcquisitionError::invalid_config("port name is empty"));
        }
        if self.baud_rate == 0 {
            return Err(AcquisitionError::invalid_config("baud rate must be non-zero"));
        }
        if self.timeout.is_zero() {
            return Err(AcquisitionError::invalid_config("read timeout must be non-zero"));
        }
        if self.max_record_len == 0 {
            return Err(AcquisitionError::invalid_config(
                "record length limit must be non-zero",
            ));
        }
        if self.max_io_errors == 0 {
            return Err(AcquisitionError::invalid_config(
                "I/O error limit must be non-zero",
            ));
        }
        if self.shutdown_timeout <= self.poll_bound() {
            return Err(AcquisitionError::invalid_config(format!(
                "shutdown timeout {:?} must exceed read timeout plus idle back-off ({:?})",
                self.shutdown_timeout,
                self.poll_bound()
            )));
        }
        Ok(())
    }

    /// longest the read loop can go without checking for a stop request
    pub fn poll_bound(&self) -> Duration {
        self.timeout.saturating_add(self.idle_backoff)
    }

    /// get serial port data bits name
    pub fn databits_name(&self) -> String {
        format!("{}", self.data_bits)
    }
    /// get serial port stop bits name
    pub fn stop_bits_name(&self) -> String {
        format!("{}", self.stop_bits)
    }
    /// get serial port parity name
    pub fn parity_name(&self) -> String {
        format!("{}", self.parity)
    }
    /// get serial port flow control name
    pub fn flow_control_name(&self) -> String {
        format!("{}", self.flow_control)
    }
}

impl Default for PortSettings {
    fn default() -> Self {
        PortSettings::new("")
    }
}

/// open serial port
pub fn open_port(settings: &PortSettings) -> Result<SerialStream> {
    match tokio_serial::new(&settings.port_name, settings.baud_rate)
        .data_bits(settings.data_bits)
        .parity(settings.parity)
        .stop_bits(settings.stop_bits)
        .flow_control(settings.flow_control)
        .timeout(settings.timeout)
        .open_native_async()
    {
        Ok(stream) => {
            info!(
                "Opened serial port {} at {} baud (data bits {}, parity {}, stop bits {}, flow control {})",
                settings.port_name,
                settings.baud_rate,
                settings.databits_name(),
                settings.parity_name(),
                settings.stop_bits_name(),
                settings.flow_control_name()
            );
            Ok(stream)
        }
        Err(e) => {
            error!("Failed to open serial port {}: {}", settings.port_name, e);
            Err(AcquisitionError::port_open(&settings.port_name, e.to_string()))
        }
    }
}

/// serial connection status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnStatus {
    /// no connection
    #[default]
    Closed,
    /// open in progress
    Connecting,
    /// read loop running
    Connected,
    /// connection failed underneath the read loop
    Lost,
}

impl ConnStatus {
    /// read loop should keep running
    pub fn is_open(&self) -> bool {
        matches!(self, ConnStatus::Connected)
    }

    /// closed by the caller
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnStatus::Closed)
    }

    /// lost underneath the read loop
    pub fn is_lost(&self) -> bool {
        matches!(self, ConnStatus::Lost)
    }
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnStatus::Closed => write!(f, "closed"),
            ConnStatus::Connecting => write!(f, "connecting"),
            ConnStatus::Connected => write!(f, "connected"),
            ConnStatus::Lost => write!(f, "lost"),
        }
    }
}
