use std::path::Path;

use log::{debug, info, warn};
use regex::Regex;
use tokio::time::{self, Duration};
use tokio_serial::{SerialPortInfo, SerialPortType};

use crate::error::{AcquisitionError, Result};

/// Ports that accept incoming connections only and never carry device data.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[r"Bluetooth-Incoming-Port"];

/// Port metadata used for operator selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortInfo {
    pub port_name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub pid: Option<u16>,
    pub vid: Option<u16>,
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => PortInfo {
                port_name: info.port_name,
                description: usb.product,
                manufacturer: usb.manufacturer,
                pid: Some(usb.pid),
                vid: Some(usb.vid),
                serial_number: usb.serial_number,
            },
            SerialPortType::PciPort => PortInfo {
                port_name: info.port_name,
                description: Some("PCI".to_string()),
                ..PortInfo::default()
            },
            SerialPortType::BluetoothPort => PortInfo {
                port_name: info.port_name,
                description: Some("Bluetooth".to_string()),
                ..PortInfo::default()
            },
            SerialPortType::Unknown => PortInfo {
                port_name: info.port_name,
                ..PortInfo::default()
            },
        }
    }
}

/// Anything that can list serial ports.
#[cfg_attr(test, mockall::automock)]
pub trait PortSource {
    fn available_ports(&self) -> Result<Vec<PortInfo>>;
}

/// The ports the operating system reports.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPorts;

impl PortSource for SystemPorts {
    fn available_ports(&self) -> Result<Vec<PortInfo>> {
        tokio_serial::available_ports()
            .map(|ports| ports.into_iter().map(PortInfo::from).collect())
            .map_err(|e| AcquisitionError::port_enumeration(e.to_string()))
    }
}

/// Hides ports whose name matches any exclusion pattern.
#[derive(Clone, Debug)]
pub struct PortFilter {
    exclude: Vec<Regex>,
}

impl PortFilter {
    pub fn new(patterns: &[&str]) -> Result<Self> {
        let exclude = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    AcquisitionError::invalid_config(format!("bad port pattern '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PortFilter { exclude })
    }

    /// A filter that keeps every port.
    pub fn allow_all() -> Self {
        PortFilter {
            exclude: Vec::new(),
        }
    }

    pub fn allows(&self, port: &PortInfo) -> bool {
        !self.exclude.iter().any(|re| re.is_match(&port.port_name))
    }
}

impl Default for PortFilter {
    fn default() -> Self {
        let exclude = DEFAULT_EXCLUDE_PATTERNS
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .collect();
        PortFilter { exclude }
    }
}

/// How often and how long [`detect_ports`] keeps looking.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        RetryPolicy {
            interval,
            max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(Duration::from_millis(500), 20)
    }
}

/// One-line description: path, device name, then whichever metadata is known.
pub fn describe_port(port: &PortInfo) -> String {
    let mut line = port.port_name.clone();
    if let Some(name) = Path::new(&port.port_name)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| *name != port.port_name)
    {
        line.push(' ');
        line.push_str(name);
    }
    if let Some(description) = &port.description {
        line.push_str(&format!(" - {description}"));
    }
    if let Some(manufacturer) = &port.manufacturer {
        line.push_str(&format!(" - {manufacturer}"));
    }
    if let Some(pid) = port.pid {
        line.push_str(&format!(" - pid(0x{pid:04X})"));
    }
    if let Some(vid) = port.vid {
        line.push_str(&format!(" - vid(0x{vid:04X})"));
    }
    if let Some(serial_number) = &port.serial_number {
        line.push_str(&format!(" - v{serial_number}"));
    }
    line
}

/// Usable ports from a single scan.
pub fn scan_ports<P>(source: &P, filter: &PortFilter) -> Result<Vec<PortInfo>>
where
    P: PortSource + ?Sized,
{
    let ports = source.available_ports()?;
    Ok(ports.into_iter().filter(|port| filter.allows(port)).collect())
}

/// Descriptions of the usable ports from a single scan.
pub fn list_ports<P>(source: &P, filter: &PortFilter) -> Result<Vec<String>>
where
    P: PortSource + ?Sized,
{
    Ok(scan_ports(source, filter)?
        .iter()
        .map(describe_port)
        .collect())
}

/// Scans until at least one usable port shows up.
///
/// Gives up with [`AcquisitionError::NoPortsFound`] after
/// `policy.max_attempts` scans. Dropping the future cancels the search.
pub async fn wait_for_ports<P>(
    source: &P,
    filter: &PortFilter,
    policy: &RetryPolicy,
) -> Result<Vec<PortInfo>>
where
    P: PortSource + ?Sized,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        match scan_ports(source, filter) {
            Ok(ports) if !ports.is_empty() => {
                info!("Found {} serial port(s)", ports.len());
                return Ok(ports);
            }
            Ok(_) => debug!("No serial ports yet ({attempt}/{attempts})"),
            Err(e) => warn!("Port scan failed ({attempt}/{attempts}): {e}"),
        }
        if attempt < attempts {
            time::sleep(policy.interval).await;
        }
    }
    Err(AcquisitionError::NoPortsFound { attempts })
}

/// Like [`wait_for_ports`], returning descriptions.
pub async fn detect_ports<P>(
    source: &P,
    filter: &PortFilter,
    policy: &RetryPolicy,
) -> Result<Vec<String>>
where
    P: PortSource + ?Sized,
{
    let ports = wait_for_ports(source, filter, policy).await?;
    Ok(ports.iter().map(describe_port).collect())
}
