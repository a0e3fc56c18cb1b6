//! Packet sources: a live interface tap or a pcap trace on disk.

use pcap::{Active, Capture, Device, Offline};
use std::fmt;
use std::path::{Path, PathBuf};

/// Errors opening a packet source.
#[derive(Debug)]
pub enum CaptureError {
    /// The requested interface does not exist; carries the names that do.
    UnknownInterface { name: String, available: Vec<String> },
    /// No interface was named and none could be picked automatically.
    NoDefaultInterface,
    /// libpcap rejected the source.
    Open { source: String, error: pcap::Error },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::UnknownInterface { name, available } => {
                write!(
                    f,
                    "unknown interface '{}' (available: {})",
                    name,
                    available.join(", ")
                )
            }
            CaptureError::NoDefaultInterface => {
                write!(f, "no default capture interface; name one explicitly")
            }
            CaptureError::Open { source, error } => {
                write!(f, "cannot open {}: {}", source, error)
            }
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CaptureError::Open { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Configuration for opening a packet source.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Live interface name; default device when `None`.
    pub interface: Option<String>,
    /// Offline pcap trace; takes precedence over `interface`.
    pub file: Option<PathBuf>,
    pub promiscuous: bool,
    pub snaplen: i32,
    pub timeout_ms: i32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: None,
            file: None,
            promiscuous: true,
            snaplen: 65535,
            timeout_ms: 100,
        }
    }
}

/// A live or offline capture handle.
pub enum CaptureSource {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

impl CaptureSource {
    /// Read the next packet. Live handles yield `TimeoutExpired` during
    /// lulls; offline handles yield `NoMorePackets` at end of file.
    pub fn next_packet(&mut self) -> Result<pcap::Packet<'_>, pcap::Error> {
        match self {
            CaptureSource::Live(cap) => cap.next_packet(),
            CaptureSource::Offline(cap) => cap.next_packet(),
        }
    }
}

/// Names and descriptions of the interfaces pcap can tap.
pub fn interface_names() -> Result<Vec<(String, String)>, CaptureError> {
    let devices = Device::list().map_err(|error| CaptureError::Open {
        source: "interface list".into(),
        error,
    })?;
    Ok(devices
        .into_iter()
        .map(|d| (d.name, d.desc.unwrap_or_default()))
        .collect())
}

/// Open a packet source per the configuration: a pcap trace when one is
/// given, a live tap otherwise.
pub fn open_capture(config: &CaptureConfig) -> Result<CaptureSource, CaptureError> {
    match &config.file {
        Some(path) => open_trace(path),
        None => open_live(config),
    }
}

fn open_trace(path: &Path) -> Result<CaptureSource, CaptureError> {
    let cap = Capture::from_file(path).map_err(|error| CaptureError::Open {
        source: path.display().to_string(),
        error,
    })?;
    tracing::info!(file = %path.display(), "reading trace");
    Ok(CaptureSource::Offline(cap))
}

fn open_live(config: &CaptureConfig) -> Result<CaptureSource, CaptureError> {
    let device = resolve_device(config.interface.as_deref())?;
    let name = device.name.clone();

    let cap = Capture::from_device(device)
        .and_then(|cap| {
            cap.promisc(config.promiscuous)
                .snaplen(config.snaplen)
                .timeout(config.timeout_ms)
                .open()
        })
        .map_err(|error| CaptureError::Open {
            source: name.clone(),
            error,
        })?;

    tracing::info!(
        interface = %name,
        promiscuous = config.promiscuous,
        snaplen = config.snaplen,
        "tapping interface"
    );

    Ok(CaptureSource::Live(cap))
}

fn resolve_device(name: Option<&str>) -> Result<Device, CaptureError> {
    match name {
        Some(wanted) => {
            let mut devices = Device::list().map_err(|error| CaptureError::Open {
                source: "interface list".into(),
                error,
            })?;
            match devices.iter().position(|d| d.name == wanted) {
                Some(i) => Ok(devices.swap_remove(i)),
                None => Err(CaptureError::UnknownInterface {
                    name: wanted.to_string(),
                    available: devices.into_iter().map(|d| d.name).collect(),
                }),
            }
        }
        None => Device::lookup()
            .map_err(|error| CaptureError::Open {
                source: "default interface".into(),
                error,
            })?
            .ok_or(CaptureError::NoDefaultInterface),
    }
}
