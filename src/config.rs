//! Server configuration management

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default USB/IP TCP port
pub const USBIP_PORT: u16 = 3240;

/// Largest device address a USB bus can hand out
pub const MAX_DEVICE_ADDRESS: u8 = 127;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: SocketAddr,
    /// Bus number announced in busids and paths
    pub bus_number: u32,
    /// Capacity of the device registry and transfer table
    pub max_devices: u8,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub usb: UsbSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], USBIP_PORT)),
            bus_number: 1,
            max_devices: 16,
            log_level: "info".to_string(),
            usb: UsbSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbSettings {
    /// VID:PID patterns such as `"1234:*"`; empty exports everything
    pub filters: Vec<String>,
    pub rescan_interval_ms: u64,
    pub control_timeout_ms: u64,
    /// 0 waits forever
    pub transfer_timeout_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: vec![],
            rescan_interval_ms: 1000,
            control_timeout_ms: 1000,
            transfer_timeout_ms: 0,
        }
    }
}

impl UsbSettings {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn device_filters(&self) -> Result<Vec<DeviceFilter>> {
        self.filters.iter().map(|f| DeviceFilter::parse(f)).collect()
    }
}

/// One `VID:PID` pattern, `*` matching any id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn parse(filter: &str) -> Result<Self> {
        let (vid, pid) = filter
            .trim()
            .split_once(':')
            .ok_or_else(|| {
                Error::Config(format!("Invalid filter '{}', expected VID:PID", filter))
            })?;
        let id = |s: &str| -> Result<Option<u16>> {
            if s == "*" {
                return Ok(None);
            }
            u16::from_str_radix(s.trim_start_matches("0x"), 16)
                .map(Some)
                .map_err(|_| Error::Config(format!("Invalid id '{}' in filter '{}'", s, filter)))
        };
        Ok(Self {
            vendor_id: id(vid)?,
            product_id: id(pid)?,
        })
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id.map_or(true, |vid| vid == vendor_id)
            && self.product_id.map_or(true, |pid| pid == product_id)
    }
}

/// `true` if the device passes `filters`; no filters lets every device through
pub fn filters_allow(filters: &[DeviceFilter], vendor_id: u16, product_id: u16) -> bool {
    filters.is_empty() || filters.iter().any(|f| f.matches(vendor_id, product_id))
}

impl ServerConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_devices == 0 || self.max_devices > MAX_DEVICE_ADDRESS {
            return Err(Error::Config(format!(
                "max_devices must be within 1..={}, got {}",
                MAX_DEVICE_ADDRESS, self.max_devices
            )));
        }
        if self.usb.rescan_interval_ms == 0 {
            return Err(Error::Config("rescan_interval_ms must not be 0".to_string()));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(Error::Config(format!("Unknown log level '{}'", self.log_level)));
        }
        self.usb.device_filters()?;
        Ok(())
    }
}
