//! Attached device discovery.
//!
//! Devices are listed with the dedicated device tooling when it is available.
//! Otherwise the platform USB inventory is searched for Apple mobile devices.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::tools::{
    DeviceLister, IdeviceLister, SystemProfilerInventory, ToolLocator, UsbInventory,
};

/// Label used when a device has no resolvable name.
pub const GENERIC_DEVICE_NAME: &str = "iOS Device";

const PRODUCT_NAMES: [&str; 3] = ["iPhone", "iPad", "iPod"];

/// Where a device was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSource {
    /// Dedicated device-listing tool.
    DeviceTool,
    /// Platform USB inventory.
    UsbInventory,
}

impl fmt::Display for DeviceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSource::DeviceTool => write!(f, "idevice"),
            DeviceSource::UsbInventory => write!(f, "usb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub source: DeviceSource,
}

/// Discovers attached devices. Every call rebuilds the list.
pub struct DeviceRegistry {
    lister: Arc<dyn DeviceLister>,
    inventory: Arc<dyn UsbInventory>,
}

impl DeviceRegistry {
    pub fn new(lister: Arc<dyn DeviceLister>, inventory: Arc<dyn UsbInventory>) -> Self {
        Self { lister, inventory }
    }

    pub fn system(locator: Arc<ToolLocator>) -> Self {
        Self::new(
            Arc::new(IdeviceLister::new(Arc::clone(&locator))),
            Arc::new(SystemProfilerInventory::new(locator)),
        )
    }

    /// Lists attached devices.
    ///
    /// Never fails: when neither strategy produces anything the list is empty.
    pub async fn list_devices(&self) -> Vec<Device> {
        match self.lister.list_device_ids().await {
            Some(ids) if !ids.is_empty() => {
                let mut devices = Vec::with_capacity(ids.len());
                for id in ids {
                    let name = self
                        .lister
                        .device_name(&id)
                        .await
                        .unwrap_or_else(|| GENERIC_DEVICE_NAME.to_string());
                    devices.push(Device {
                        id,
                        name,
                        source: DeviceSource::DeviceTool,
                    });
                }
                devices
            }
            _ => {
                tracing::debug!("No devices from device tool, reading USB inventory");
                match self.inventory.usb_tree().await {
                    Some(raw) => parse_usb_inventory(&raw),
                    None => Vec::new(),
                }
            }
        }
    }
}

/// Device selected when the caller has not chosen one: the only device, if
/// exactly one is attached.
pub fn default_selection(devices: &[Device]) -> Option<&Device> {
    match devices {
        [only] => Some(only),
        _ => None,
    }
}

/// Extracts Apple mobile devices from `system_profiler SPUSBDataType -json`
/// output. Malformed input yields an empty list.
pub fn parse_usb_inventory(raw: &[u8]) -> Vec<Device> {
    let root: Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Ignoring malformed USB inventory: {}", e);
            return Vec::new();
        }
    };

    let mut devices = Vec::new();
    if let Some(buses) = root.get("SPUSBDataType").and_then(Value::as_array) {
        collect_devices(buses, &mut devices);
    }
    devices
}

fn collect_devices(items: &[Value], devices: &mut Vec<Device>) {
    for item in items {
        let name = item.get("_name").and_then(Value::as_str).unwrap_or_default();
        let serial = item.get("serial_num").and_then(Value::as_str);

        if let Some(serial) = serial {
            if PRODUCT_NAMES.iter().any(|p| name.contains(p))
                && !devices.iter().any(|d| d.id == serial)
            {
                devices.push(Device {
                    id: serial.to_string(),
                    name: name.to_string(),
                    source: DeviceSource::UsbInventory,
                });
            }
        }

        if let Some(children) = item.get("_items").and_then(Value::as_array) {
            collect_devices(children, devices);
        }
    }
}
