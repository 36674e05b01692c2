//! Device records in the shape the host application stores them.
//!
//! Enum fields travel as plain integers. Unknown integers decode to the
//! `Unknown` variant and missing keys decode to defaults, so records written
//! by newer hosts still load.

use crate::device::DiscoveredDevice;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum InterfaceType {
    Usb,
    UsbHid,
    Bt,
    #[default]
    Unknown,
}

impl From<i64> for InterfaceType {
    fn from(code: i64) -> Self {
        match code {
            0 => InterfaceType::Usb,
            1 => InterfaceType::UsbHid,
            2 => InterfaceType::Bt,
            _ => InterfaceType::Unknown,
        }
    }
}

impl From<InterfaceType> for i64 {
    fn from(kind: InterfaceType) -> Self {
        match kind {
            InterfaceType::Usb => 0,
            InterfaceType::UsbHid => 1,
            InterfaceType::Bt => 2,
            InterfaceType::Unknown => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MachineType {
    #[default]
    Unknown,
    TypeA,
    TypeB,
}

impl From<i64> for MachineType {
    fn from(code: i64) -> Self {
        match code {
            1 => MachineType::TypeA,
            2 => MachineType::TypeB,
            _ => MachineType::Unknown,
        }
    }
}

impl From<MachineType> for i64 {
    fn from(kind: MachineType) -> Self {
        match kind {
            MachineType::Unknown => 0,
            MachineType::TypeA => 1,
            MachineType::TypeB => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    #[serde(rename = "comPortName")]
    pub com_port_name: String,
    #[serde(rename = "BTFriendlyName")]
    pub bt_friendly_name: String,
    #[serde(rename = "interfaceType")]
    pub interface_type: InterfaceType,
    #[serde(rename = "interfaceIndex")]
    pub interface_index: i32,
    #[serde(rename = "machineType")]
    pub machine_type: MachineType,
}

impl DeviceInfo {
    /// Bluetooth record for a scan result at position `index`
    pub fn from_discovered(device: &DiscoveredDevice, index: usize) -> Self {
        Self {
            com_port_name: device.id.clone(),
            bt_friendly_name: device.name.clone(),
            interface_type: InterfaceType::Bt,
            interface_index: i32::try_from(index).unwrap_or(i32::MAX),
            machine_type: MachineType::Unknown,
        }
    }
}

/// Convert a scan result list, numbering interfaces in discovery order
pub fn device_infos(devices: &[DiscoveredDevice]) -> Vec<DeviceInfo> {
    devices
        .iter()
        .enumerate()
        .map(|(index, device)| DeviceInfo::from_discovered(device, index))
        .collect()
}
