//! Audio device discovery.

use cpal::traits::{DeviceTrait, HostTrait};

/// A discovered audio device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name, also used as its identifier
    pub name: String,
    pub is_default: bool,
}

/// List the input devices of the default host.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default = host.default_input_device().and_then(|d| d.name().ok());
    host.input_devices()
        .map(|devices| describe(devices, default.as_deref()))
        .unwrap_or_default()
}

/// List the output devices of the default host.
pub fn list_output_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default = host.default_output_device().and_then(|d| d.name().ok());
    host.output_devices()
        .map(|devices| describe(devices, default.as_deref()))
        .unwrap_or_default()
}

fn describe(devices: impl Iterator<Item = cpal::Device>, default: Option<&str>) -> Vec<DeviceInfo> {
    devices
        .filter_map(|device| device.name().ok())
        .map(|name| DeviceInfo {
            is_default: default == Some(name.as_str()),
            name,
        })
        .collect()
}

/// Find an input device by name, or the default one for `None`.
pub fn find_input_device(host: &cpal::Host, id: Option<&str>) -> Option<cpal::Device> {
    match id {
        None => host.default_input_device(),
        Some(id) => host
            .input_devices()
            .ok()?
            .find(|d| d.name().is_ok_and(|name| name == id)),
    }
}

/// Find an output device by name, or the default one for `None`.
pub fn find_output_device(host: &cpal::Host, id: Option<&str>) -> Option<cpal::Device> {
    match id {
        None => host.default_output_device(),
        Some(id) => host
            .output_devices()
            .ok()?
            .find(|d| d.name().is_ok_and(|name| name == id)),
    }
}
