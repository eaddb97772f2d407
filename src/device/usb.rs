//! libusb-backed ChatMix dial

use rusb::{
    ConfigDescriptor, Device, DeviceHandle, Direction, EndpointDescriptor, GlobalContext,
    TransferType, UsbContext,
};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DeviceError, DeviceIds, DialDevice};

/// Summary of a USB device on the bus (for `--list-devices`)
#[derive(Debug, Clone)]
pub struct UsbDeviceInfo {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Summary of an endpoint on the configured device
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    pub interface_number: u8,
    pub address: u8,
    pub is_in: bool,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

/// The dial's IN endpoint, claimed and ready for reading
pub struct UsbDial {
    handle: Option<DeviceHandle<GlobalContext>>,
    interface_number: u8,
    endpoint_address: u8,
    transfer_type: TransferType,
    buffer: Vec<u8>,
}

impl UsbDial {
    /// Open the dial and claim its interface
    pub fn open(ids: &DeviceIds) -> Result<Self, DeviceError> {
        let device = find_device(ids.vendor_id, ids.product_id)?;
        let config = find_interface(&device, ids.interface_number)?;
        let endpoint = find_in_endpoint(&config, ids.interface_number, ids.endpoint_address)?;

        let transfer_type = endpoint.transfer_type();
        let max_packet_size = usize::from(endpoint.max_packet_size()).max(1);

        let mut handle = device.open()?;

        // Not supported on Windows and macOS, only matters on Linux
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }

        match handle.active_configuration() {
            Ok(active) if active == config.number() => {}
            _ => {
                if let Err(e) = handle.set_active_configuration(config.number()) {
                    warn!(
                        "Failed to select configuration {}: {} (continuing)",
                        config.number(),
                        e
                    );
                }
            }
        }

        handle.claim_interface(ids.interface_number)?;

        info!(
            "Opened dial {} ({:?}, {} byte packets)",
            ids, transfer_type, max_packet_size
        );

        Ok(Self {
            handle: Some(handle),
            interface_number: ids.interface_number,
            endpoint_address: ids.endpoint_address,
            transfer_type,
            buffer: vec![0; max_packet_size],
        })
    }
}

impl DialDevice for UsbDial {
    fn read_report(&mut self, timeout: Duration) -> Result<Vec<u8>, DeviceError> {
        let handle = self.handle.as_ref().ok_or(DeviceError::Disconnected)?;

        let len = match self.transfer_type {
            TransferType::Bulk => handle.read_bulk(self.endpoint_address, &mut self.buffer, timeout)?,
            _ => handle.read_interrupt(self.endpoint_address, &mut self.buffer, timeout)?,
        };

        Ok(self.buffer[..len].to_vec())
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.release_interface(self.interface_number) {
                Ok(()) => debug!("Released interface {}", self.interface_number),
                Err(rusb::Error::NoDevice) => {}
                Err(e) => warn!("Failed to release interface {}: {}", self.interface_number, e),
            }
        }
    }
}

impl Drop for UsbDial {
    fn drop(&mut self) {
        self.release();
    }
}

/// Find the first device with the given vendor/product id
pub fn find_device(vendor_id: u16, product_id: u16) -> Result<Device<GlobalContext>, DeviceError> {
    for device in rusb::devices()?.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() == vendor_id && desc.product_id() == product_id {
            debug!(
                "Found {:04x}:{:04x} on bus {} address {}",
                vendor_id,
                product_id,
                device.bus_number(),
                device.address()
            );
            return Ok(device);
        }
    }

    Err(DeviceError::NotFound {
        vendor_id,
        product_id,
    })
}

/// Find the configuration exposing `interface_number`
///
/// The active configuration is preferred, then every other configuration in order.
pub fn find_interface<T: UsbContext>(
    device: &Device<T>,
    interface_number: u8,
) -> Result<ConfigDescriptor, DeviceError> {
    let has_interface = |config: &ConfigDescriptor| {
        config
            .interfaces()
            .any(|interface| interface.number() == interface_number)
    };

    if let Ok(active) = device.active_config_descriptor() {
        if has_interface(&active) {
            return Ok(active);
        }
    }

    let count = device.device_descriptor()?.num_configurations();
    for index in 0..count {
        if let Ok(config) = device.config_descriptor(index) {
            if has_interface(&config) {
                return Ok(config);
            }
        }
    }

    Err(DeviceError::InterfaceNotFound(interface_number))
}

/// Find the IN endpoint with `endpoint_address` on the given interface
pub fn find_in_endpoint<'a>(
    config: &'a ConfigDescriptor,
    interface_number: u8,
    endpoint_address: u8,
) -> Result<EndpointDescriptor<'a>, DeviceError> {
    config
        .interfaces()
        .filter(|interface| interface.number() == interface_number)
        .flat_map(|interface| interface.descriptors())
        .flat_map(|setting| setting.endpoint_descriptors())
        .find(|endpoint| {
            endpoint.direction() == Direction::In && endpoint.address() == endpoint_address
        })
        .ok_or(DeviceError::EndpointNotFound {
            endpoint: endpoint_address,
            interface: interface_number,
        })
}

/// List every USB device on the bus
pub fn list_devices() -> Result<Vec<UsbDeviceInfo>, DeviceError> {
    let mut devices = Vec::new();
    for device in rusb::devices()?.iter() {
        if let Ok(desc) = device.device_descriptor() {
            devices.push(UsbDeviceInfo {
                bus: device.bus_number(),
                address: device.address(),
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
            });
        }
    }
    Ok(devices)
}

/// List the endpoints of every interface of the first matching device
pub fn list_endpoints(vendor_id: u16, product_id: u16) -> Result<Vec<EndpointInfo>, DeviceError> {
    let device = find_device(vendor_id, product_id)?;
    let config = device
        .active_config_descriptor()
        .or_else(|_| device.config_descriptor(0))?;

    let mut endpoints = Vec::new();
    for interface in config.interfaces() {
        for setting in interface.descriptors() {
            for endpoint in setting.endpoint_descriptors() {
                endpoints.push(EndpointInfo {
                    interface_number: interface.number(),
                    address: endpoint.address(),
                    is_in: endpoint.direction() == Direction::In,
                    transfer_type: endpoint.transfer_type(),
                    max_packet_size: endpoint.max_packet_size(),
                });
            }
        }
    }
    Ok(endpoints)
}
