//! HID dial device access
//!
//! The sync engine only needs a handle it can read reports from and release.
//! Locating the device, its interface and its IN endpoint happens once at
//! startup; any failure there aborts the process before a loop is started.

pub mod usb;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use usb::UsbDial;

/// Default SteelSeries vendor id
pub const DEFAULT_VENDOR_ID: u16 = 0x1038;
/// Default Arctis product id
pub const DEFAULT_PRODUCT_ID: u16 = 0x2202;
/// Default interface carrying the ChatMix reports
pub const DEFAULT_INTERFACE_NUMBER: u8 = 5;
/// Default interrupt IN endpoint carrying the ChatMix reports
pub const DEFAULT_ENDPOINT_ADDRESS: u8 = 0x86;

/// Identifies the dial on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIds {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface_number: u8,
    pub endpoint_address: u8,
}

impl Default for DeviceIds {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            interface_number: DEFAULT_INTERFACE_NUMBER,
            endpoint_address: DEFAULT_ENDPOINT_ADDRESS,
        }
    }
}

impl fmt::Display for DeviceIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} interface {} endpoint 0x{:02x}",
            self.vendor_id, self.product_id, self.interface_number, self.endpoint_address
        )
    }
}

/// Errors raised while opening or reading the dial
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {vendor_id:04x}:{product_id:04x} not found")]
    NotFound { vendor_id: u16, product_id: u16 },

    #[error("couldn't find interface {0}")]
    InterfaceNotFound(u8),

    #[error("couldn't find IN endpoint 0x{endpoint:02x} on interface {interface}")]
    EndpointNotFound { endpoint: u8, interface: u8 },

    /// No report within the read timeout; the steady state of an idle dial
    #[error("read timed out")]
    Timeout,

    #[error("device disconnected")]
    Disconnected,

    #[error("USB error: {0}")]
    Usb(rusb::Error),
}

impl From<rusb::Error> for DeviceError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => DeviceError::Timeout,
            rusb::Error::NoDevice => DeviceError::Disconnected,
            other => DeviceError::Usb(other),
        }
    }
}

/// An opened dial the poll loop reads reports from
///
/// Owned exclusively by the dial poll loop.
pub trait DialDevice: Send {
    /// Read one report, waiting at most `timeout`
    fn read_report(&mut self, timeout: Duration) -> Result<Vec<u8>, DeviceError>;

    /// Release the claimed interface. Must be safe to call more than once.
    fn release(&mut self);
}
