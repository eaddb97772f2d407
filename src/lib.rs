//! ChatMix GW
//!
//! Reads the ChatMix dial of a USB headset and mirrors its two levels onto the
//! per-application volumes of the host: voice apps follow the voice level,
//! excluded apps are left alone, everything else follows the system level.

pub mod audio;
pub mod config;
pub mod device;
pub mod dial;
pub mod paths;
pub mod sniffer;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;
