//! Configuration management for ChatMix GW
//!
//! Handles loading JSON or YAML configuration files and merging command-line
//! overrides. The configuration is read once at startup and never changes
//! while the loops run.

pub mod number;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

use crate::device::{
    DeviceIds, DEFAULT_ENDPOINT_ADDRESS, DEFAULT_INTERFACE_NUMBER, DEFAULT_PRODUCT_ID,
    DEFAULT_VENDOR_ID,
};
use crate::sync::{AppNameSets, SyncSettings};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default = "default_vendor_id", deserialize_with = "number::deserialize")]
    pub vendor_id: u16,
    #[serde(default = "default_product_id", deserialize_with = "number::deserialize")]
    pub product_id: u16,
    #[serde(default = "default_interface_number", deserialize_with = "number::deserialize")]
    pub interface_number: u8,
    #[serde(default = "default_endpoint_address", deserialize_with = "number::deserialize")]
    pub endpoint_address: u8,
    /// Executable names driven by the voice level (e.g., "Discord.exe")
    #[serde(default)]
    pub voice_apps: BTreeSet<String>,
    /// Executable names never touched
    #[serde(default)]
    pub exclude_apps: BTreeSet<String>,
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Loop timing, all in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_session_poll_ms")]
    pub session_poll_ms: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

/// Values given on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub interface_number: Option<u8>,
    pub endpoint_address: Option<u8>,
    pub voice_apps: Option<Vec<String>>,
    pub exclude_apps: Option<Vec<String>>,
}

/// On-disk format, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            interface_number: default_interface_number(),
            endpoint_address: default_endpoint_address(),
            voice_apps: BTreeSet::new(),
            exclude_apps: BTreeSet::new(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            session_poll_ms: default_session_poll_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Parse configuration text
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self> {
        let config = match format {
            ConfigFormat::Json => {
                serde_json::from_str(contents).context("Failed to parse JSON config")?
            }
            ConfigFormat::Yaml => {
                serde_yaml::from_str(contents).context("Failed to parse YAML config")?
            }
        };
        Ok(config)
    }

    /// Load configuration from file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents, ConfigFormat::from_path(path))
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Load configuration, falling back to defaults when the file doesn't exist
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            let config = Self::load(path).await?;
            info!("Configuration loaded from {}", path.display());
            Ok(config)
        } else {
            warn!(
                "Configuration file '{}' not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Apply command-line values on top of the file values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.vendor_id {
            self.vendor_id = v;
        }
        if let Some(v) = overrides.product_id {
            self.product_id = v;
        }
        if let Some(v) = overrides.interface_number {
            self.interface_number = v;
        }
        if let Some(v) = overrides.endpoint_address {
            self.endpoint_address = v;
        }
        if let Some(apps) = &overrides.voice_apps {
            self.voice_apps = apps.iter().cloned().collect();
        }
        if let Some(apps) = &overrides.exclude_apps {
            self.exclude_apps = apps.iter().cloned().collect();
        }
    }

    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;
        if timing.session_poll_ms == 0 {
            bail!("timing.session_poll_ms must be greater than 0");
        }
        if timing.read_timeout_ms == 0 {
            // libusb treats a zero timeout as "block forever"
            bail!("timing.read_timeout_ms must be greater than 0");
        }

        for name in self.voice_apps.intersection(&self.exclude_apps) {
            warn!("'{}' is both a voice app and excluded; voice wins", name);
        }
        Ok(())
    }

    pub fn device_ids(&self) -> DeviceIds {
        DeviceIds {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            interface_number: self.interface_number,
            endpoint_address: self.endpoint_address,
        }
    }

    pub fn app_names(&self) -> AppNameSets {
        AppNameSets {
            voice: self.voice_apps.clone(),
            excluded: self.exclude_apps.clone(),
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            names: self.app_names(),
            session_poll: Duration::from_millis(self.timing.session_poll_ms),
            settle_delay: Duration::from_millis(self.timing.settle_delay_ms),
            read_timeout: Duration::from_millis(self.timing.read_timeout_ms),
        }
    }
}

// Default value functions
fn default_vendor_id() -> u16 { DEFAULT_VENDOR_ID }
fn default_product_id() -> u16 { DEFAULT_PRODUCT_ID }
fn default_interface_number() -> u8 { DEFAULT_INTERFACE_NUMBER }
fn default_endpoint_address() -> u8 { DEFAULT_ENDPOINT_ADDRESS }
fn default_session_poll_ms() -> u64 { 1000 }
fn default_settle_delay_ms() -> u64 { 1000 }
fn default_read_timeout_ms() -> u64 { 100 }
