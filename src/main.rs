//! ChatMix GW
//!
//! Mirrors the ChatMix dial of a USB headset onto per-application volumes.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatmix_gw::audio;
use chatmix_gw::config::{number, AppConfig, ConfigOverrides};
use chatmix_gw::device::UsbDial;
use chatmix_gw::paths;
use chatmix_gw::sniffer;
use chatmix_gw::sync::LifecycleController;

/// ChatMix GW - drive per-app volumes from a headset's ChatMix dial
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or YAML)
    #[arg(short, long, default_value = paths::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable debug level logging (same as --log-level debug)
    #[arg(long)]
    debug: bool,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Also write logs to this file (rotated daily)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Vendor ID of the USB device (decimal or 0x hex)
    #[arg(long, value_parser = number::parse_u16)]
    vendor_id: Option<u16>,

    /// Product ID of the USB device (decimal or 0x hex)
    #[arg(long, value_parser = number::parse_u16)]
    product_id: Option<u16>,

    /// Interface number of the USB device
    #[arg(long, value_parser = number::parse_u8)]
    interface_number: Option<u8>,

    /// Endpoint address of the USB device (decimal or 0x hex)
    #[arg(long, value_parser = number::parse_u8)]
    endpoint_address: Option<u8>,

    /// Voice application names (e.g. Discord.exe)
    #[arg(long, num_args = 1..)]
    voice_apps: Option<Vec<String>>,

    /// Applications excluded from volume control
    #[arg(long, num_args = 1..)]
    exclude_apps: Option<Vec<String>>,

    /// List USB devices and the configured device's endpoints
    #[arg(long)]
    list_devices: bool,

    /// List live audio sessions and how they would be classified
    #[arg(long)]
    list_sessions: bool,

    /// Print raw dial reports without touching any volume
    #[arg(long)]
    sniff: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Human readable lines
    Text,
    /// One JSON object per event
    Json,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            interface_number: self.interface_number,
            endpoint_address: self.endpoint_address,
            voice_apps: self.voice_apps.clone(),
            exclude_apps: self.exclude_apps.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    let level = if args.debug { "debug" } else { args.log_level.as_str() };
    let _log_guard = init_logging(level, args.log_format, args.log_file.as_ref())?;

    info!("Starting ChatMix GW v{}...", env!("CARGO_PKG_VERSION"));

    let config_path = paths::resolve_config_path(&args.config);
    info!("Configuration file: {}", config_path.display());

    let mut config = AppConfig::load_or_default(&config_path).await?;
    config.apply_overrides(&args.overrides());
    config.validate()?;

    info!("Device: {}", config.device_ids());
    info!("Voice apps: {:?}", config.voice_apps);
    info!("Excluded apps: {:?}", config.exclude_apps);

    // Handle diagnostic modes
    if args.list_devices {
        sniffer::list_devices_formatted(&config.device_ids())?;
        return Ok(());
    }

    if args.list_sessions {
        let provider = audio::platform_provider().context("Audio sessions unavailable")?;
        sniffer::list_sessions_formatted(provider.as_ref(), &config.app_names())?;
        return Ok(());
    }

    if args.sniff {
        let settings = config.sync_settings();
        sniffer::run_dial_sniffer(config.device_ids(), settings.read_timeout).await?;
        return Ok(());
    }

    run_app(config, shutdown_signal()).await?;

    info!("ChatMix GW shutdown complete");
    Ok(())
}

async fn run_app(config: AppConfig, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
    let provider = audio::platform_provider().context("Audio sessions unavailable")?;
    info!("Audio session provider ready");

    let ids = config.device_ids();
    let mut controller =
        LifecycleController::launch(|| UsbDial::open(&ids), provider, config.sync_settings())?;

    tokio::pin!(shutdown);

    tokio::select! {
        _ = &mut shutdown => {
            info!("Exiting...");
        }
        _ = controller.wait_for_exit() => {
            warn!("All monitoring loops have exited");
        }
    }

    tokio::task::spawn_blocking(move || controller.stop())
        .await
        .context("Failed to join monitoring loops")?;

    Ok(())
}

fn init_logging(
    level: &str,
    format: LogFormat,
    log_file: Option<&PathBuf>,
) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .context("--log-file must name a file")?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (text_layer, json_layer) = match format {
        LogFormat::Text => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            ),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_names(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
