//! Diagnostic modes
//!
//! Helpers for finding the right ids and checking what the dial sends:
//! list USB devices and endpoints, list live audio sessions with the class
//! they would get, and print raw dial reports as they arrive.

use anyhow::{Context, Result};
use colored::*;
use std::time::{Duration, Instant};
use tracing::info;

use crate::audio::{self, AudioSessionProvider};
use crate::device::usb::{list_devices, list_endpoints};
use crate::device::{DeviceError, DeviceIds, DialDevice, UsbDial};
use crate::dial;
use crate::sync::{shutdown_channel, AppClass, AppNameSets, ShutdownSignal};

/// Print every USB device, then the endpoints of the configured one
pub fn list_devices_formatted(ids: &DeviceIds) -> Result<()> {
    println!("\n{}", "=== USB Devices ===".bold().cyan());

    let devices = list_devices().context("Failed to enumerate USB devices")?;
    for device in &devices {
        let line = format!(
            "  Bus {:03} Device {:03}: {:04x}:{:04x}",
            device.bus, device.address, device.vendor_id, device.product_id
        );
        if device.vendor_id == ids.vendor_id && device.product_id == ids.product_id {
            println!("{} {}", line.green().bold(), "<- configured".green());
        } else {
            println!("{}", line);
        }
    }

    println!("\n{} {:04x}:{:04x}", "Endpoints of".bold(), ids.vendor_id, ids.product_id);
    match list_endpoints(ids.vendor_id, ids.product_id) {
        Ok(endpoints) => {
            for ep in endpoints {
                let line = format!(
                    "  interface {} endpoint 0x{:02x} {} {:?} max packet {}",
                    ep.interface_number,
                    ep.address,
                    if ep.is_in { "IN " } else { "OUT" },
                    ep.transfer_type,
                    ep.max_packet_size
                );
                if ep.interface_number == ids.interface_number && ep.address == ids.endpoint_address {
                    println!("{} {}", line.green().bold(), "<- configured".green());
                } else {
                    println!("{}", line);
                }
            }
        }
        Err(e) => println!("  {}", e.to_string().red()),
    }

    Ok(())
}

/// Print live audio sessions and the class each would receive
pub fn list_sessions_formatted(
    provider: &dyn AudioSessionProvider,
    names: &AppNameSets,
) -> Result<()> {
    println!("\n{}", "=== Audio Sessions ===".bold().cyan());

    let sessions = provider
        .list_sessions()
        .context("Failed to list audio sessions")?;
    let apps = audio::instances(&sessions);

    if apps.is_empty() {
        println!("  {}", "No audio sessions".dimmed());
    }
    for app in apps {
        let class = names.class_for(&app.name);
        let label = match class {
            AppClass::Voice => class.to_string().green(),
            AppClass::Excluded => class.to_string().yellow(),
            AppClass::System => class.to_string().normal(),
        };
        println!("  {:<8} {:>7}  {}", label, app.instance_id.0, app.name);
    }

    Ok(())
}

/// One-line description of a raw report
pub fn describe_report(report: &[u8]) -> String {
    let raw = hex::encode(report);
    match dial::decode(report) {
        Some(levels) => format!("{} => {}", raw, levels),
        None => format!("{} => ignored", raw),
    }
}

/// Print raw dial reports until Ctrl+C or disconnect
pub async fn run_dial_sniffer(ids: DeviceIds, read_timeout: Duration) -> Result<()> {
    println!("{}", "=== ChatMix Dial Sniffer ===".bold().cyan());
    println!("Press Ctrl+C to exit\n");

    let device = UsbDial::open(&ids).context("Failed to open ChatMix dial")?;
    println!("{} {}", "Listening on".green(), ids);
    println!("{}", "Format: [time] +elapsed | HEX => LEVELS".dimmed());
    println!("{}\n", "─".repeat(80).dimmed());

    let (trigger, signal) = shutdown_channel();
    let mut reader =
        tokio::task::spawn_blocking(move || sniff_reports(device, signal, read_timeout));

    let count = tokio::select! {
        result = &mut reader => result.context("Sniffer thread failed")?,
        _ = tokio::signal::ctrl_c() => {
            trigger.trigger();
            reader.await.context("Sniffer thread failed")?
        }
    };

    info!("Sniffer captured {} report(s)", count);
    Ok(())
}

fn sniff_reports<D: DialDevice>(
    mut device: D,
    shutdown: ShutdownSignal,
    read_timeout: Duration,
) -> usize {
    let start = Instant::now();
    let mut count = 0;

    while !shutdown.is_triggered() {
        match device.read_report(read_timeout) {
            Ok(report) => {
                count += 1;
                let line = describe_report(&report);
                let line = if line.ends_with("ignored") {
                    line.dimmed()
                } else {
                    line.bright_white()
                };
                println!(
                    "[{}] +{:>8.3}s | {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    start.elapsed().as_secs_f64(),
                    line
                );
            }
            Err(DeviceError::Timeout) => {}
            Err(DeviceError::Disconnected) => {
                println!("{}", "Device disconnected".red());
                break;
            }
            Err(e) => println!("{}", e.to_string().red()),
        }
    }

    device.release();
    count
}
