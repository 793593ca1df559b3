//! Gpufan Daemon (gpufand)
//!
//! Runs the GPU fan curve until SIGINT/SIGTERM, then leaves the fans at a
//! resting speed derived from the last temperature.
//!
//! # Modes
//! - default: control fans with the configured curve
//! - `--status`: print a JSON snapshot and exit, no actuation
//! - `--export-preset NAME FILE`: write a preset curve file and exit
//!
//! # Logging
//! - systemd journal when its socket exists, stdout otherwise
//! - level from `GPUFAN_LOG` (trace, debug, info, warn, error)

mod cli;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use gf_core::{load_settings_from, save_curve, save_settings_to, AppSettings, GpuController};

use cli::Cli;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often a one-line status summary is logged while running
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

// ============================================================================
// Logging
// ============================================================================

/// Returns true when logging to the journal
fn init_logging() -> bool {
    let log_level = std::env::var("GPUFAN_LOG").unwrap_or_else(|_| "info".to_string());

    if std::path::Path::new(JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

// ============================================================================
// Settings
// ============================================================================

fn resolve_settings(cli: &Cli) -> anyhow::Result<(AppSettings, std::path::PathBuf)> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => gf_core::get_settings_path()?,
    };
    let mut settings = load_settings_from(&path)
        .with_context(|| format!("loading settings from {}", path.display()))?;

    cli.apply_overrides(&mut settings);
    settings.validate().context("invalid settings")?;
    Ok((settings, path))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Panics on the monitor task are contained by tokio; make sure they are visible
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));

    let cli = Cli::parse();
    let use_journald = init_logging();

    // Preset export needs neither settings nor hardware
    if let Some((preset, path)) = cli.export_request()? {
        save_curve(&path, &preset.to_curve())
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {} preset to {}", preset, path.display());
        return Ok(());
    }

    let (settings, settings_path) = resolve_settings(&cli)?;
    if cli.save_settings {
        save_settings_to(&settings_path, &settings)?;
        info!(path = %settings_path.display(), "Settings saved");
    }

    let device = gf_gpu::open_device(settings.general.backend, settings.general.gpu_index)
        .context("opening GPU")?;
    let controller = Arc::new(GpuController::from_settings(device, &settings));

    if cli.status {
        controller.monitor().sample();
        println!("{}", serde_json::to_string_pretty(&controller.snapshot())?);
        return Ok(());
    }

    info!("STARTUP: gpufand {} starting", VERSION);
    info!("STARTUP: Device: {}", controller.device_name());
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });
    info!(
        "STARTUP: Poll interval {}ms, temperature limit {}°C",
        settings.general.poll_interval_ms, settings.limit.temp_limit
    );

    // Signal handler only wakes the main task; the monitor owns shutdown
    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        signal.notify_one();
    }) {
        warn!(
            "Failed to set signal handler: {}. Shutdown via signals may not work cleanly.",
            e
        );
    }

    controller.start().await?;

    // An explicit limit on the command line is enforced right away
    if let Some(limit) = cli.temp_limit {
        match controller.set_temp_limit(limit) {
            Ok(outcome) => debug!(decision = ?outcome.decision, "Initial limit check"),
            Err(e) => error!(error = %e, "Failed to apply temperature limit"),
        }
    }

    let mut status = tokio::time::interval(STATUS_LOG_INTERVAL);
    status.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
                break;
            }
            _ = status.tick() => {
                let snapshot = controller.snapshot();
                info!(
                    temp = ?snapshot.temperature,
                    fan = ?snapshot.fan_speed,
                    target = ?snapshot.curve_target,
                    failed_writes = snapshot.failed_writes,
                    "STATUS"
                );
            }
        }
    }

    match controller.stop().await {
        Some(speed) => info!("SHUTDOWN: Fans left at {}%", speed),
        None => warn!("SHUTDOWN: Resting fan speed could not be confirmed"),
    }
    info!("SHUTDOWN: Daemon terminated gracefully");
    Ok(())
}
