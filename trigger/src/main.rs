//! iBackup Trigger - Entry Point
//!
//! Serves `POST /backup`, which runs idevicebackup2 once per day and reports
//! the result to Home Assistant.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use ibackup_trigger::app::options::AppOptions;
use ibackup_trigger::app::run::run;
use ibackup_trigger::clock::SystemClock;
use ibackup_trigger::logs::{init_logging, LogOptions};
use ibackup_trigger::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Print version and exit
    let version = version_info();
    if env::args().skip(1).any(|arg| arg == "--version") {
        println!("{}", serde_json::to_string_pretty(&version)?);
        return Ok(());
    }

    // Configuration errors are fatal before anything else starts
    let options = AppOptions::from_env().context("Invalid configuration")?;

    // Initialize logging
    let log_options = LogOptions {
        log_level: options.log_level,
        log_format: options.log_format,
        log_dir: Some(options.log_dir.clone()),
    };
    let _log_guard = init_logging(log_options).context("Failed to initialize logging")?;

    info!(
        "Running iBackup Trigger {} for device {} (backup path {})",
        version.version,
        options.device_uuid,
        options.backup_path.display()
    );

    if let Err(e) = run(options, Arc::new(SystemClock), await_shutdown_signal()).await {
        error!("Failed to run the backup trigger: {e}");
        return Err(e.into());
    }

    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
