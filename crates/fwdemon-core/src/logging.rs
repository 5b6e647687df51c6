//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Target for lines a device prints into its session log.
///
/// Off by default; enable with
/// `FWDEMON_LOG=info,fwdemon::device_output=debug` to interleave device
/// output with controller events.
pub const DEVICE_OUTPUT_TARGET: &str = "fwdemon::device_output";

/// Filter used when `FWDEMON_LOG` is unset
pub const DEFAULT_FILTER: &str =
    "fwdemon=info,fwdemon_core=info,fwdemon_device=info,fwdemon_app=info,fwdemon::device_output=off,warn";

const LOG_FILE_PREFIX: &str = "fwdemon.log";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/fwdemon/logs/`
/// Log level is controlled by `FWDEMON_LOG` environment variable.
///
/// # Examples
/// ```bash
/// FWDEMON_LOG=debug fwdemon metro_m4_express --unit
/// FWDEMON_LOG=fwdemon_device=trace fwdemon metro_m4_express --unit
/// FWDEMON_LOG=info,fwdemon::device_output=debug fwdemon metro_m4_express
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);

    let env_filter =
        EnvFilter::try_from_env("FWDEMON_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("fwdemon starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("fwdemon").join("logs"))
}

/// Get the log file path for the current day
///
/// The daily appender suffixes the prefix with the UTC date.
pub fn get_current_log_file() -> Result<PathBuf> {
    let dir = get_log_directory()?;
    let today = chrono::Utc::now().format("%Y-%m-%d");
    Ok(dir.join(format!("{}.{}", LOG_FILE_PREFIX, today)))
}
