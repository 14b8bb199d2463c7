use std::path::PathBuf;

use tokio::sync::RwLock;
use tracing::{debug, info, metadata::LevelFilter, Level};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;

/// The file name prefix of log files.
/// Files are rotated daily, so the date is appended.
pub const LOG_FILE_NAME: &str = "gateway.log";

fn do_init(stdout_level: Level, file_level: Option<(Level, PathBuf)>) {
    let mut message = String::from("Logging with: stdout");

    let stdout_layer =
        tracing_subscriber::fmt::layer().with_filter(LevelFilter::from(stdout_level));

    let registry = tracing_subscriber::registry().with(stdout_layer);

    let maybe_file_layer = file_level.map(|(level, output_dir)| {
        message += &format!(", file (in dir {output_dir:?}, at {level})");

        tracing_subscriber::fmt::layer()
            .with_writer(RollingFileAppender::new(
                Rotation::DAILY,
                output_dir,
                LOG_FILE_NAME,
            ))
            .with_ansi(false)
            .with_filter(LevelFilter::from(level))
    });

    // Another subscriber may already be set, e.g. by a test harness.
    if registry.with(maybe_file_layer).try_init().is_err() {
        message += " (a subscriber was already set, kept that one)";
    }

    debug!(message);
}

/// Initialize tracing.
///
/// Will only initialize once, so tests may call this.
pub async fn init(stdout_level: Level, file_logging: Option<(Level, PathBuf)>) {
    static TRACING_IS_INITIALIZED: RwLock<bool> = RwLock::const_new(false);

    let initialized = { *TRACING_IS_INITIALIZED.read().await };

    if !initialized {
        let mut initialized = TRACING_IS_INITIALIZED.write().await;

        // Someone else may have won the race for the write lock.
        if *initialized {
            return;
        }

        do_init(stdout_level, file_logging);

        *initialized = true;
    }

    info!(%stdout_level, "Logging initialized");
}
