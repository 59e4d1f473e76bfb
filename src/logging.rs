use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "engine.log";

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    /// Directory for the daily rolling log file. `None` logs to stderr only.
    pub file_dir: Option<PathBuf>,
}

impl LogSettings {
    /// `ENABLE_FILE_LOGS=true|1` turns on the file sink under `LOG_DIR` (default `./logs`).
    pub fn from_env(level: impl Into<String>) -> Self {
        let enabled = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| matches!(v.trim(), "true" | "1"))
            .unwrap_or(false);
        let file_dir = enabled.then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs"))
        });
        Self {
            level: level.into(),
            file_dir,
        }
    }

    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Keeps the non-blocking file writer flushing until dropped.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

fn rolling_writer(dir: &Path) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {}: {err}", dir.display());
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}

/// Logs go to stderr so the replay report on stdout stays machine-readable.
pub fn init_tracing(settings: &LogSettings) -> Option<FileLogGuard> {
    let (file_layer, guard) = match settings.file_dir.as_deref().and_then(rolling_writer) {
        Some((writer, guard)) => (
            Some(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    let init = tracing_subscriber::registry()
        .with(settings.filter())
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer)
        .try_init();
    if let Err(err) = init {
        eprintln!("tracing already initialised: {err}");
    }

    guard.map(|g| FileLogGuard { _guard: g })
}
