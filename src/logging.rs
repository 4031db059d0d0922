use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::error::{SyncError, SyncResult};

/// Logging configuration for blocksync
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: PathBuf,
    pub enable_file_logging: bool,
    pub enable_json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            enable_file_logging: false,
            enable_json_format: false,
        }
    }
}

/// Initialize the logging system.
///
/// When file logging is enabled the returned guard owns the background
/// writer; dropping it flushes pending lines, so keep it alive for the
/// lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> SyncResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("blocksync={},{}", config.level, config.level))
    });

    let registry = Registry::default().with(env_filter);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .boxed();

    let guard = if config.enable_file_logging {
        fs::create_dir_all(&config.log_dir).map_err(|e| {
            SyncError::io(config.log_dir.to_string_lossy().to_string(), e)
        })?;

        let file_appender = rolling::daily(&config.log_dir, "blocksync.log");
        let (file_writer, guard) = non_blocking(file_appender);

        let file_layer = if config.enable_json_format {
            fmt::layer().json().with_writer(file_writer).boxed()
        } else {
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .boxed()
        };

        registry
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| SyncError::General(anyhow::anyhow!(e)))?;
        Some(guard)
    } else {
        registry
            .with(console_layer)
            .try_init()
            .map_err(|e| SyncError::General(anyhow::anyhow!(e)))?;
        None
    };

    info!("Log level: {}", config.level);
    if config.enable_file_logging {
        info!("File logging enabled: {}", config.log_dir.display());
    }

    Ok(guard)
}

/// Measures a unit of work and reports it when dropped.
pub struct PerformanceTimer {
    start: std::time::Instant,
    operation: String,
}

impl PerformanceTimer {
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation: operation.into(),
        }
    }

    pub fn checkpoint(&self, checkpoint: &str) {
        let elapsed = self.start.elapsed();
        debug!(
            "{} - {}: {:.2}ms",
            self.operation,
            checkpoint,
            elapsed.as_secs_f64() * 1000.0
        );
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        debug!("Completed {}: {:.2}ms", self.operation, self.elapsed_ms());
    }
}
