use crate::domains::logger::{DomainLogger, DynLogger};
use chrono::Utc;
use std::sync::Arc;

/// Writes through the `log` facade into the `fast_log` file appender.
struct FileBridge;

impl DomainLogger for FileBridge {
    fn info(&self, msg: &str) {
        log::info!("{} - {}", Utc::now().to_rfc3339(), msg);
    }

    fn warn(&self, msg: &str) {
        log::warn!("{} - {}", Utc::now().to_rfc3339(), msg);
    }

    fn error(&self, msg: &str) {
        log::error!("{} - {}", Utc::now().to_rfc3339(), msg);
    }
}

/// Installs `fast_log` writing to `path` and returns a logger bound to it.
/// `fast_log` owns the global `log` slot, so this can succeed once per process.
pub fn init_file_logger(path: &str) -> Result<DynLogger, String> {
    fast_log::init(
        fast_log::config::Config::new()
            .file(path)
            .level(log::LevelFilter::Info),
    )
    .map_err(|e| format!("Failed to initialize fast_log: {}", e))?;
    Ok(Arc::new(FileBridge))
}
