use crate::domains::logger::{DomainLogger, DynLogger};
use std::sync::Arc;

/// Fans every message out to a primary logger and an optional secondary one.
pub struct MultiLogger {
    primary: DynLogger,
    secondary: Option<DynLogger>,
}

impl MultiLogger {
    pub fn new(primary: DynLogger, secondary: Option<DynLogger>) -> Self {
        Self { primary, secondary }
    }
}

impl DomainLogger for MultiLogger {
    fn info(&self, msg: &str) {
        self.primary.info(msg);
        if let Some(sec) = &self.secondary {
            sec.info(msg);
        }
    }

    fn warn(&self, msg: &str) {
        self.primary.warn(msg);
        if let Some(sec) = &self.secondary {
            sec.warn(msg);
        }
    }

    fn error(&self, msg: &str) {
        self.primary.error(msg);
        if let Some(sec) = &self.secondary {
            sec.error(msg);
        }
    }
}

/// File logger with tracing as the secondary sink. Falls back to tracing
/// alone when the file cannot be opened.
pub fn init_combined_logger(path: &str) -> DynLogger {
    let tracing_sink = super::init_tracing_logger();
    match super::init_file_logger(path) {
        Ok(file) => Arc::new(MultiLogger::new(file, Some(tracing_sink))),
        Err(e) => {
            tracing::warn!("{}; logging to tracing only", e);
            tracing_sink
        }
    }
}
