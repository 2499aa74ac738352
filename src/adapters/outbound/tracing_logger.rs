use crate::domains::logger::{DomainLogger, DynLogger};
use std::sync::Arc;

/// Forwards fleet events to `tracing` so they share the binary's subscriber
/// with the per-thread diagnostics.
struct TracingBridge;

impl DomainLogger for TracingBridge {
    fn info(&self, msg: &str) {
        tracing::info!(target: "gridfleet", "{}", msg);
    }
    fn warn(&self, msg: &str) {
        tracing::warn!(target: "gridfleet", "{}", msg);
    }
    fn error(&self, msg: &str) {
        tracing::error!(target: "gridfleet", "{}", msg);
    }
}

pub fn init_tracing_logger() -> DynLogger {
    Arc::new(TracingBridge)
}
