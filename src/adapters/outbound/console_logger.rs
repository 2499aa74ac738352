use crate::domains::logger::{DomainLogger, DynLogger};
use std::sync::Arc;

struct ConsoleBridge;

impl DomainLogger for ConsoleBridge {
    fn info(&self, msg: &str) {
        println!("[fleet] {}", msg);
    }
    fn warn(&self, msg: &str) {
        println!("[fleet] WARN: {}", msg);
    }
    fn error(&self, msg: &str) {
        eprintln!("[fleet] ERROR: {}", msg);
    }
}

/// Plain stdout/stderr logger for runs without a tracing subscriber.
pub fn init_console_logger() -> DynLogger {
    Arc::new(ConsoleBridge)
}
