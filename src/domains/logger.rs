use std::sync::Arc;

/// Logging port used by the fleet registry, the task scheduler and the kernel.
/// Calls must never fail or block on I/O from the caller's point of view.
pub trait DomainLogger: Send + Sync + 'static {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}

pub type DynLogger = Arc<dyn DomainLogger>;
