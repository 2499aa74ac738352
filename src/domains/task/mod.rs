pub mod aggregate;
pub mod queue;

pub use aggregate::{Task, TaskPriority, TaskStatus};
pub use queue::{PendingQueue, QueueEntry};
