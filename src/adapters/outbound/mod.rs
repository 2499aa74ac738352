pub mod console_logger;
pub mod file_logger;
pub mod multi_logger;
pub mod noop_logger;
pub mod storage;
pub mod tracing_logger;

pub use console_logger::*;
pub use file_logger::*;
pub use multi_logger::*;
pub use noop_logger::*;
pub use storage::{FileStateStore, SavedState, StateStore, TaskRecord};
pub use tracing_logger::*;
