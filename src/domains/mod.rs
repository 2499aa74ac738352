pub mod agent;
pub mod environment;
pub mod logger;
pub mod path_planning;
pub mod task;

pub use agent::{Agent, AgentHandle, AgentSnapshot, AgentState, TickOutcome};
pub use environment::{CellType, Environment, Grid};
pub use logger::*;
pub use path_planning::{find_path, find_path_on_grid};
pub use task::{PendingQueue, Task, TaskPriority, TaskStatus};
