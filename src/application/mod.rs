pub mod fleet_registry;
pub mod kernel;
pub mod task_scheduler;

pub use fleet_registry::{AgentInfo, AgentRecord, FleetRegistry};
pub use kernel::{FleetKernel, FleetStatistics, WorldState};
pub use task_scheduler::{CostModel, ManhattanCost, TaskScheduler};
