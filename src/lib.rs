pub mod adapters;
pub mod application;
pub mod common;
pub mod config;
pub mod domains;

pub use config::Config;

pub use application::{FleetKernel, FleetRegistry, TaskScheduler};
pub use common::*;
pub use domains::*;
