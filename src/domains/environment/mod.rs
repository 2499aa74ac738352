mod environment;
pub mod grid;

pub use environment::Environment;
pub use grid::{CellType, Grid};
