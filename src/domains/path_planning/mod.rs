pub mod astar;

pub use astar::{find_path, find_path_on_grid};
