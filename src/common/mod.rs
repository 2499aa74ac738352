pub mod error;
pub mod sync;
pub mod types;

pub use error::*;
pub use types::*;
