pub mod config;
pub mod error;
pub mod metric;
pub mod node;
pub mod task;
pub mod tile;
pub mod tuning;

pub use config::RuntimeConfig;
pub use error::*;
pub use metric::*;
pub use node::*;
pub use task::*;
pub use tile::*;
pub use tuning::*;
