pub mod environment;
pub mod error;
pub mod stats;

pub use environment::Environment;
pub use error::{Error, Result};
pub use stats::AdminStats;
