pub mod config;
pub mod executor;
pub mod harvest;
pub mod model;
pub mod traits;

// Re-export common types for convenience
pub use config::{ConfigError, Settings, DEFAULT_CONFIG};
pub use executor::*;
pub use model::*;
pub use traits::*;
