pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use models::*;
pub use validation::{ConfigValidator, ValidationError};
