//! Configuration loading and management.
//!
//! This module loads the global settings and the collection rule definitions
//! from the `.diagmon/` directory structure.

pub mod error;
pub mod loader;
pub mod models;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use models::AppConfig;
