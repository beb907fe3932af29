//! Shared infrastructure for the fanout server: configuration and logging

pub mod bootstrap;
pub mod config;
pub mod logging;

pub use bootstrap::{load_config, log_config_summary};
pub use config::{Config, LoggingConfig, ServerConfig};
pub use logging::init_logging;
