//! KDL configuration parsing for Switchyard.
//!
//! Covers the system configuration: database connection, event streaming
//! and logging.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    DatabaseConfig, EventsConfig, LogFormat, LoggingConfig, SystemConfig, load_system_config,
    parse_system_config,
};
