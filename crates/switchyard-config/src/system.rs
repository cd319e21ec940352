//! System configuration parsing.
//!
//! ```kdl
//! database {
//!     url "postgres://switchyard@127.0.0.1/switchyard"
//!     max-connections 10
//!     migrate #true
//! }
//! events {
//!     batch-size 100
//! }
//! logging {
//!     filter "info,switchyard_db=debug"
//!     format "json"
//! }
//! ```
//!
//! Every section and field is optional.

use std::path::Path;

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};

/// System-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub database: DatabaseConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection string. Usually supplied through `DATABASE_URL` instead.
    pub url: Option<String>,
    pub max_connections: u32,
    /// Apply pending migrations on startup.
    pub migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            migrate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Events fetched per round trip by event cursors.
    pub batch_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives, used when `RUST_LOG` is not set.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "database" => parse_database(node, &mut config.database)?,
            "events" => parse_events(node, &mut config.events)?,
            "logging" => parse_logging(node, &mut config.logging)?,
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Load system configuration from a file. A missing file yields defaults.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    match std::fs::read_to_string(path) {
        Ok(text) => parse_system_config(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SystemConfig::default()),
        Err(e) => Err(e.into()),
    }
}

fn parse_database(node: &KdlNode, database: &mut DatabaseConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "url" => {
                database.url = Some(
                    get_first_string_arg(child)
                        .ok_or_else(|| ConfigError::MissingField("database url".to_string()))?,
                );
            }
            "max-connections" => {
                let value = get_first_integer_arg(child, "database max-connections")?;
                database.max_connections = u32::try_from(value)
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid("database max-connections", value))?;
            }
            "migrate" => {
                database.migrate = get_first_bool_arg(child).ok_or_else(|| {
                    ConfigError::InvalidValue {
                        field: "database migrate".to_string(),
                        message: "expected #true or #false".to_string(),
                    }
                })?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_events(node: &KdlNode, events: &mut EventsConfig) -> ConfigResult<()> {
    for child in children(node) {
        if child.name().value() == "batch-size" {
            let value = get_first_integer_arg(child, "events batch-size")?;
            events.batch_size = usize::try_from(value)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("events batch-size", value))?;
        }
    }
    Ok(())
}

fn parse_logging(node: &KdlNode, logging: &mut LoggingConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "filter" => {
                logging.filter = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("logging filter".to_string()))?;
            }
            "format" => {
                let format = get_first_string_arg(child).unwrap_or_default();
                logging.format = match format.as_str() {
                    "pretty" => LogFormat::Pretty,
                    "json" => LogFormat::Json,
                    _ => {
                        return Err(ConfigError::InvalidValue {
                            field: "logging format".to_string(),
                            message: format!("unknown log format: {}", format),
                        });
                    }
                };
            }
            _ => {}
        }
    }
    Ok(())
}

fn invalid(field: &str, value: i128) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("expected a positive number, got {}", value),
    }
}

// Helper functions for extracting values from KDL nodes

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

fn get_first_integer_arg(node: &KdlNode, field: &str) -> ConfigResult<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected an integer".to_string(),
        })
}
