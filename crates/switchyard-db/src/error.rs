//! Database error types.

use switchyard_core::BuildStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("cannot finish a build with non-terminal status {0}")]
    InvalidStatus(BuildStatus),

    #[error("build event stream closed")]
    StreamClosed,

    #[error("end of build event stream")]
    EndOfStream,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] switchyard_core::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;
