//! Typed errors for the storage layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A required table is absent. The hint matters: this is what operators
    /// see when the schema bootstrap never ran.
    #[error("missing table '{0}' (run migrations)")]
    MissingTable(String),

    #[error("missing column '{0}' in table '{1}'")]
    MissingColumn(String, String),

    /// Persisted JSON (key sets, snapshots) failed to decode.
    #[error("invalid persisted config: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
