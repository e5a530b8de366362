//! Pipeline error taxonomy.
//!
//! Column-level trouble inside a step is logged and skipped; anything that
//! reaches this type aborts the step, which aborts the pipeline, which fails
//! the job.

use concilia_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or malformed configuration, incompatible bases, unknown
    /// column names.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required table is absent.
    #[error("schema error: {0} (run migrations)")]
    Schema(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Storage(StoreError::Sqlx(e))
    }
}
