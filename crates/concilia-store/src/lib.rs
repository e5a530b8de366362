//! SQLite storage layer for Concilia.
//!
//! One writer, one pool: the engine, the worker and the repositories all go
//! through a single-connection [`sqlx::SqlitePool`] opened by [`db::open`].
//! Dynamic tables (`base_<id>`, `conciliacao_result_<jobId>`) are driven by
//! identifier-quoted SQL built from configuration and PRAGMA introspection,
//! never from free user input.

pub mod advisor;
pub mod bases;
pub mod configs;
pub mod db;
pub mod error;
pub mod introspect;
pub mod jobs;
pub mod marks;
pub mod results;
pub mod rows;
pub mod schema;

pub use db::{open, quote_ident, sanitize_ident, SqliteTuning};
pub use error::{Result, StoreError};
pub use marks::Mark;
pub use results::ResultEntry;
