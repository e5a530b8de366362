//! Pool construction, PRAGMA tuning and identifier helpers.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::error::Result;

/// SQLite tuning knobs, read once at startup.
#[derive(Debug, Clone)]
pub struct SqliteTuning {
    pub journal_mode: String,
    pub synchronous: String,
    pub cache_size: String,
    pub temp_store: String,
    pub busy_timeout_ms: u64,
}

impl Default for SqliteTuning {
    fn default() -> Self {
        Self {
            journal_mode: "WAL".to_string(),
            synchronous: "NORMAL".to_string(),
            cache_size: "-2000".to_string(),
            temp_store: "MEMORY".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteTuning {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            journal_mode: std::env::var("SQLITE_JOURNAL_MODE")
                .unwrap_or(defaults.journal_mode),
            synchronous: std::env::var("SQLITE_SYNCHRONOUS")
                .unwrap_or(defaults.synchronous),
            cache_size: std::env::var("SQLITE_CACHE_SIZE").unwrap_or(defaults.cache_size),
            temp_store: std::env::var("SQLITE_TEMP_STORE").unwrap_or(defaults.temp_store),
            busy_timeout_ms: std::env::var("SQLITE_BUSY_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.busy_timeout_ms),
        }
    }
}

/// Open the database with tuning from the environment.
pub async fn open(database_url: &str) -> Result<SqlitePool> {
    open_with(database_url, &SqliteTuning::from_env()).await
}

/// Open the database with explicit tuning.
///
/// The pool is capped at one connection: every pipeline step, the worker and
/// the repositories share this single writer.
pub async fn open_with(database_url: &str, tuning: &SqliteTuning) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_millis(tuning.busy_timeout_ms))
        .pragma("journal_mode", tuning.journal_mode.clone())
        .pragma("synchronous", tuning.synchronous.clone())
        .pragma("cache_size", tuning.cache_size.clone())
        .pragma("temp_store", tuning.temp_store.clone());

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    info!(
        "Opened {} (journal={}, synchronous={}, busy_timeout={}ms)",
        database_url, tuning.journal_mode, tuning.synchronous, tuning.busy_timeout_ms
    );
    Ok(pool)
}

/// Quote an identifier for interpolation into dynamic SQL.
///
/// Identifiers reaching this function come from configuration rows or PRAGMA
/// introspection, never from free user input; quoting still doubles any
/// embedded quote so a hostile column name cannot escape.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Reduce an identifier to `[a-z0-9_]` for use inside index names.
pub fn sanitize_ident(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("valor"), "\"valor\"");
        assert_eq!(quote_ident("va\"lor"), "\"va\"\"lor\"");
    }

    #[test]
    fn sanitize_ident_lowercases_and_replaces() {
        assert_eq!(sanitize_ident("Num Doc"), "num_doc");
        assert_eq!(sanitize_ident("valor-nf"), "valor_nf");
        assert_eq!(sanitize_ident("CNPJ"), "cnpj");
    }

    #[test]
    fn tuning_defaults() {
        let t = SqliteTuning::default();
        assert_eq!(t.journal_mode, "WAL");
        assert_eq!(t.synchronous, "NORMAL");
        assert_eq!(t.busy_timeout_ms, 5000);
    }

    #[tokio::test]
    async fn open_in_memory() {
        let pool = open_with("sqlite::memory:", &SqliteTuning::default())
            .await
            .unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn open_creates_a_missing_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concilia.db");
        let url = format!("sqlite://{}", path.display());

        let pool = open_with(&url, &SqliteTuning::default()).await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        assert!(path.exists());
    }
}
