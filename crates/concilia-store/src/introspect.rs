//! Schema introspection over PRAGMA metadata.

use sqlx::{Row, SqlitePool};

use crate::db::quote_ident;
use crate::error::{Result, StoreError};

/// One column of a dynamic table, as reported by `pragma_table_info`.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
}

impl ColumnInfo {
    /// Whether the declared type carries numeric affinity for the null
    /// normalization step.
    pub fn is_numeric(&self) -> bool {
        let t = self.decl_type.to_ascii_lowercase();
        ["int", "real", "float", "numeric", "decimal", "number"]
            .iter()
            .any(|kind| t.contains(kind))
    }
}

pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1")
            .bind(table)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

/// Columns of a table in declaration order. Errors if the table is absent.
pub async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<ColumnInfo>> {
    if !table_exists(pool, table).await? {
        return Err(StoreError::MissingTable(table.to_string()));
    }
    let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| ColumnInfo {
            name: row.get::<String, _>(0),
            decl_type: row.get::<String, _>(1),
        })
        .collect())
}

pub async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    Ok(table_columns(pool, table)
        .await?
        .iter()
        .any(|c| c.name == column))
}

/// Require a column, surfacing a schema error naming the table.
pub async fn require_column(pool: &SqlitePool, table: &str, column: &str) -> Result<()> {
    if column_exists(pool, table, column).await? {
        Ok(())
    } else {
        Err(StoreError::MissingColumn(
            column.to_string(),
            table.to_string(),
        ))
    }
}

/// Append a nullable TEXT column if it is not already present.
pub async fn add_text_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
) -> Result<()> {
    if !column_exists(pool, table, column).await? {
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT",
            quote_ident(table),
            quote_ident(column)
        );
        sqlx::query(&sql).execute(pool).await?;
    }
    Ok(())
}
