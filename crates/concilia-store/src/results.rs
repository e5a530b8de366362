//! Per-job result tables.
//!
//! Each job materializes into its own `conciliacao_result_<jobId>` table:
//! fixed columns plus one nullable TEXT column per configured key identifier.
//! Dropping the table and re-running the job is the supported recovery path.

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use sqlx::SqlitePool;

use crate::db::quote_ident;
use crate::error::Result;
use crate::introspect::{add_text_column_if_missing, table_exists};
use crate::rows::row_to_map;

/// Result rows per transaction when materializing a job.
const RESULT_CHUNK: usize = 200;

/// One result row before it is written.
#[derive(Debug, Clone)]
pub struct ResultEntry {
    /// Key identifier this row matched under (`CHAVE_1`, …), if any.
    pub chave: Option<String>,
    pub status: String,
    pub grupo: String,
    pub a_row_id: Option<i64>,
    pub b_row_id: Option<i64>,
    /// JSON snapshot of the source row's id, key columns and amount column.
    pub a_values: Option<Value>,
    pub b_values: Option<Value>,
    /// Group-level sums; identical across every row of a reconciled group.
    pub value_a: f64,
    pub value_b: f64,
    pub difference: f64,
    /// Composite key value per key identifier, keyed by identifier.
    pub key_values: IndexMap<String, String>,
}

pub fn result_table_name(job_id: i64) -> String {
    format!("conciliacao_result_{job_id}")
}

/// Create the result table if absent and add any missing key-identifier
/// columns. Safe to call repeatedly.
pub async fn ensure_result_table(
    pool: &SqlitePool,
    job_id: i64,
    key_ids: &[String],
) -> Result<()> {
    let table = result_table_name(job_id);
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id INTEGER NOT NULL,
            chave TEXT,
            status TEXT NOT NULL,
            grupo TEXT NOT NULL,
            a_row_id INTEGER,
            b_row_id INTEGER,
            a_values TEXT,
            b_values TEXT,
            value_a REAL NOT NULL DEFAULT 0,
            value_b REAL NOT NULL DEFAULT 0,
            difference REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        quote_ident(&table)
    );
    sqlx::query(&sql).execute(pool).await?;

    for key_id in key_ids {
        add_text_column_if_missing(pool, &table, key_id).await?;
    }
    Ok(())
}

/// Append result entries in chunks, one transaction per chunk.
pub async fn insert_entries(
    pool: &SqlitePool,
    job_id: i64,
    key_ids: &[String],
    entries: &[ResultEntry],
) -> Result<u64> {
    if entries.is_empty() {
        return Ok(0);
    }
    let table = result_table_name(job_id);
    let mut columns = vec![
        "job_id", "chave", "status", "grupo", "a_row_id", "b_row_id", "a_values", "b_values",
        "value_a", "value_b", "difference", "created_at",
    ]
    .iter()
    .map(|c| quote_ident(c))
    .collect::<Vec<_>>();
    for key_id in key_ids {
        columns.push(quote_ident(key_id));
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&table),
        columns.join(", "),
        placeholders
    );

    let now = Utc::now().to_rfc3339();
    let mut written = 0u64;
    for batch in entries.chunks(RESULT_CHUNK) {
        let mut tx = pool.begin().await?;
        for entry in batch {
            let a_values = entry.a_values.as_ref().map(|v| v.to_string());
            let b_values = entry.b_values.as_ref().map(|v| v.to_string());
            let mut query = sqlx::query(&sql)
                .bind(job_id)
                .bind(&entry.chave)
                .bind(&entry.status)
                .bind(&entry.grupo)
                .bind(entry.a_row_id)
                .bind(entry.b_row_id)
                .bind(a_values)
                .bind(b_values)
                .bind(entry.value_a)
                .bind(entry.value_b)
                .bind(entry.difference)
                .bind(&now);
            for key_id in key_ids {
                query = query.bind(entry.key_values.get(key_id).cloned());
            }
            let result = query.execute(&mut *tx).await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
    }
    Ok(written)
}

/// Every result row of a job as a JSON map, ordered by insertion.
pub async fn fetch_rows(pool: &SqlitePool, job_id: i64) -> Result<Vec<Map<String, Value>>> {
    let table = result_table_name(job_id);
    let sql = format!("SELECT * FROM {} ORDER BY id", quote_ident(&table));
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter().map(row_to_map).collect()
}

pub async fn count(pool: &SqlitePool, job_id: i64) -> Result<i64> {
    let table = result_table_name(job_id);
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&table));
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await?;
    Ok(count)
}

/// Drop a job's result table (recovery before a re-run).
pub async fn drop_result_table(pool: &SqlitePool, job_id: i64) -> Result<()> {
    let table = result_table_name(job_id);
    let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(&table));
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

pub async fn exists(pool: &SqlitePool, job_id: i64) -> Result<bool> {
    table_exists(pool, &result_table_name(job_id)).await
}
