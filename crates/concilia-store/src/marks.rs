//! The shared marks store.
//!
//! Marks carry pre-reconciliation decisions (estorno pairs, cancelled fiscal
//! rows) into the matcher. The table is append-only and shared across jobs;
//! inserts are guarded so re-running a step never duplicates a mark.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::error::Result;

/// A pre-decision attached to one base row.
#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub base_id: i64,
    pub row_id: i64,
    pub status: String,
    pub grupo: String,
    pub chave: Option<String>,
}

/// Insert marks, skipping any (base_id, row_id, grupo) already present.
/// Returns how many were actually written.
pub async fn insert_guarded(pool: &SqlitePool, marks: &[Mark]) -> Result<u64> {
    if marks.is_empty() {
        return Ok(0);
    }
    let now = Utc::now().to_rfc3339();
    let mut written = 0u64;
    let mut tx = pool.begin().await?;
    for mark in marks {
        let result = sqlx::query(
            "INSERT INTO conciliacao_marks (base_id, row_id, status, grupo, chave, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6
             WHERE NOT EXISTS (
                 SELECT 1 FROM conciliacao_marks
                 WHERE base_id = ?1 AND row_id = ?2 AND grupo = ?4
             )",
        )
        .bind(mark.base_id)
        .bind(mark.row_id)
        .bind(&mark.status)
        .bind(&mark.grupo)
        .bind(&mark.chave)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }
    tx.commit().await?;
    Ok(written)
}

/// All marks for one base, ordered by row id.
pub async fn for_base(pool: &SqlitePool, base_id: i64) -> Result<Vec<Mark>> {
    let rows = sqlx::query(
        "SELECT base_id, row_id, status, grupo, chave FROM conciliacao_marks
         WHERE base_id = ?1 ORDER BY row_id, id",
    )
    .bind(base_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| Mark {
            base_id: row.get("base_id"),
            row_id: row.get("row_id"),
            status: row.get("status"),
            grupo: row.get("grupo"),
            chave: row.get("chave"),
        })
        .collect())
}

/// Row ids of one base holding a mark in the given grupo.
pub async fn row_ids_in_grupo(pool: &SqlitePool, base_id: i64, grupo: &str) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT row_id FROM conciliacao_marks
         WHERE base_id = ?1 AND grupo = ?2 ORDER BY row_id",
    )
    .bind(base_id)
    .bind(grupo)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
