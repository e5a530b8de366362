//! Base metadata and dynamic base-table access.
//!
//! Base data tables are additive-only after ingest; the pipeline reads them
//! and performs bulk UPDATEs for null normalization, nothing else.

use std::collections::HashMap;

use chrono::Utc;
use concilia_config::{Base, BaseTipo};
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Row, Sqlite, SqlitePool};

use crate::db::quote_ident;
use crate::error::{Result, StoreError};
use crate::rows::row_to_map;

/// Rows per INSERT statement for bulk loads.
pub const INSERT_CHUNK: usize = 200;

/// Ids per SELECT ... IN (...) when hydrating row caches.
const ID_CHUNK: usize = 500;

pub async fn get(pool: &SqlitePool, id: i64) -> Result<Base> {
    let row = sqlx::query(
        "SELECT id, nome, tipo, tabela_sqlite, subtype FROM bases WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("base {id}")))?;

    let tipo_text: String = row.get("tipo");
    let tipo = BaseTipo::parse(&tipo_text)
        .ok_or_else(|| StoreError::InvalidConfig(format!("unknown base tipo '{tipo_text}'")))?;
    Ok(Base {
        id: row.get("id"),
        nome: row.get("nome"),
        tipo,
        tabela_sqlite: row.get("tabela_sqlite"),
        subtype: row.get("subtype"),
    })
}

/// Register base metadata. The physical table name is derived from the new id.
pub async fn create(
    pool: &SqlitePool,
    nome: &str,
    tipo: BaseTipo,
    subtype: Option<&str>,
) -> Result<Base> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        "INSERT INTO bases (nome, tipo, tabela_sqlite, subtype, created_at)
         VALUES (?1, ?2, '', ?3, ?4)",
    )
    .bind(nome)
    .bind(tipo.as_str())
    .bind(subtype)
    .bind(&now)
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    let tabela = format!("base_{id}");
    sqlx::query("UPDATE bases SET tabela_sqlite = ?1 WHERE id = ?2")
        .bind(&tabela)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(Base {
        id,
        nome: nome.to_string(),
        tipo,
        tabela_sqlite: tabela,
        subtype: subtype.map(str::to_string),
    })
}

/// Create the physical data table for a base. Columns are `(name, declared
/// type)` pairs discovered at ingest time.
pub async fn create_base_table(
    pool: &SqlitePool,
    table: &str,
    columns: &[(&str, &str)],
) -> Result<()> {
    let mut defs = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    for (name, decl) in columns {
        defs.push(format!("{} {}", quote_ident(name), decl));
    }
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        defs.join(", ")
    );
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => query.bind(s.as_str()),
        other => query.bind(other.to_string()),
    }
}

/// Bulk-insert rows in chunks, one transaction per chunk.
///
/// Each row must carry one value per column, in column order. Returns the
/// number of rows written.
pub async fn bulk_insert(
    pool: &SqlitePool,
    table: &str,
    columns: &[String],
    rows: &[Vec<Value>],
) -> Result<u64> {
    if rows.is_empty() || columns.is_empty() {
        return Ok(0);
    }

    // Keep each statement well under the SQLite bind-parameter ceiling.
    let chunk = INSERT_CHUNK.min(30_000 / columns.len().max(1)).max(1);
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let row_placeholder = format!("({})", vec!["?"; columns.len()].join(", "));

    let mut written = 0u64;
    for batch in rows.chunks(chunk) {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table),
            quoted.join(", "),
            vec![row_placeholder.as_str(); batch.len()].join(", ")
        );
        let mut query = sqlx::query(&sql);
        for row in batch {
            for value in row {
                query = bind_value(query, value);
            }
        }

        let mut tx = pool.begin().await?;
        let result = query.execute(&mut *tx).await?;
        tx.commit().await?;
        written += result.rows_affected();
    }
    Ok(written)
}

/// Every row id of a base table, ascending.
pub async fn all_ids(pool: &SqlitePool, table: &str) -> Result<Vec<i64>> {
    let sql = format!("SELECT id FROM {} ORDER BY id", quote_ident(table));
    let ids = sqlx::query_scalar::<_, i64>(&sql).fetch_all(pool).await?;
    Ok(ids)
}

fn select_list(columns: &[String]) -> String {
    if columns.is_empty() {
        return "*".to_string();
    }
    let mut list = vec!["id".to_string()];
    for col in columns {
        if col != "id" {
            list.push(quote_ident(col));
        }
    }
    list.join(", ")
}

/// Hydrate a row cache for the given ids, selecting `columns` (plus `id`).
/// An empty column list selects everything.
pub async fn fetch_rows_by_ids(
    pool: &SqlitePool,
    table: &str,
    ids: &[i64],
    columns: &[String],
) -> Result<HashMap<i64, Map<String, Value>>> {
    let mut out = HashMap::with_capacity(ids.len());
    for batch in ids.chunks(ID_CHUNK) {
        let placeholders = vec!["?"; batch.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM {} WHERE id IN ({})",
            select_list(columns),
            quote_ident(table),
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in batch {
            query = query.bind(id);
        }
        for row in query.fetch_all(pool).await? {
            let id: i64 = row.get("id");
            out.insert(id, row_to_map(&row)?);
        }
    }
    Ok(out)
}

/// Stream every row of a base table in id order, invoking `f` per row.
pub async fn for_each_row<F>(
    pool: &SqlitePool,
    table: &str,
    columns: &[String],
    mut f: F,
) -> Result<()>
where
    F: FnMut(i64, Map<String, Value>) -> Result<()>,
{
    let sql = format!(
        "SELECT {} FROM {} ORDER BY id",
        select_list(columns),
        quote_ident(table)
    );
    let mut stream = sqlx::query(&sql).fetch(pool);
    while let Some(row) = stream.try_next().await? {
        let id: i64 = row.get("id");
        f(id, row_to_map(&row)?)?;
    }
    Ok(())
}
