//! Null normalization.
//!
//! Rewrites NULL and empty-string cells to `0` (numeric columns) or the
//! textual literal `'NULL'` (text columns) so downstream joins compare
//! stable values. Must run before Estorno-A and the matcher: composite keys
//! join on the literal `'NULL'` for absent values.

use async_trait::async_trait;
use concilia_store::introspect;
use concilia_store::quote_ident;
use tracing::debug;

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::orchestrator::PipelineStep;

/// Columns never touched by normalization.
const PROTECTED: [&str; 3] = ["id", "created_at", "updated_at"];

pub struct NullsStep {
    name: &'static str,
    contabil: bool,
}

impl NullsStep {
    pub fn base_a() -> Self {
        Self {
            name: "NullsBaseA",
            contabil: true,
        }
    }

    pub fn base_b() -> Self {
        Self {
            name: "NullsBaseB",
            contabil: false,
        }
    }
}

fn case_assignments(columns: &[String], replacement: &str) -> String {
    columns
        .iter()
        .map(|col| {
            let quoted = quote_ident(col);
            format!(
                "{quoted} = CASE WHEN {quoted} IS NULL OR {quoted} = '' THEN {replacement} ELSE {quoted} END"
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl PipelineStep for NullsStep {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, ctx: &PipelineContext) -> Result<(), PipelineError> {
        let base_id = if self.contabil {
            ctx.base_contabil_id
        } else {
            ctx.base_fiscal_id
        };
        let base = ctx.base(base_id).await?;
        let columns = introspect::table_columns(ctx.pool(), &base.tabela_sqlite)
            .await
            .map_err(|e| match e {
                concilia_store::StoreError::MissingTable(t) => PipelineError::Schema(t),
                other => PipelineError::Storage(other),
            })?;

        let mut numeric = Vec::new();
        let mut textual = Vec::new();
        for col in columns {
            if PROTECTED.contains(&col.name.as_str()) {
                continue;
            }
            if col.is_numeric() {
                numeric.push(col.name);
            } else {
                textual.push(col.name);
            }
        }

        let table = quote_ident(&base.tabela_sqlite);
        let mut tx = ctx.pool().begin().await?;
        if !numeric.is_empty() {
            let sql = format!("UPDATE {table} SET {}", case_assignments(&numeric, "0"));
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        if !textual.is_empty() {
            let sql = format!("UPDATE {table} SET {}", case_assignments(&textual, "'NULL'"));
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(
            "Normalized {} ({} numeric, {} text columns)",
            base.tabela_sqlite,
            numeric.len(),
            textual.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concilia_config::BaseTipo;
    use concilia_store::{bases, db, schema};
    use serde_json::{json, Value};
    use sqlx::SqlitePool;

    async fn seeded() -> (SqlitePool, i64) {
        let pool = db::open_with("sqlite::memory:", &db::SqliteTuning::default())
            .await
            .unwrap();
        schema::ensure_schema(&pool).await.unwrap();
        let base = bases::create(&pool, "contábil", BaseTipo::Contabil, None)
            .await
            .unwrap();
        bases::create_base_table(
            &pool,
            &base.tabela_sqlite,
            &[("doc", "TEXT"), ("valor", "REAL"), ("qtd", "INTEGER")],
        )
        .await
        .unwrap();
        bases::bulk_insert(
            &pool,
            &base.tabela_sqlite,
            &["doc".to_string(), "valor".to_string(), "qtd".to_string()],
            &[
                vec![json!("NF-1"), json!(10.5), json!(1)],
                vec![Value::Null, Value::Null, Value::Null],
                vec![json!(""), json!(""), json!("")],
            ],
        )
        .await
        .unwrap();
        (pool, base.id)
    }

    async fn fetch(pool: &SqlitePool, base_id: i64) -> Vec<serde_json::Map<String, Value>> {
        let table = format!("base_{base_id}");
        let cache = bases::fetch_rows_by_ids(pool, &table, &[1, 2, 3], &[]).await.unwrap();
        (1..=3).map(|id| cache[&id].clone()).collect()
    }

    #[tokio::test]
    async fn rewrites_nulls_and_empty_strings() {
        let (pool, base_id) = seeded().await;
        let ctx = PipelineContext::new(pool.clone(), 1, base_id, base_id, 1, None, None);
        NullsStep::base_a().run(&ctx).await.unwrap();

        let rows = fetch(&pool, base_id).await;
        // Untouched row keeps its values.
        assert_eq!(rows[0]["doc"], json!("NF-1"));
        assert_eq!(rows[0]["valor"], json!(10.5));
        // NULLs become 0 / 'NULL'. The REAL column stores a float zero.
        assert_eq!(rows[1]["doc"], json!("NULL"));
        assert_eq!(rows[1]["valor"], json!(0.0));
        assert_eq!(rows[1]["qtd"], json!(0));
        // Empty strings too.
        assert_eq!(rows[2]["doc"], json!("NULL"));
        assert_eq!(rows[2]["valor"], json!(0.0));
    }

    #[tokio::test]
    async fn rerun_changes_nothing() {
        let (pool, base_id) = seeded().await;
        let ctx = PipelineContext::new(pool.clone(), 1, base_id, base_id, 1, None, None);
        NullsStep::base_a().run(&ctx).await.unwrap();
        let first = fetch(&pool, base_id).await;
        NullsStep::base_a().run(&ctx).await.unwrap();
        assert_eq!(first, fetch(&pool, base_id).await);
    }

    #[tokio::test]
    async fn id_column_is_protected() {
        let (pool, base_id) = seeded().await;
        let ctx = PipelineContext::new(pool.clone(), 1, base_id, base_id, 1, None, None);
        NullsStep::base_a().run(&ctx).await.unwrap();
        let rows = fetch(&pool, base_id).await;
        assert_eq!(rows[1]["id"], json!(2));
    }

    #[tokio::test]
    async fn missing_base_table_is_schema_error() {
        let pool = db::open_with("sqlite::memory:", &db::SqliteTuning::default())
            .await
            .unwrap();
        schema::ensure_schema(&pool).await.unwrap();
        let base = bases::create(&pool, "sem tabela", BaseTipo::Contabil, None)
            .await
            .unwrap();

        let ctx = PipelineContext::new(pool, 1, base.id, base.id, 1, None, None);
        assert!(matches!(
            NullsStep::base_a().run(&ctx).await.unwrap_err(),
            PipelineError::Schema(_)
        ));
    }
}
