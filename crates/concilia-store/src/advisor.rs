//! Index advisor.
//!
//! Creates secondary indexes on every base-data column an active config
//! touches. Index names are deterministic, creation is idempotent, and a
//! failure on one column never aborts the rest.

use concilia_config::{Base, ConfigCancelamento, ConfigConciliacao, ConfigEstorno};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::{quote_ident, sanitize_ident};
use crate::error::Result;

fn index_name(base_id: i64, column: &str) -> String {
    format!("idx_base_{}_{}", base_id, sanitize_ident(column))
}

async fn create_index(pool: &SqlitePool, base: &Base, column: &str) {
    let sql = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&index_name(base.id, column)),
        quote_ident(&base.tabela_sqlite),
        quote_ident(column)
    );
    match sqlx::query(&sql).execute(pool).await {
        Ok(_) => debug!("Ensured index on {}.{}", base.tabela_sqlite, column),
        Err(e) => warn!(
            "Skipping index on {}.{}: {}",
            base.tabela_sqlite, column, e
        ),
    }
}

/// Index every key column and the amount column of both sides.
pub async fn ensure_conciliacao_indexes(
    pool: &SqlitePool,
    base_contabil: &Base,
    base_fiscal: &Base,
    config: &ConfigConciliacao,
) -> Result<()> {
    let mut contabil_cols = config.chaves_contabil.all_columns();
    if !contabil_cols.contains(&config.coluna_conciliacao_contabil) {
        contabil_cols.push(config.coluna_conciliacao_contabil.clone());
    }
    for col in &contabil_cols {
        create_index(pool, base_contabil, col).await;
    }

    let mut fiscal_cols = config.chaves_fiscal.all_columns();
    if !fiscal_cols.contains(&config.coluna_conciliacao_fiscal) {
        fiscal_cols.push(config.coluna_conciliacao_fiscal.clone());
    }
    for col in &fiscal_cols {
        create_index(pool, base_fiscal, col).await;
    }
    Ok(())
}

pub async fn ensure_estorno_indexes(
    pool: &SqlitePool,
    base: &Base,
    config: &ConfigEstorno,
) -> Result<()> {
    create_index(pool, base, &config.coluna_a).await;
    if config.coluna_b != config.coluna_a {
        create_index(pool, base, &config.coluna_b).await;
    }
    Ok(())
}

pub async fn ensure_cancelamento_indexes(
    pool: &SqlitePool,
    base: &Base,
    config: &ConfigCancelamento,
) -> Result<()> {
    create_index(pool, base, &config.coluna_indicador).await;
    Ok(())
}

/// Refresh planner statistics. Best-effort.
pub async fn analyze(pool: &SqlitePool) {
    if let Err(e) = sqlx::query("ANALYZE").execute(pool).await {
        warn!("ANALYZE failed: {}", e);
    }
}
