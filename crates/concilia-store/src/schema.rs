//! Schema bootstrap.
//!
//! One explicit migration: every fixed table is created with its full column
//! set up front, so runtime writes are plain UPDATEs with no reflection.
//! Dynamic tables (`base_<id>`, `conciliacao_result_<jobId>`) are created by
//! their owning modules.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::Result;

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS bases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        nome TEXT NOT NULL,
        tipo TEXT NOT NULL,
        tabela_sqlite TEXT NOT NULL DEFAULT '',
        subtype TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS config_conciliacao (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        base_contabil_id INTEGER NOT NULL,
        base_fiscal_id INTEGER NOT NULL,
        chaves_contabil TEXT NOT NULL,
        chaves_fiscal TEXT NOT NULL,
        coluna_conciliacao_contabil TEXT NOT NULL,
        coluna_conciliacao_fiscal TEXT NOT NULL,
        inverter_sinal_fiscal INTEGER NOT NULL DEFAULT 0,
        limite_diferenca_imaterial REAL NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS config_estorno (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        base_id INTEGER NOT NULL,
        coluna_a TEXT NOT NULL,
        coluna_b TEXT NOT NULL,
        coluna_soma TEXT NOT NULL,
        limite_zero REAL NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS config_cancelamento (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        base_id INTEGER NOT NULL,
        coluna_indicador TEXT NOT NULL,
        valor_cancelado TEXT NOT NULL,
        valor_nao_cancelado TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS jobs_conciliacao (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        nome TEXT,
        status TEXT NOT NULL DEFAULT 'PENDING',
        config_conciliacao_id INTEGER NOT NULL,
        config_estorno_id INTEGER,
        config_cancelamento_id INTEGER,
        base_contabil_id INTEGER,
        base_fiscal_id INTEGER,
        pipeline_stage TEXT,
        pipeline_progress INTEGER NOT NULL DEFAULT 0,
        pipeline_stage_label TEXT,
        erro TEXT,
        arquivo_exportado TEXT,
        export_status TEXT,
        export_progress INTEGER NOT NULL DEFAULT 0,
        config_estorno_nome TEXT,
        config_cancelamento_nome TEXT,
        config_mapeamento_id INTEGER,
        config_mapeamento_nome TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_conciliacao_status
        ON jobs_conciliacao (status, created_at)",
    "CREATE TABLE IF NOT EXISTS conciliacao_marks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        base_id INTEGER NOT NULL,
        row_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        grupo TEXT NOT NULL,
        chave TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_conciliacao_marks_unique
        ON conciliacao_marks (base_id, row_id, grupo)",
];

/// Create every fixed table and index. Safe to call on every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for statement in DDL {
        sqlx::query(statement).execute(pool).await?;
    }
    debug!("Schema bootstrap complete ({} statements)", DDL.len());
    Ok(())
}
