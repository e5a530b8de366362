//! Reconciliation/estorno/cancelamento config repositories.

use concilia_config::{ConfigCancelamento, ConfigConciliacao, ConfigEstorno, KeySet};
use sqlx::{Row, SqlitePool};

use crate::error::{Result, StoreError};

fn parse_keyset(text: &str, column: &str) -> Result<KeySet> {
    KeySet::from_json(text)
        .map_err(|e| StoreError::InvalidConfig(format!("{column}: {e}")))
}

pub async fn get_conciliacao(pool: &SqlitePool, id: i64) -> Result<ConfigConciliacao> {
    let row = sqlx::query(
        "SELECT id, base_contabil_id, base_fiscal_id, chaves_contabil, chaves_fiscal,
                coluna_conciliacao_contabil, coluna_conciliacao_fiscal,
                inverter_sinal_fiscal, limite_diferenca_imaterial
         FROM config_conciliacao WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("config_conciliacao {id}")))?;

    let chaves_contabil: String = row.get("chaves_contabil");
    let chaves_fiscal: String = row.get("chaves_fiscal");
    Ok(ConfigConciliacao {
        id: row.get("id"),
        base_contabil_id: row.get("base_contabil_id"),
        base_fiscal_id: row.get("base_fiscal_id"),
        chaves_contabil: parse_keyset(&chaves_contabil, "chaves_contabil")?,
        chaves_fiscal: parse_keyset(&chaves_fiscal, "chaves_fiscal")?,
        coluna_conciliacao_contabil: row.get("coluna_conciliacao_contabil"),
        coluna_conciliacao_fiscal: row.get("coluna_conciliacao_fiscal"),
        inverter_sinal_fiscal: row.get::<i64, _>("inverter_sinal_fiscal") != 0,
        limite_diferenca_imaterial: row.get("limite_diferenca_imaterial"),
    })
}

pub async fn create_conciliacao(pool: &SqlitePool, config: &ConfigConciliacao) -> Result<i64> {
    let chaves_contabil = serde_json::to_string(&config.chaves_contabil)
        .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
    let chaves_fiscal = serde_json::to_string(&config.chaves_fiscal)
        .map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
    let result = sqlx::query(
        "INSERT INTO config_conciliacao
            (base_contabil_id, base_fiscal_id, chaves_contabil, chaves_fiscal,
             coluna_conciliacao_contabil, coluna_conciliacao_fiscal,
             inverter_sinal_fiscal, limite_diferenca_imaterial)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(config.base_contabil_id)
    .bind(config.base_fiscal_id)
    .bind(&chaves_contabil)
    .bind(&chaves_fiscal)
    .bind(&config.coluna_conciliacao_contabil)
    .bind(&config.coluna_conciliacao_fiscal)
    .bind(config.inverter_sinal_fiscal as i64)
    .bind(config.limite_diferenca_imaterial)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_estorno(pool: &SqlitePool, id: i64) -> Result<ConfigEstorno> {
    let row = sqlx::query(
        "SELECT id, base_id, coluna_a, coluna_b, coluna_soma, limite_zero
         FROM config_estorno WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("config_estorno {id}")))?;

    Ok(ConfigEstorno {
        id: row.get("id"),
        base_id: row.get("base_id"),
        coluna_a: row.get("coluna_a"),
        coluna_b: row.get("coluna_b"),
        coluna_soma: row.get("coluna_soma"),
        limite_zero: row.get("limite_zero"),
    })
}

pub async fn create_estorno(pool: &SqlitePool, config: &ConfigEstorno) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO config_estorno (base_id, coluna_a, coluna_b, coluna_soma, limite_zero)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(config.base_id)
    .bind(&config.coluna_a)
    .bind(&config.coluna_b)
    .bind(&config.coluna_soma)
    .bind(config.limite_zero)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_cancelamento(pool: &SqlitePool, id: i64) -> Result<ConfigCancelamento> {
    let row = sqlx::query(
        "SELECT id, base_id, coluna_indicador, valor_cancelado, valor_nao_cancelado
         FROM config_cancelamento WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| StoreError::NotFound(format!("config_cancelamento {id}")))?;

    Ok(ConfigCancelamento {
        id: row.get("id"),
        base_id: row.get("base_id"),
        coluna_indicador: row.get("coluna_indicador"),
        valor_cancelado: row.get("valor_cancelado"),
        valor_nao_cancelado: row.get("valor_nao_cancelado"),
    })
}

pub async fn create_cancelamento(pool: &SqlitePool, config: &ConfigCancelamento) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO config_cancelamento
            (base_id, coluna_indicador, valor_cancelado, valor_nao_cancelado)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(config.base_id)
    .bind(&config.coluna_indicador)
    .bind(&config.valor_cancelado)
    .bind(&config.valor_nao_cancelado)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}
