//! Data model for bases, reconciliation configs and jobs.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Kind of an ingested base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaseTipo {
    #[serde(rename = "CONTABIL")]
    Contabil,
    #[serde(rename = "FISCAL")]
    Fiscal,
}

impl BaseTipo {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseTipo::Contabil => "CONTABIL",
            BaseTipo::Fiscal => "FISCAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONTABIL" => Some(BaseTipo::Contabil),
            "FISCAL" => Some(BaseTipo::Fiscal),
            _ => None,
        }
    }
}

/// Metadata for one ingested dataset. The physical rows live in the dynamic
/// table named by `tabela_sqlite` (`base_<id>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base {
    pub id: i64,
    pub nome: String,
    pub tipo: BaseTipo,
    pub tabela_sqlite: String,
    #[serde(default)]
    pub subtype: Option<String>,
}

/// An ordered mapping from key identifier (`CHAVE_1`, `CHAVE_2`, …) to the
/// column names composing that key on one side.
///
/// Persisted as JSON text in two accepted wire forms: a bare list of columns
/// (interpreted as `{"CHAVE_1": [...]}`) or the explicit mapping form.
/// Insertion order of the mapping is preserved; the matcher iterates key
/// identifiers in this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeySet(IndexMap<String, Vec<String>>);

#[derive(Deserialize)]
#[serde(untagged)]
enum KeySetWire {
    Lista(Vec<String>),
    Mapa(IndexMap<String, Vec<String>>),
}

impl<'de> Deserialize<'de> for KeySet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = KeySetWire::deserialize(deserializer)?;
        Ok(match wire {
            KeySetWire::Lista(cols) => {
                let mut map = IndexMap::new();
                if !cols.is_empty() {
                    map.insert("CHAVE_1".to_string(), cols);
                }
                KeySet(map)
            }
            KeySetWire::Mapa(map) => KeySet(map),
        })
    }
}

impl KeySet {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Key identifiers in insertion order.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Columns for one key identifier.
    pub fn columns(&self, key_id: &str) -> Option<&[String]> {
        self.0.get(key_id).map(Vec::as_slice)
    }

    /// All distinct columns across every key identifier, in first-seen order.
    pub fn all_columns(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for cols in self.0.values() {
            for col in cols {
                if !seen.contains(col) {
                    seen.push(col.clone());
                }
            }
        }
        seen
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, key_id: impl Into<String>, cols: Vec<String>) {
        self.0.insert(key_id.into(), cols);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// The matching contract between one CONTABIL and one FISCAL base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigConciliacao {
    pub id: i64,
    pub base_contabil_id: i64,
    pub base_fiscal_id: i64,
    pub chaves_contabil: KeySet,
    pub chaves_fiscal: KeySet,
    pub coluna_conciliacao_contabil: String,
    pub coluna_conciliacao_fiscal: String,
    pub inverter_sinal_fiscal: bool,
    pub limite_diferenca_imaterial: f64,
}

impl ConfigConciliacao {
    /// Ordered union of the key identifiers configured on either side.
    pub fn key_identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.chaves_contabil.key_ids().map(str::to_string).collect();
        for id in self.chaves_fiscal.key_ids() {
            if !ids.iter().any(|k| k == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

/// Pair-cancellation (estorno) rule applied to the CONTABIL base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEstorno {
    pub id: i64,
    pub base_id: i64,
    pub coluna_a: String,
    pub coluna_b: String,
    pub coluna_soma: String,
    pub limite_zero: f64,
}

/// Row-exclusion rule applied to the FISCAL base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigCancelamento {
    pub id: i64,
    pub base_id: i64,
    pub coluna_indicador: String,
    pub valor_cancelado: String,
    pub valor_nao_cancelado: String,
}

/// Job lifecycle states. A job never reverts to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "DONE" => Some(JobStatus::Done),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// One reconciliation request as persisted in `jobs_conciliacao`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub nome: Option<String>,
    pub status: JobStatus,
    pub config_conciliacao_id: i64,
    pub config_estorno_id: Option<i64>,
    pub config_cancelamento_id: Option<i64>,
    /// Per-job base overrides; `None` means the config's default base.
    pub base_contabil_id: Option<i64>,
    pub base_fiscal_id: Option<i64>,
    pub pipeline_stage: Option<String>,
    pub pipeline_progress: i64,
    pub pipeline_stage_label: Option<String>,
    pub erro: Option<String>,
    pub arquivo_exportado: Option<String>,
    pub export_status: Option<String>,
    pub export_progress: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Job submission input, as handed over by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub config_conciliacao_id: i64,
    #[serde(default)]
    pub config_estorno_id: Option<i64>,
    #[serde(default)]
    pub config_cancelamento_id: Option<i64>,
    #[serde(default)]
    pub base_contabil_id: Option<i64>,
    #[serde(default)]
    pub base_fiscal_id: Option<i64>,
    #[serde(default)]
    pub nome: Option<String>,
}
