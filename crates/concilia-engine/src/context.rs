//! Pipeline context: job parameters, memoized config fetchers and the stage
//! reporting seam.

use std::collections::HashMap;

use async_trait::async_trait;
use concilia_config::{Base, ConfigCancelamento, ConfigConciliacao, ConfigEstorno};
use concilia_store::{bases, configs};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::groups::MatcherSettings;

/// Receives stage transitions before each step runs. The worker's
/// implementation writes them to the job row; tests use [`NoopReporter`].
#[async_trait]
pub trait StageReporter: Send + Sync {
    async fn report_stage(&self, step_name: &str, step_index: usize, total_steps: usize);
}

pub struct NoopReporter;

#[async_trait]
impl StageReporter for NoopReporter {
    async fn report_stage(&self, _step_name: &str, _step_index: usize, _total_steps: usize) {}
}

/// Everything a step needs: ids, the shared pool, matcher settings and
/// config lookups that cache after the first fetch.
pub struct PipelineContext {
    pub job_id: i64,
    pub base_contabil_id: i64,
    pub base_fiscal_id: i64,
    pub config_conciliacao_id: i64,
    pub config_estorno_id: Option<i64>,
    pub config_cancelamento_id: Option<i64>,
    pool: SqlitePool,
    settings: MatcherSettings,
    reporter: Box<dyn StageReporter>,
    base_cache: Mutex<HashMap<i64, Base>>,
    conciliacao_cache: Mutex<HashMap<i64, ConfigConciliacao>>,
    estorno_cache: Mutex<HashMap<i64, ConfigEstorno>>,
    cancelamento_cache: Mutex<HashMap<i64, ConfigCancelamento>>,
}

impl PipelineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        job_id: i64,
        base_contabil_id: i64,
        base_fiscal_id: i64,
        config_conciliacao_id: i64,
        config_estorno_id: Option<i64>,
        config_cancelamento_id: Option<i64>,
    ) -> Self {
        Self {
            job_id,
            base_contabil_id,
            base_fiscal_id,
            config_conciliacao_id,
            config_estorno_id,
            config_cancelamento_id,
            pool,
            settings: MatcherSettings::default(),
            reporter: Box::new(NoopReporter),
            base_cache: Mutex::new(HashMap::new()),
            conciliacao_cache: Mutex::new(HashMap::new()),
            estorno_cache: Mutex::new(HashMap::new()),
            cancelamento_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn StageReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_settings(mut self, settings: MatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    pub(crate) async fn report(&self, step_name: &str, step_index: usize, total_steps: usize) {
        self.reporter
            .report_stage(step_name, step_index, total_steps)
            .await;
    }

    pub async fn base(&self, id: i64) -> Result<Base, PipelineError> {
        let mut cache = self.base_cache.lock().await;
        if let Some(base) = cache.get(&id) {
            return Ok(base.clone());
        }
        let base = bases::get(&self.pool, id).await?;
        cache.insert(id, base.clone());
        Ok(base)
    }

    pub async fn config_conciliacao(&self, id: i64) -> Result<ConfigConciliacao, PipelineError> {
        let mut cache = self.conciliacao_cache.lock().await;
        if let Some(config) = cache.get(&id) {
            return Ok(config.clone());
        }
        let config = configs::get_conciliacao(&self.pool, id).await?;
        cache.insert(id, config.clone());
        Ok(config)
    }

    pub async fn config_estorno(&self, id: i64) -> Result<ConfigEstorno, PipelineError> {
        let mut cache = self.estorno_cache.lock().await;
        if let Some(config) = cache.get(&id) {
            return Ok(config.clone());
        }
        let config = configs::get_estorno(&self.pool, id).await?;
        cache.insert(id, config.clone());
        Ok(config)
    }

    pub async fn config_cancelamento(&self, id: i64) -> Result<ConfigCancelamento, PipelineError> {
        let mut cache = self.cancelamento_cache.lock().await;
        if let Some(config) = cache.get(&id) {
            return Ok(config.clone());
        }
        let config = configs::get_cancelamento(&self.pool, id).await?;
        cache.insert(id, config.clone());
        Ok(config)
    }
}
