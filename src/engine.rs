//! The query engine facade: config in, shaped result out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::cache::ResultCache;
use crate::catalog::Catalog;
use crate::config::EngineSettings;
use crate::db::{bounded, execute, fetch, CancelSignal, ExecutionContext, QueryStore};
use crate::error::EngineError;
use crate::query::{compile, validate, CompiledPlan, WidgetQueryConfig};
use crate::shape::{shape, ResultTable};

/// Per-call options. The default uses the cache (when the engine has one)
/// and the engine's default timeout.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cache: bool,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelSignal>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cache: true,
            timeout: None,
            cancel: None,
        }
    }
}

pub struct Engine {
    catalog: Arc<Catalog>,
    store: Arc<dyn QueryStore>,
    cache: Option<ResultCache>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn QueryStore>, settings: EngineSettings) -> Self {
        let cache = settings
            .cache_enabled
            .then(|| ResultCache::new(settings.cache_ttl(), settings.cache_capacity));
        Self {
            catalog,
            store,
            cache,
            settings,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate and compile without touching the store.
    pub fn compile(&self, config: &WidgetQueryConfig) -> Result<CompiledPlan, EngineError> {
        let validated = validate(&self.catalog, config, self.settings.max_limit)?;
        let plan = compile(&validated)?;
        debug!(source = plan.source, sql = %plan.sql, "compiled widget config");
        Ok(plan)
    }

    pub async fn compile_and_run(
        &self,
        config: &WidgetQueryConfig,
        options: RunOptions,
    ) -> Result<ResultTable, EngineError> {
        let plan = self.compile(config)?;
        self.run(&plan, options).await
    }

    /// Execute an already compiled plan.
    pub async fn run(
        &self,
        plan: &CompiledPlan,
        options: RunOptions,
    ) -> Result<ResultTable, EngineError> {
        let ctx = ExecutionContext {
            timeout: options
                .timeout
                .unwrap_or_else(|| self.settings.default_timeout()),
            cancel: options.cancel,
        };
        let start = Instant::now();

        // Rows are cached; shaping always uses this caller's plan.
        let rows = match (&self.cache, options.cache) {
            (Some(cache), true) => {
                let fetched = fetch(self.store.as_ref(), plan);
                let cached = bounded(&ctx, plan, cache.get_or_fetch(plan, fetched)).await?;
                cached.rows.clone()
            }
            _ => execute(self.store.as_ref(), plan, &ctx).await?,
        };
        let table = shape(plan, rows)?;

        info!(
            source = plan.source,
            rows = table.row_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query completed"
        );
        Ok(table)
    }

    /// Forget cached results that read `table`; called after writes to it.
    pub async fn invalidate_table(&self, table: &str) -> usize {
        match &self.cache {
            Some(cache) => cache.invalidate_table(table).await,
            None => 0,
        }
    }
}
