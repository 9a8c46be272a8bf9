//! Short-lived memo of executed plans, backed by a moka cache.
//!
//! Entries hold the raw rows of a plan, keyed by [`CompiledPlan::cache_key`].
//! Shaping happens per caller, so two widgets that differ only in how they
//! draw the same rows share one entry. Concurrent misses on one key share a
//! single execution; failures are handed to every waiter and never stored.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::db::CellValue;
use crate::error::ExecutionError;
use crate::query::CompiledPlan;

/// Rows of one executed plan plus the tables it read.
#[derive(Debug)]
pub struct CachedRows {
    pub rows: Vec<Vec<CellValue>>,
    tables: Vec<&'static str>,
}

impl CachedRows {
    fn reads(&self, table: &str) -> bool {
        self.tables.iter().any(|t| *t == table)
    }
}

pub struct ResultCache {
    cache: Cache<String, Arc<CachedRows>>,
}

impl ResultCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity.max(1) as u64)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Number of live entries, after pending evictions are applied.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    /// Return the cached rows for `plan`, or await `fetch` once for every
    /// concurrent caller asking for the same plan.
    ///
    /// If the caller driving `fetch` gives up, the next waiter runs it.
    pub async fn get_or_fetch<Fut>(
        &self,
        plan: &CompiledPlan,
        fetch: Fut,
    ) -> Result<Arc<CachedRows>, ExecutionError>
    where
        Fut: Future<Output = Result<Vec<Vec<CellValue>>, ExecutionError>>,
    {
        let key = plan.cache_key();
        let tables = plan.tables.clone();
        let entry = self
            .cache
            .entry(key)
            .or_try_insert_with(async move {
                let rows = fetch.await?;
                Ok::<_, ExecutionError>(Arc::new(CachedRows { rows, tables }))
            })
            .await
            .map_err(|e| ExecutionError::clone(&e))?;

        if !entry.is_fresh() {
            debug!(source = plan.source, key = %&entry.key()[..12], "cache hit");
        }
        Ok(entry.into_value())
    }

    /// Drop every entry whose plan reads `table`. Returns how many were dropped.
    pub async fn invalidate_table(&self, table: &str) -> usize {
        let stale: Vec<Arc<String>> = self
            .cache
            .iter()
            .filter(|(_, cached)| cached.reads(table))
            .map(|(key, _)| key)
            .collect();
        for key in &stale {
            self.cache.invalidate(key.as_str()).await;
        }
        debug!(table, dropped = stale.len(), "cache invalidated");
        stale.len()
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }
}
