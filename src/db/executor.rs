use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolError};
use postgres_native_tls::MakeTlsConnector;
use tokio::sync::watch;
use tokio_postgres::types::ToSql;
use tokio_postgres::{CancelToken, NoTls};
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::query::{CompiledPlan, ParamValue};

use super::error::{classify, StructuredError};
use super::value::{row_values, CellValue};

/// Anything that can run a compiled plan and hand back raw rows.
///
/// Implementations must not retry and should stop promptly when the returned
/// future is dropped.
#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn query(&self, plan: &CompiledPlan) -> Result<Vec<Vec<CellValue>>, ExecutionError>;
}

/// Caller side of a cancellation signal.
#[derive(Debug)]
pub struct Canceller(watch::Sender<bool>);

impl Canceller {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Observed by the executor; resolves once the paired [`Canceller`] fires.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Canceller dropped without firing
            std::future::pending::<()>().await;
        }
    }
}

pub fn cancel_pair() -> (Canceller, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (Canceller(tx), CancelSignal(rx))
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub timeout: Duration,
    pub cancel: Option<CancelSignal>,
}

/// Run `plan` once against `store`, bounded by the context's deadline and
/// cancellation signal.
pub async fn execute(
    store: &dyn QueryStore,
    plan: &CompiledPlan,
    ctx: &ExecutionContext,
) -> Result<Vec<Vec<CellValue>>, ExecutionError> {
    bounded(ctx, plan, fetch(store, plan)).await
}

/// Query `store` for `plan` and enforce the plan's row cap. No deadline.
pub async fn fetch(
    store: &dyn QueryStore,
    plan: &CompiledPlan,
) -> Result<Vec<Vec<CellValue>>, ExecutionError> {
    debug!(source = plan.source, sql = %plan.sql, params = plan.params.len(), "executing plan");
    let rows = store.query(plan).await?;
    if rows.len() > plan.limit as usize {
        let fault = StructuredError::from_string(format!(
            "store returned {} rows for a plan limited to {}",
            rows.len(),
            plan.limit
        ));
        warn!(source = plan.source, error = %fault, "row cap exceeded");
        return Err(ExecutionError::StoreFault(fault));
    }
    Ok(rows)
}

/// Await `work` under the caller's deadline and cancellation signal.
///
/// `work` is dropped when either fires, so a wait on someone else's execution
/// ends without disturbing it.
pub async fn bounded<T, F>(
    ctx: &ExecutionContext,
    plan: &CompiledPlan,
    work: F,
) -> Result<T, ExecutionError>
where
    F: Future<Output = Result<T, ExecutionError>>,
{
    let start = Instant::now();
    let run = tokio::time::timeout(ctx.timeout, work);
    let outcome = match &ctx.cancel {
        Some(signal) => {
            tokio::select! {
                biased;
                _ = signal.cancelled() => Err(ExecutionError::Cancelled),
                result = run => result.unwrap_or(Err(ExecutionError::Timeout(ctx.timeout))),
            }
        }
        None => run
            .await
            .unwrap_or(Err(ExecutionError::Timeout(ctx.timeout))),
    };

    if let Err(e) = &outcome {
        match e {
            ExecutionError::StoreFault(fault) => warn!(
                source = plan.source,
                sql = %plan.sql,
                error = %fault.display_full(),
                "store rejected compiled query"
            ),
            ExecutionError::Cancelled => debug!(source = plan.source, "query cancelled"),
            other => warn!(
                source = plan.source,
                elapsed_ms = start.elapsed().as_millis() as u64,
                error = %other,
                "query failed"
            ),
        }
    }
    outcome
}

/// PostgreSQL-backed store over a deadpool connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    tls: Option<MakeTlsConnector>,
}

impl PgStore {
    pub fn new(pool: Pool, tls: Option<MakeTlsConnector>) -> Self {
        Self { pool, tls }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl QueryStore for PgStore {
    async fn query(&self, plan: &CompiledPlan) -> Result<Vec<Vec<CellValue>>, ExecutionError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let guard = CancelOnDrop::new(client.cancel_token(), self.tls.clone());

        let statement = client
            .prepare_cached(&plan.sql)
            .await
            .map_err(|e| classify(&e, &plan.sql))?;
        let params: Vec<&(dyn ToSql + Sync)> = plan.params.iter().map(ParamValue::as_sql).collect();
        let rows = client
            .query(&statement, &params)
            .await
            .map_err(|e| classify(&e, &plan.sql))?;

        guard.disarm();
        rows.iter().map(row_values).collect()
    }
}

fn pool_error(err: PoolError) -> ExecutionError {
    match err {
        PoolError::Timeout(kind) => {
            ExecutionError::Unavailable(format!("timed out waiting for a connection ({:?})", kind))
        }
        PoolError::Backend(e) => ExecutionError::Unavailable(format!("connection failed: {}", e)),
        other => ExecutionError::Unavailable(other.to_string()),
    }
}

/// Sends a server-side cancel request if the query future is dropped before
/// it completes. The pooled connection itself is returned by its own drop.
struct CancelOnDrop {
    token: Option<CancelToken>,
    tls: Option<MakeTlsConnector>,
}

impl CancelOnDrop {
    fn new(token: CancelToken, tls: Option<MakeTlsConnector>) -> Self {
        Self {
            token: Some(token),
            tls,
        }
    }

    fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let tls = self.tls.take();
        handle.spawn(async move {
            let result = match tls {
                Some(tls) => token.cancel_query(tls).await,
                None => token.cancel_query(NoTls).await,
            };
            match result {
                Ok(()) => debug!("sent cancel request for abandoned query"),
                Err(e) => warn!(error = %e, "failed to cancel abandoned query"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{SelectQuery, TableRef};
    use crate::query::Visualization;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SlowStore {
        delay: Duration,
        rows: usize,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QueryStore for SlowStore {
        async fn query(&self, _plan: &CompiledPlan) -> Result<Vec<Vec<CellValue>>, ExecutionError> {
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(vec![vec![CellValue::Int(1)]; self.rows])
        }
    }

    fn store(delay_ms: u64, rows: usize) -> SlowStore {
        SlowStore {
            delay: Duration::from_millis(delay_ms),
            rows,
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn plan(limit: u32) -> CompiledPlan {
        CompiledPlan::new(
            "orders",
            SelectQuery {
                from: Some(TableRef::named("orders")),
                limit: Some(limit),
                ..Default::default()
            },
            vec![],
            vec![],
            vec!["orders"],
            Visualization::Table,
        )
    }

    fn ctx(timeout_ms: u64, cancel: Option<CancelSignal>) -> ExecutionContext {
        ExecutionContext {
            timeout: Duration::from_millis(timeout_ms),
            cancel,
        }
    }

    #[tokio::test]
    async fn test_execute_returns_rows() {
        let rows = execute(&store(0, 3), &plan(10), &ctx(1000, None))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let slow = store(10_000, 1);
        let finished = slow.finished.clone();
        let err = execute(&slow, &plan(10), &ctx(50, None)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(d) if d == Duration::from_millis(50)));
        assert!(err.is_retryable());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execute_cancelled() {
        let (canceller, signal) = cancel_pair();
        let slow = store(10_000, 1);
        let finished = slow.finished.clone();
        let run = tokio::spawn(async move { execute(&slow, &plan(10), &ctx(60_000, Some(signal))).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_runs() {
        let (canceller, signal) = cancel_pair();
        canceller.cancel();
        assert!(signal.is_cancelled());
        let fast = store(0, 1);
        let err = execute(&fast, &plan(10), &ctx(1000, Some(signal)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));
    }

    #[tokio::test]
    async fn test_dropped_canceller_does_not_cancel() {
        let (canceller, signal) = cancel_pair();
        drop(canceller);
        let rows = execute(&store(5, 2), &plan(10), &ctx(1000, Some(signal)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_row_cap_guard() {
        let err = execute(&store(0, 11), &plan(10), &ctx(1000, None))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::StoreFault(_)));
    }

    #[tokio::test]
    async fn test_bounded_guards_any_wait() {
        let p = plan(10);
        let never = std::future::pending::<Result<(), ExecutionError>>;

        let err = bounded(&ctx(20, None), &p, never()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(_)));

        let (canceller, signal) = cancel_pair();
        canceller.cancel();
        let err = bounded(&ctx(60_000, Some(signal)), &p, never())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Cancelled));

        let rows = bounded(&ctx(1000, None), &p, fetch(&store(0, 2), &p))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_pool_timeout_is_unavailable() {
        let err = pool_error(PoolError::Timeout(deadpool_postgres::TimeoutType::Wait));
        assert!(matches!(err, ExecutionError::Unavailable(_)));
        assert!(err.is_retryable());
    }
}
