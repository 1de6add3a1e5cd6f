use crate::error::RunError;
use pacer_core::{Outcome, RequestResult, Tick, TransportErrorKind};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single request against the system under test.
///
/// Resolves to the response status code, or the kind of transport failure. Timeouts,
/// cancellation and success classification are handled by the caller, so implementations
/// should neither retry nor impose their own deadline.
pub trait Transaction: Send + Sync + 'static {
    type Future: Future<Output = Result<u16, TransportErrorKind>> + Send + 'static;

    fn call(&self) -> Self::Future;

    /// Checked once before the run starts. An error aborts the run.
    fn preflight(&self) -> BoxFuture<'_, Result<(), RunError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Transaction backed by a closure, mostly useful for tests and custom protocols.
///
/// # Example
/// ```no_run
/// use pacer::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() {
/// let report = Run::with_transaction(
///     RunConfig::new("sleepy"),
///     from_fn(|| async {
///         tokio::time::sleep(Duration::from_millis(50)).await;
///         Ok(200)
///     }),
/// )
/// .rate(10.)
/// .duration(Duration::from_secs(1))
/// .await;
/// # }
/// ```
pub fn from_fn<T, F>(func: T) -> FnTransaction<T>
where
    T: Fn() -> F + Send + Sync + 'static,
    F: Future<Output = Result<u16, TransportErrorKind>> + Send + 'static,
{
    FnTransaction { func }
}

pub struct FnTransaction<T> {
    func: T,
}

impl<T, F> Transaction for FnTransaction<T>
where
    T: Fn() -> F + Send + Sync + 'static,
    F: Future<Output = Result<u16, TransportErrorKind>> + Send + 'static,
{
    type Future = F;

    fn call(&self) -> F {
        (self.func)()
    }
}

/// Per-run settings every execution needs.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub timeout: Duration,
    pub expected_statuses: Vec<u16>,
    pub cancel: CancellationToken,
    pub start: Instant,
}

/// Executes exactly one call and turns whatever happens into a [`RequestResult`].
pub(crate) async fn execute<T: Transaction>(
    transaction: &T,
    tick: &Tick,
    ctx: &ExecutionContext,
) -> RequestResult {
    let started_at = ctx.start.elapsed();
    let start = Instant::now();

    tokio::select! {
        biased;

        _ = ctx.cancel.cancelled() => {
            RequestResult::cancelled(tick, start.elapsed(), started_at)
        }
        res = tokio::time::timeout(ctx.timeout, transaction.call()) => {
            let elapsed = start.elapsed();
            match res {
                Ok(Ok(status)) if ctx.expected_statuses.contains(&status) => {
                    RequestResult::new(tick, Outcome::Success { status }, elapsed, started_at)
                }
                Ok(Ok(status)) => {
                    RequestResult::new(tick, Outcome::UnexpectedStatus { status }, elapsed, started_at)
                }
                Ok(Err(kind)) => {
                    RequestResult::new(tick, Outcome::Transport(kind), elapsed, started_at)
                }
                Err(_) => RequestResult::new(tick, Outcome::Timeout, ctx.timeout, started_at),
            }
        }
    }
}
