//! Run lifecycle and configuration
use crate::aggregator::Aggregator;
use crate::error::RunError;
use crate::evaluator::{check, evaluate, required_percentiles};
use crate::http::HttpTransaction;
use crate::pool::{Dispatch, WorkerPool};
use crate::scheduler::Scheduler;
use crate::timer::Timer;
use crate::transaction::{ExecutionContext, Transaction};
use arc_swap::ArcSwap;
use pacer_core::{Report, RunConfig, RunStatistics, ThresholdRule, LATE_TICK_THRESHOLD};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Configured,
    Running,
    /// No more ticks are emitted; waiting on in-flight requests.
    Draining,
    Completed,
    /// Ended without a verdict.
    Aborted(String),
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Aborted(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Configured => f.write_str("configured"),
            RunState::Running => f.write_str("running"),
            RunState::Draining => f.write_str("draining"),
            RunState::Completed => f.write_str("completed"),
            RunState::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Observes and cancels a run from outside of it. Cheap to clone.
#[derive(Clone)]
pub struct RunHandle {
    cancel: CancellationToken,
    state: Arc<ArcSwap<RunState>>,
}

impl RunHandle {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            state: Arc::new(ArcSwap::from_pointee(RunState::Configured)),
        }
    }

    /// Stops emitting ticks and aborts in-flight requests. The run still produces a
    /// [`Report`] covering everything up to that point.
    ///
    /// Safe to call from any task, any number of times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> RunState {
        self.state.load().as_ref().clone()
    }

    fn transition(&self, state: RunState) {
        debug!("Run {state}");
        self.state.store(Arc::new(state));
    }
}

enum Source<T> {
    Ready(Arc<T>),
    FromConfig(fn(&RunConfig) -> Result<T, RunError>),
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        match self {
            Source::Ready(t) => Source::Ready(t.clone()),
            Source::FromConfig(build) => Source::FromConfig(*build),
        }
    }
}

/// A configured load run. Nothing happens until it is awaited.
///
/// # Example
/// ```no_run
/// use pacer::prelude::*;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), RunError> {
/// let report = Run::new(RunConfig::new("product_list"))
///     .rate(1000.)
///     .duration(Duration::from_secs(300))
///     .workers(20, 1000)
///     .threshold("p95 < 1800ms".parse()?)
///     .threshold("p99 < 2000ms".parse()?)
///     .threshold("error_rate < 0.001".parse()?)
///     .await?;
///
/// println!("{report}");
/// # Ok(())
/// # }
/// ```
#[pin_project::pin_project]
pub struct Run<T = HttpTransaction> {
    source: Source<T>,
    config: RunConfig,
    handle: RunHandle,
    runner_fut: Option<Pin<Box<dyn Future<Output = Result<Report, RunError>> + Send>>>,
}

impl Run<HttpTransaction> {
    /// Run against `config.target` over HTTP.
    pub fn new(config: RunConfig) -> Self {
        Self::from_source(config, Source::FromConfig(HttpTransaction::from_config))
    }
}

impl<T: Transaction> Run<T> {
    /// Run with a custom [`Transaction`] instead of the configured HTTP target.
    pub fn with_transaction(config: RunConfig, transaction: T) -> Self {
        Self::from_source(config, Source::Ready(Arc::new(transaction)))
    }

    fn from_source(config: RunConfig, source: Source<T>) -> Self {
        Self {
            source,
            config,
            handle: RunHandle::new(),
            runner_fut: None,
        }
    }

    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}

impl<T: Transaction> Future for Run<T> {
    type Output = Result<Report, RunError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let runner = this.runner_fut.get_or_insert_with(|| {
            Box::pin(run(
                this.source.clone(),
                this.config.clone(),
                this.handle.clone(),
            ))
        });
        runner.as_mut().poll(cx)
    }
}

/// Builder-style setters shared by [`RunConfig`] and [`Run`].
pub trait ConfigurableRun: Sized {
    #[doc(hidden)]
    fn config_mut(&mut self) -> &mut RunConfig;

    /// Requests started per second.
    fn rate(mut self, rate: f64) -> Self {
        self.config_mut().rate = rate;
        self
    }

    /// Stop emitting ticks after `duration`.
    fn duration(mut self, duration: Duration) -> Self {
        self.config_mut().duration = Some(duration);
        self
    }

    /// Stop emitting ticks after `iterations` of them.
    fn iterations(mut self, iterations: u64) -> Self {
        self.config_mut().iterations = Some(iterations);
        self
    }

    fn workers(mut self, pre_allocated: usize, max: usize) -> Self {
        let config = self.config_mut();
        config.pre_allocated_workers = pre_allocated;
        config.max_workers = max;
        self
    }

    /// Ticks allowed to wait once every worker is busy.
    fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config_mut().queue_capacity = capacity;
        self
    }

    fn timeout(mut self, timeout: Duration) -> Self {
        self.config_mut().timeout = timeout;
        self
    }

    /// How long in-flight requests may keep running once the last tick was emitted.
    fn graceful_stop(mut self, grace: Duration) -> Self {
        self.config_mut().graceful_stop = grace;
        self
    }

    fn report_interval(mut self, interval: Duration) -> Self {
        self.config_mut().report_interval = interval;
        self
    }

    /// Replaces the set of status codes counted as success.
    fn expected_statuses(mut self, statuses: &[u16]) -> Self {
        self.config_mut().expected_statuses = statuses.to_vec();
        self
    }

    fn threshold(mut self, rule: ThresholdRule) -> Self {
        self.config_mut().thresholds.push(rule);
        self
    }

    fn preflight(mut self, enabled: bool) -> Self {
        self.config_mut().preflight = enabled;
        self
    }
}

impl ConfigurableRun for RunConfig {
    fn config_mut(&mut self) -> &mut RunConfig {
        self
    }
}

impl<T> ConfigurableRun for Run<T> {
    fn config_mut(&mut self) -> &mut RunConfig {
        &mut self.config
    }
}

#[instrument(name = "run", skip_all, fields(name = config.name))]
async fn run<T: Transaction>(
    source: Source<T>,
    config: RunConfig,
    handle: RunHandle,
) -> Result<Report, RunError> {
    match drive(source, config, &handle).await {
        Ok(report) => {
            handle.transition(RunState::Completed);
            info!(
                "Run completed with {} ({} ticks)",
                if report.verdict.pass { "PASS" } else { "FAIL" },
                report.stats.ticks_emitted
            );
            Ok(report)
        }
        Err(err) => {
            error!("Run aborted: {err}");
            handle.transition(RunState::Aborted(err.to_string()));
            Err(err)
        }
    }
}

async fn drive<T: Transaction>(
    source: Source<T>,
    config: RunConfig,
    handle: &RunHandle,
) -> Result<Report, RunError> {
    debug!("Configured with {config:?}");
    config.validate()?;

    let transaction = match source {
        Source::Ready(transaction) => transaction,
        Source::FromConfig(build) => Arc::new(build(&config)?),
    };
    if config.preflight {
        transaction.preflight().await?;
    }

    let percentiles = required_percentiles(&config.thresholds);
    let abort_rules: Vec<ThresholdRule> = config
        .thresholds
        .iter()
        .filter(|r| r.abort_on_fail)
        .copied()
        .collect();

    let aggregator = Arc::new(Aggregator::new(&config.name));
    let start = Instant::now();
    let ctx = ExecutionContext {
        timeout: config.timeout,
        expected_statuses: config.expected_statuses.clone(),
        // NOTE: A child token lets the grace deadline abort requests without marking the
        // run itself as cancelled.
        cancel: handle.cancel.child_token(),
        start,
    };
    let mut pool = WorkerPool::new(&config, transaction, aggregator.clone(), ctx);
    let mut scheduler = Scheduler::new(&config, start);
    let mut timer = Timer::new(config.report_interval);

    let mut stats = RunStatistics::default();
    let mut window_overloads = 0u64;
    let mut window_late = 0u64;

    handle.transition(RunState::Running);
    info!(
        "Starting at {} req/s ({} ticks planned, reporting every {timer})",
        config.rate,
        config.planned_ticks()
    );

    loop {
        tokio::select! {
            biased;

            _ = handle.cancel.cancelled() => {
                if !stats.aborted_by_threshold {
                    warn!("Run cancelled after {} ticks", scheduler.emitted());
                    stats.cancelled = true;
                }
                break;
            }
            elapsed = timer.tick() => {
                let window = aggregator.collect_window(elapsed);
                info!(
                    "[{}] workers={} in_flight={} queued={} {window}",
                    humantime::format_duration(Duration::from_secs(start.elapsed().as_secs())),
                    pool.workers(),
                    pool.in_flight(),
                    pool.queued(),
                );
                if window_overloads > 0 {
                    warn!(
                        "Dropped {window_overloads} ticks with all {} workers busy",
                        config.max_workers
                    );
                }
                if window_late > 0 {
                    warn!("{window_late} ticks dispatched more than {LATE_TICK_THRESHOLD:?} late");
                }
                window_overloads = 0;
                window_late = 0;

                if !abort_rules.is_empty() {
                    let snapshot = aggregator.snapshot(&percentiles);
                    // Rules without data yet are not grounds for stopping early.
                    let failed = abort_rules
                        .iter()
                        .map(|rule| check(rule, &snapshot))
                        .find(|outcome| outcome.observed.is_some() && !outcome.pass);
                    if let Some(outcome) = failed {
                        error!(
                            "Threshold `{}` crossed (observed {:.4}), stopping run",
                            outcome.rule,
                            outcome.observed.unwrap_or_default()
                        );
                        stats.aborted_by_threshold = true;
                        handle.cancel();
                    }
                }
            }
            tick = scheduler.next() => {
                let Some(tick) = tick else {
                    break;
                };

                let lag = scheduler.lag(&tick);
                if lag > LATE_TICK_THRESHOLD {
                    trace!("Tick {} is {lag:?} late", tick.seq);
                    stats.late_ticks += 1;
                    window_late += 1;
                }

                if pool.dispatch(tick) == Dispatch::Overload {
                    window_overloads += 1;
                }
            }
        }
    }

    let dispatch_elapsed = start.elapsed();
    stats.ticks_emitted = scheduler.emitted();
    stats.achieved_rate = if dispatch_elapsed.is_zero() {
        0.
    } else {
        stats.ticks_emitted as f64 / dispatch_elapsed.as_secs_f64()
    };

    handle.transition(RunState::Draining);
    let pool_stats = pool.drain(config.graceful_stop).await?;
    stats.peak_workers = pool_stats.peak_workers;
    stats.peak_in_flight = pool_stats.peak_in_flight;
    stats.elapsed = start.elapsed();

    if handle.is_cancelled() && !stats.cancelled && !stats.aborted_by_threshold {
        warn!("Run cancelled while draining");
        stats.cancelled = true;
    }

    let recorded = aggregator.recorded();
    if recorded != stats.ticks_emitted {
        return Err(RunError::Aggregation {
            emitted: stats.ticks_emitted,
            recorded,
        });
    }

    let snapshot = aggregator.snapshot(&percentiles);
    if snapshot.total != recorded {
        return Err(RunError::Aggregation {
            emitted: stats.ticks_emitted,
            recorded: snapshot.total,
        });
    }

    Ok(Report {
        verdict: evaluate(snapshot, &config.thresholds),
        stats,
    })
}
