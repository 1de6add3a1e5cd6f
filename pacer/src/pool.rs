use crate::aggregator::Aggregator;
use crate::error::RunError;
use crate::transaction::{execute, ExecutionContext, Transaction};
use async_channel::{Receiver, Sender, TrySendError};
use pacer_core::{RequestResult, RunConfig, Tick};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// What happened to a tick handed to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Accepted,
    /// Recorded as an overload failure without being sent.
    Overload,
    /// Recorded as cancelled without being sent.
    Cancelled,
}

#[derive(Debug, Default)]
struct PoolAtomics {
    /// Workers waiting on the queue.
    idle: AtomicUsize,
    /// Ticks accepted but not yet recorded, queued or in flight.
    outstanding: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Grows lazily from `pre_allocated_workers` up to `max_workers` tasks, each pulling ticks
/// from a shared bounded queue and executing them one at a time.
///
/// Every tick passed to [`WorkerPool::dispatch`] produces exactly one recorded result once
/// [`WorkerPool::drain`] returns.
pub(crate) struct WorkerPool<T> {
    transaction: Arc<T>,
    ctx: ExecutionContext,
    aggregator: Arc<Aggregator>,
    tx: Sender<Tick>,
    rx: Receiver<Tick>,
    workers: JoinSet<()>,
    atomics: Arc<PoolAtomics>,
    max_workers: usize,
    admission_limit: usize,
    peak_workers: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PoolStats {
    pub peak_workers: usize,
    pub peak_in_flight: usize,
}

impl<T: Transaction> WorkerPool<T> {
    pub fn new(
        config: &RunConfig,
        transaction: Arc<T>,
        aggregator: Arc<Aggregator>,
        ctx: ExecutionContext,
    ) -> Self {
        let admission_limit = config.max_workers + config.queue_capacity;
        let (tx, rx) = async_channel::bounded(admission_limit.max(1));

        let mut pool = Self {
            transaction,
            ctx,
            aggregator,
            tx,
            rx,
            workers: JoinSet::new(),
            atomics: Arc::new(PoolAtomics::default()),
            max_workers: config.max_workers,
            admission_limit,
            peak_workers: 0,
        };

        for _ in 0..config.pre_allocated_workers {
            pool.spawn_worker();
        }
        debug!("Pre-allocated {} workers", pool.workers.len());

        pool
    }

    pub fn dispatch(&mut self, tick: Tick) -> Dispatch {
        if self.ctx.cancel.is_cancelled() {
            self.aggregator.record(RequestResult::cancelled(
                &tick,
                Duration::ZERO,
                self.ctx.start.elapsed(),
            ));
            return Dispatch::Cancelled;
        }

        // NOTE: Only the dispatcher increments `outstanding`, so the check and the increment
        // cannot race with each other; workers only ever lower it.
        if self.atomics.outstanding.load(Ordering::Acquire) >= self.admission_limit {
            return self.overload(tick);
        }
        self.atomics.outstanding.fetch_add(1, Ordering::AcqRel);

        match self.tx.try_send(tick) {
            Ok(()) => {}
            Err(TrySendError::Full(tick)) => {
                self.atomics.outstanding.fetch_sub(1, Ordering::AcqRel);
                return self.overload(tick);
            }
            Err(TrySendError::Closed(tick)) => {
                self.atomics.outstanding.fetch_sub(1, Ordering::AcqRel);
                self.aggregator.record(RequestResult::cancelled(
                    &tick,
                    Duration::ZERO,
                    self.ctx.start.elapsed(),
                ));
                return Dispatch::Cancelled;
            }
        }

        if self.atomics.idle.load(Ordering::Acquire) < self.rx.len()
            && self.workers.len() < self.max_workers
        {
            self.spawn_worker();
            trace!("Grew pool to {} workers", self.workers.len());
        }

        Dispatch::Accepted
    }

    fn overload(&self, tick: Tick) -> Dispatch {
        self.aggregator
            .record(RequestResult::overload(&tick, self.ctx.start.elapsed()));
        Dispatch::Overload
    }

    fn spawn_worker(&mut self) {
        let transaction = self.transaction.clone();
        let aggregator = self.aggregator.clone();
        let atomics = self.atomics.clone();
        let ctx = self.ctx.clone();
        let rx = self.rx.clone();

        atomics.idle.fetch_add(1, Ordering::AcqRel);
        self.workers.spawn(async move {
            while let Ok(tick) = rx.recv().await {
                atomics.idle.fetch_sub(1, Ordering::AcqRel);

                let result = if ctx.cancel.is_cancelled() {
                    RequestResult::cancelled(&tick, Duration::ZERO, ctx.start.elapsed())
                } else {
                    let in_flight = atomics.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                    atomics.peak_in_flight.fetch_max(in_flight, Ordering::AcqRel);
                    let result = execute(&*transaction, &tick, &ctx).await;
                    atomics.in_flight.fetch_sub(1, Ordering::AcqRel);
                    result
                };

                aggregator.record(result);
                atomics.outstanding.fetch_sub(1, Ordering::AcqRel);
                atomics.idle.fetch_add(1, Ordering::AcqRel);
            }
            atomics.idle.fetch_sub(1, Ordering::AcqRel);
        });

        self.peak_workers = self.peak_workers.max(self.workers.len());

        #[cfg(feature = "metrics")]
        metrics::gauge!("pacer_workers", "scenario" => self.aggregator.name().to_string())
            .set(self.workers.len() as f64);
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn in_flight(&self) -> usize {
        self.atomics.in_flight.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Stops accepting ticks and waits for everything accepted so far to be recorded.
    ///
    /// Requests still running once `grace` elapses are cancelled, and ticks still queued
    /// are recorded as cancelled without being sent.
    pub async fn drain(mut self, grace: Duration) -> Result<PoolStats, RunError> {
        self.tx.close();
        let outstanding = self.atomics.outstanding.load(Ordering::Acquire);
        debug!("Draining {outstanding} outstanding requests");

        let graceful = tokio::time::timeout(grace, join_all(&mut self.workers)).await;
        match graceful {
            Ok(res) => res?,
            Err(_) => {
                warn!(
                    "Graceful stop of {} elapsed with {} requests in flight, cancelling",
                    humantime::format_duration(grace),
                    self.in_flight()
                );
                self.ctx.cancel.cancel();
                join_all(&mut self.workers).await?;
            }
        }

        Ok(PoolStats {
            peak_workers: self.peak_workers,
            peak_in_flight: self.atomics.peak_in_flight.load(Ordering::Acquire),
        })
    }
}

async fn join_all(workers: &mut JoinSet<()>) -> Result<(), RunError> {
    while let Some(res) = workers.join_next().await {
        res?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::from_fn;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn config(pre: usize, max: usize, queue: usize) -> RunConfig {
        RunConfig {
            pre_allocated_workers: pre,
            max_workers: max,
            queue_capacity: queue,
            ..RunConfig::new("pool")
        }
    }

    fn ctx(cancel: CancellationToken) -> ExecutionContext {
        ExecutionContext {
            timeout: Duration::from_secs(60),
            expected_statuses: vec![200],
            cancel,
            start: Instant::now(),
        }
    }

    fn tick(seq: u64) -> Tick {
        Tick {
            seq,
            offset: Duration::ZERO,
        }
    }

    fn sleepy(millis: u64) -> Arc<impl Transaction> {
        Arc::new(from_fn(move || async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(200)
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn grows_up_to_max() {
        let aggregator = Arc::new(Aggregator::new("pool"));
        let mut pool = WorkerPool::new(
            &config(2, 10, 0),
            sleepy(1_000),
            aggregator.clone(),
            ctx(CancellationToken::new()),
        );
        assert_eq!(pool.workers(), 2);

        for seq in 0..10 {
            assert_eq!(pool.dispatch(tick(seq)), Dispatch::Accepted);
        }
        assert!(pool.workers() <= 10);

        let stats = pool.drain(Duration::from_secs(30)).await.unwrap();
        assert!(stats.peak_workers <= 10);
        assert!(stats.peak_in_flight <= 10);

        let snapshot = aggregator.snapshot(&[]);
        assert_eq!(snapshot.total, 10);
        assert_eq!(snapshot.success, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn saturation_is_overload() {
        let aggregator = Arc::new(Aggregator::new("pool"));
        let mut pool = WorkerPool::new(
            &config(0, 3, 0),
            sleepy(1_000),
            aggregator.clone(),
            ctx(CancellationToken::new()),
        );

        let dispatched: Vec<Dispatch> = (0..5).map(|seq| pool.dispatch(tick(seq))).collect();
        assert_eq!(
            dispatched,
            vec![
                Dispatch::Accepted,
                Dispatch::Accepted,
                Dispatch::Accepted,
                Dispatch::Overload,
                Dispatch::Overload,
            ]
        );

        pool.drain(Duration::from_secs(30)).await.unwrap();
        let snapshot = aggregator.snapshot(&[]);
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.success, 3);
        assert_eq!(snapshot.failures.overload, 2);
        assert_eq!(snapshot.latency.unwrap().count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_absorbs_bursts() {
        let aggregator = Arc::new(Aggregator::new("pool"));
        let mut pool = WorkerPool::new(
            &config(1, 1, 2),
            sleepy(100),
            aggregator.clone(),
            ctx(CancellationToken::new()),
        );

        let accepted = (0..4)
            .map(|seq| pool.dispatch(tick(seq)))
            .filter(|d| *d == Dispatch::Accepted)
            .count();
        assert_eq!(accepted, 3);

        pool.drain(Duration::from_secs(30)).await.unwrap();
        let snapshot = aggregator.snapshot(&[]);
        assert_eq!(snapshot.success, 3);
        assert_eq!(snapshot.failures.overload, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_frees_up_after_completion() {
        let aggregator = Arc::new(Aggregator::new("pool"));
        let mut pool = WorkerPool::new(
            &config(1, 1, 0),
            sleepy(100),
            aggregator.clone(),
            ctx(CancellationToken::new()),
        );

        assert_eq!(pool.dispatch(tick(0)), Dispatch::Accepted);
        assert_eq!(pool.dispatch(tick(1)), Dispatch::Overload);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(pool.dispatch(tick(2)), Dispatch::Accepted);

        pool.drain(Duration::from_secs(30)).await.unwrap();
        assert_eq!(aggregator.snapshot(&[]).success, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_deadline_cancels_stragglers() {
        let aggregator = Arc::new(Aggregator::new("pool"));
        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::new(
            &config(0, 4, 0),
            sleepy(60_000),
            aggregator.clone(),
            ctx(cancel.clone()),
        );
        for seq in 0..4 {
            pool.dispatch(tick(seq));
        }

        let start = Instant::now();
        pool.drain(Duration::from_secs(1)).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(cancel.is_cancelled());

        let snapshot = aggregator.snapshot(&[]);
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.failures.cancelled, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_pool_records_queued_ticks() {
        let aggregator = Arc::new(Aggregator::new("pool"));
        let cancel = CancellationToken::new();
        let mut pool = WorkerPool::new(
            &config(1, 1, 5),
            sleepy(1_000),
            aggregator.clone(),
            ctx(cancel.clone()),
        );
        for seq in 0..4 {
            pool.dispatch(tick(seq));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        cancel.cancel();
        assert_eq!(pool.dispatch(tick(4)), Dispatch::Cancelled);
        pool.drain(Duration::from_secs(30)).await.unwrap();

        let snapshot = aggregator.snapshot(&[]);
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.failures.cancelled, 5);
        assert!(snapshot.latency.is_none());
    }

    #[tokio::test]
    #[ntest::timeout(10000)]
    async fn panicking_transaction_is_reported() {
        let aggregator = Arc::new(Aggregator::new("pool"));
        let panicky = Arc::new(from_fn(|| async {
            if true {
                panic!("boom");
            }
            Ok(200)
        }));
        let mut pool = WorkerPool::new(
            &config(1, 1, 0),
            panicky,
            aggregator,
            ctx(CancellationToken::new()),
        );
        pool.dispatch(tick(0));

        let res = pool.drain(Duration::from_secs(5)).await;
        assert!(matches!(res, Err(RunError::Worker(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ntest::timeout(20000)]
    async fn every_tick_is_recorded_once() {
        let aggregator = Arc::new(Aggregator::new("pool"));
        let mut pool = WorkerPool::new(
            &config(4, 16, 4),
            sleepy(2),
            aggregator.clone(),
            ctx(CancellationToken::new()),
        );

        let mut overloads = 0;
        for seq in 0..2_000 {
            if pool.dispatch(tick(seq)) == Dispatch::Overload {
                overloads += 1;
            }
            if seq % 20 == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        pool.drain(Duration::from_secs(10)).await.unwrap();

        let snapshot = aggregator.snapshot(&[]);
        assert_eq!(snapshot.total, 2_000);
        assert_eq!(snapshot.failures.overload, overloads);
        assert_eq!(snapshot.success + overloads, 2_000);
    }
}
