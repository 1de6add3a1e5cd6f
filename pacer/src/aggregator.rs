use crate::measurement::Measurement;
use metrics_util::AtomicBucket;
use pacer_core::{
    FailureBreakdown, LatencySummary, MetricsSnapshot, Outcome, RequestResult,
    DEFAULT_PERCENTILES,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Collects every [`RequestResult`] of a run.
///
/// Recording is lock-free: results are appended to an [`AtomicBucket`] and the per-window
/// counters are plain atomics, so concurrent workers never serialize on the aggregator.
/// Snapshots read the bucket once and derive every figure from that single read, which
/// keeps counts and latencies consistent with each other no matter what is recorded
/// concurrently.
pub struct Aggregator {
    name: String,
    results: AtomicBucket<RequestResult>,
    recorded: AtomicU64,
    window: WindowAtomics,
}

#[derive(Default)]
struct WindowAtomics {
    success: AtomicU64,
    error: AtomicU64,
    latency: AtomicBucket<Duration>,
}

impl Aggregator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: AtomicBucket::new(),
            recorded: AtomicU64::new(0),
            window: WindowAtomics::default(),
        }
    }

    pub fn record(&self, result: RequestResult) {
        let records_latency = result.outcome.records_latency();

        if result.success() {
            self.window.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.window.error.fetch_add(1, Ordering::Relaxed);
        }
        if records_latency {
            self.window.latency.push(result.duration);
        }

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(
                "pacer_requests_total",
                "scenario" => self.name.clone(),
                "outcome" => result.outcome.label()
            )
            .increment(1);
            if records_latency {
                metrics::histogram!("pacer_request_duration_seconds", "scenario" => self.name.clone())
                    .record(result.duration.as_secs_f64());
            }
        }

        self.results.push(result);
        self.recorded.fetch_add(1, Ordering::Release);
    }

    /// Number of results recorded so far.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Summarizes everything recorded so far.
    ///
    /// [`DEFAULT_PERCENTILES`] are always included, `extra_percentiles` are added on top.
    pub fn snapshot(&self, extra_percentiles: &[f64]) -> MetricsSnapshot {
        let results = self.results.data();

        let mut snapshot = MetricsSnapshot::default();
        let mut latencies = Vec::with_capacity(results.len());
        let mut status_codes = BTreeMap::new();
        let mut failures = FailureBreakdown::default();

        for result in &results {
            if let Some(status) = result.outcome.status() {
                *status_codes.entry(status).or_insert(0) += 1;
            }

            match result.outcome {
                Outcome::Success { .. } => snapshot.success += 1,
                Outcome::UnexpectedStatus { .. } => failures.status += 1,
                Outcome::Transport(_) => failures.transport += 1,
                Outcome::Timeout => failures.timeout += 1,
                Outcome::Overload => failures.overload += 1,
                Outcome::Cancelled => failures.cancelled += 1,
            }

            if result.outcome.records_latency() {
                latencies.push(result.duration);
            }
        }

        snapshot.total = results.len() as u64;
        snapshot.failure = failures.total();
        snapshot.error_rate = if snapshot.total == 0 {
            0.
        } else {
            snapshot.failure as f64 / snapshot.total as f64
        };
        snapshot.failures = failures;
        snapshot.status_codes = status_codes;

        latencies.sort_unstable();
        snapshot.latency = summarize(&latencies, &percentile_set(extra_percentiles));

        snapshot
    }

    /// Drains the counters for the window that just ended.
    pub(crate) fn collect_window(&self, elapsed: Duration) -> Measurement {
        let success = self.window.success.swap(0, Ordering::Relaxed);
        let error = self.window.error.swap(0, Ordering::Relaxed);
        let mut measurement = Measurement::new(success, error, elapsed);
        self.window
            .latency
            .clear_with(|dur| measurement.populate_latencies(dur));
        measurement
    }
}

fn percentile_set(extra: &[f64]) -> Vec<f64> {
    let mut set: Vec<f64> = DEFAULT_PERCENTILES
        .iter()
        .chain(extra)
        .copied()
        .filter(|p| (0. ..=100.).contains(p))
        .collect();
    set.sort_by(f64::total_cmp);
    set.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    set
}

fn summarize(sorted: &[Duration], percentiles: &[f64]) -> Option<LatencySummary> {
    let (min, max) = (*sorted.first()?, *sorted.last()?);
    let sum: u128 = sorted.iter().map(Duration::as_nanos).sum();
    let mean = Duration::from_nanos((sum / sorted.len() as u128) as u64);

    Some(LatencySummary {
        count: sorted.len() as u64,
        min,
        max,
        mean,
        percentiles: percentiles
            .iter()
            .map(|p| (*p, percentile(sorted, *p)))
            .collect(),
    })
}

/// Exact percentile with linear interpolation between the two closest ranks.
///
/// Monotonic in `p`, and adding samples at or above the current maximum never lowers any
/// percentile.
pub(crate) fn percentile(sorted: &[Duration], p: f64) -> Duration {
    match sorted.len() {
        0 => Duration::ZERO,
        1 => sorted[0],
        n => {
            let rank = (p / 100.).clamp(0., 1.) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            let (lo, hi) = (sorted[lower], sorted[upper]);
            lo + (hi - lo).mul_f64(frac)
        }
    }
}
