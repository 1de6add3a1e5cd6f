use pdatastructs::tdigest::{TDigest, K1};
use std::fmt;
use std::time::Duration;
use tracing::error;

const TDIGEST_BACKLOG_SIZE: usize = 100;

/// Approximate view of a single reporting window.
///
/// Only used for progress output; verdicts are always computed from the exact run-wide
/// sample held by the aggregator.
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Completed requests per second, whatever their outcome.
    pub rps: f64,
    pub error_rate: f64,
    pub elapsed: Duration,
    latency: TDigest<K1>,
    samples: usize,
}

impl Measurement {
    pub fn new(success: u64, error: u64, elapsed: Duration) -> Self {
        let total = success + error;
        let secs = elapsed.as_secs_f64();
        let rps = if secs > 0. { total as f64 / secs } else { 0. };
        let error_rate = if total == 0 {
            0.
        } else {
            error as f64 / total as f64
        };
        Self {
            rps,
            error_rate,
            elapsed,
            latency: default_tdigest(),
            samples: 0,
        }
    }

    pub fn populate_latencies(&mut self, dur: &[Duration]) {
        for latency in dur {
            self.latency.insert(latency.as_secs_f64());
        }
        self.samples += dur.len();
    }

    pub fn latency(&self, quantile: f64) -> Duration {
        if self.samples == 0 {
            return Duration::ZERO;
        }

        let secs = self.latency.quantile(quantile);

        // TDigest occasionally returns NaN for sparse windows.
        let secs = if secs.is_finite() && secs >= 0. {
            secs
        } else {
            error!("NaN latency calculation over {} samples", self.samples);
            0.
        };

        Duration::from_secs_f64(secs)
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RPS={:.2}, ErrorRate={:.4}, p50={:?}, p95={:?}, p99={:?}",
            self.rps,
            self.error_rate,
            self.latency(0.5),
            self.latency(0.95),
            self.latency(0.99),
        )
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}
