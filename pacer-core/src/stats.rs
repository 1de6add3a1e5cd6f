use crate::ThresholdRule;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, DurationMilliSecondsWithFrac};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Point-in-time view of everything recorded so far in a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    /// `failure / total`, or 0 for an empty run.
    pub error_rate: f64,
    pub failures: FailureBreakdown,
    pub status_codes: BTreeMap<u16, u64>,
    /// `None` until at least one request has a latency.
    pub latency: Option<LatencySummary>,
}

impl MetricsSnapshot {
    pub fn overload_rate(&self) -> f64 {
        ratio(self.failures.overload, self.total)
    }
}

pub(crate) fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.
    } else {
        part as f64 / total as f64
    }
}

/// Failure counts by cause. Sums to [`MetricsSnapshot::failure`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBreakdown {
    pub status: u64,
    pub transport: u64,
    pub timeout: u64,
    pub overload: u64,
    pub cancelled: u64,
}

impl FailureBreakdown {
    pub fn total(&self) -> u64 {
        self.status + self.transport + self.timeout + self.overload + self.cancelled
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: u64,
    #[serde_as(as = "DurationMilliSecondsWithFrac<f64>")]
    pub min: Duration,
    #[serde_as(as = "DurationMilliSecondsWithFrac<f64>")]
    pub max: Duration,
    #[serde_as(as = "DurationMilliSecondsWithFrac<f64>")]
    pub mean: Duration,
    /// `(percentile, value)` pairs sorted by percentile.
    #[serde_as(as = "Vec<(_, DurationMilliSecondsWithFrac<f64>)>")]
    pub percentiles: Vec<(f64, Duration)>,
}

impl LatencySummary {
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        self.percentiles
            .iter()
            .find(|(p, _)| (p - percentile).abs() < 1e-9)
            .map(|(_, d)| *d)
    }

    pub fn p50(&self) -> Option<Duration> {
        self.percentile(50.)
    }

    pub fn p95(&self) -> Option<Duration> {
        self.percentile(95.)
    }

    pub fn p99(&self) -> Option<Duration> {
        self.percentile(99.)
    }
}

/// Evaluation of one [`ThresholdRule`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    #[serde_as(as = "DisplayFromStr")]
    pub rule: ThresholdRule,
    /// `None` when the snapshot has no data for the metric, which fails the rule.
    pub observed: Option<f64>,
    pub pass: bool,
}

impl RuleOutcome {
    pub fn expected(&self) -> f64 {
        self.rule.limit
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub pass: bool,
    pub rules: Vec<RuleOutcome>,
    pub snapshot: MetricsSnapshot,
}

impl Verdict {
    pub fn failed(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.rules.iter().filter(|r| !r.pass)
    }
}

/// Run-level facts that are not part of the metrics snapshot.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub ticks_emitted: u64,
    #[serde_as(as = "DurationMilliSecondsWithFrac<f64>")]
    pub elapsed: Duration,
    /// Ticks emitted per second of run time.
    pub achieved_rate: f64,
    pub peak_workers: usize,
    pub peak_in_flight: usize,
    pub late_ticks: u64,
    pub cancelled: bool,
    pub aborted_by_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub verdict: Verdict,
    pub stats: RunStatistics,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "requests: total={} success={} failure={} error_rate={:.4}",
            self.total, self.success, self.failure, self.error_rate
        )?;
        let FailureBreakdown {
            status,
            transport,
            timeout,
            overload,
            cancelled,
        } = self.failures;
        writeln!(
            f,
            "failures: status={status} transport={transport} timeout={timeout} overload={overload} cancelled={cancelled}"
        )?;
        match &self.latency {
            Some(latency) => {
                write!(
                    f,
                    "latency:  min={:?} avg={:?} max={:?}",
                    latency.min, latency.mean, latency.max
                )?;
                for (p, d) in &latency.percentiles {
                    write!(f, " p{p}={d:?}")?;
                }
                Ok(())
            }
            None => write!(f, "latency:  no samples"),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.rules {
            let mark = if outcome.pass { "✓" } else { "✗" };
            match outcome.observed {
                Some(observed) => writeln!(f, "{mark} {} (observed {observed:.4})", outcome.rule)?,
                None => writeln!(f, "{mark} {} (no data)", outcome.rule)?,
            }
        }
        write!(f, "verdict: {}", if self.pass { "PASS" } else { "FAIL" })
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ticks={} elapsed={} rate={:.2}/s peak_workers={} late_ticks={}",
            self.stats.ticks_emitted,
            humantime::format_duration(self.stats.elapsed),
            self.stats.achieved_rate,
            self.stats.peak_workers,
            self.stats.late_ticks,
        )?;
        writeln!(f, "{}", self.verdict.snapshot)?;
        write!(f, "{}", self.verdict)
    }
}
