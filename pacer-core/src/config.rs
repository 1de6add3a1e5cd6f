use crate::{
    ConfigError, ThresholdRule, DEFAULT_BASE_URL, DEFAULT_EXPECTED_STATUS, DEFAULT_GRACEFUL_STOP,
    DEFAULT_MAX_WORKERS, DEFAULT_PATH, DEFAULT_PRE_ALLOCATED_WORKERS, DEFAULT_REPORT_INTERVAL,
    DEFAULT_TIMEOUT, MAX_DURATION,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DeserializeAs, DisplayFromStr, SerializeAs};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Everything needed to drive one run.
///
/// Durations are written as humantime strings (`"5m"`, `"1800ms"`) when (de)serialized.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub name: String,
    pub target: Target,
    /// Arrival rate in requests per second.
    pub rate: f64,
    #[serde_as(as = "Option<HumanDuration>")]
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
    pub pre_allocated_workers: usize,
    pub max_workers: usize,
    /// Ticks allowed to wait for a worker once `max_workers` are busy. Zero drops them.
    pub queue_capacity: usize,
    #[serde_as(as = "HumanDuration")]
    pub timeout: Duration,
    #[serde_as(as = "HumanDuration")]
    pub graceful_stop: Duration,
    pub expected_statuses: Vec<u16>,
    #[serde_as(as = "HumanDuration")]
    pub report_interval: Duration,
    /// Resolve the target host before starting.
    pub preflight: bool,
    #[serde_as(as = "Vec<DisplayFromStr>")]
    pub thresholds: Vec<ThresholdRule>,
}

impl RunConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            target: Target::default(),
            rate: 1.,
            duration: None,
            iterations: None,
            pre_allocated_workers: DEFAULT_PRE_ALLOCATED_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            queue_capacity: 0,
            timeout: DEFAULT_TIMEOUT,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            expected_statuses: vec![DEFAULT_EXPECTED_STATUS],
            report_interval: DEFAULT_REPORT_INTERVAL,
            preflight: true,
            thresholds: vec![],
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rate.is_finite() || self.rate <= 0. {
            return Err(ConfigError::InvalidRate(self.rate));
        }

        match (self.duration, self.iterations) {
            (None, None) => return Err(ConfigError::MissingBudget),
            (Some(d), _) if d.is_zero() => return Err(ConfigError::ZeroDuration),
            (Some(d), _) if d > MAX_DURATION => return Err(ConfigError::DurationTooLong(d)),
            (_, Some(0)) => return Err(ConfigError::ZeroIterations),
            _ => {}
        }

        if self.max_workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.pre_allocated_workers > self.max_workers {
            return Err(ConfigError::PreAllocatedExceedsMax {
                pre: self.pre_allocated_workers,
                max: self.max_workers,
            });
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroInterval("timeout"));
        }
        if self.report_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("report_interval"));
        }

        if self.expected_statuses.is_empty() {
            return Err(ConfigError::NoExpectedStatus);
        }
        if let Some(status) = self
            .expected_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(ConfigError::InvalidStatus(*status));
        }

        self.target.url().map(|_| ())
    }

    /// Number of ticks the budget allows, before any cancellation.
    pub fn planned_ticks(&self) -> u64 {
        let by_duration = self.duration.map(|d| {
            let mut n = (self.rate * d.as_secs_f64()).ceil() as u64;
            // Match the scheduler's own cutoff so float rounding can't disagree by one.
            while n > 0 && tick_offset(n - 1, self.rate) >= d {
                n -= 1;
            }
            while tick_offset(n, self.rate) < d {
                n += 1;
            }
            n
        });

        match (by_duration, self.iterations) {
            (Some(d), Some(i)) => d.min(i),
            (Some(d), None) => d,
            (None, Some(i)) => i,
            (None, None) => 0,
        }
    }

    pub fn is_expected(&self, status: u16) -> bool {
        self.expected_statuses.contains(&status)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Nominal start of tick `seq`, measured from the start of the run.
///
/// Rounded to the nearest nanosecond so whole-millisecond schedules stay exact.
pub fn tick_offset(seq: u64, rate: f64) -> Duration {
    Duration::from_nanos((seq as f64 * 1e9 / rate).round() as u64)
}

/// The endpoint under test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Target {
    pub base_url: String,
    pub path: String,
    pub method: Method,
}

impl Target {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    pub fn url(&self) -> Result<Url, ConfigError> {
        let base = Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.base_url.clone(),
            source,
        })?;

        match base.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }

        if base.host_str().is_none() {
            return Err(ConfigError::MissingHost(self.base_url.clone()));
        }

        // NOTE: `Url::join` would drop the last base segment without a trailing slash.
        let full = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        );
        Url::parse(&full).map_err(|source| ConfigError::InvalidUrl { url: full, source })
    }
}

impl Default for Target {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            path: DEFAULT_PATH.to_string(),
            method: Method::Get,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "PATCH" => Method::Patch,
            "DELETE" => Method::Delete,
            _ => return Err(format!("unsupported method `{s}`")),
        };
        Ok(method)
    }
}

/// (De)serializes a [`Duration`] as a humantime string such as `"1m 30s"`.
pub struct HumanDuration;

impl SerializeAs<Duration> for HumanDuration {
    fn serialize_as<S>(source: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*source))
    }
}

impl<'de> DeserializeAs<'de, Duration> for HumanDuration {
    fn deserialize_as<D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
