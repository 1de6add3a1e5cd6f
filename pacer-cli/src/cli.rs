use anyhow::{Context, Result};
use clap::Parser;
use pacer::core::{Method, RunConfig, ThresholdRule};
use std::path::PathBuf;
use std::time::Duration;

/// Drive an HTTP endpoint at a fixed arrival rate and check the results against thresholds.
///
/// Exits with 0 when every threshold passes, 1 when any fails and 2 when the run could not
/// be carried out.
#[derive(Parser, Debug)]
#[command(name = "pacer", version)]
pub struct Cli {
    /// Scenario file (TOML). Flags override its values.
    pub scenario: Option<PathBuf>,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(short = 'u', long)]
    pub base_url: Option<String>,

    #[arg(long)]
    pub path: Option<String>,

    #[arg(short = 'X', long)]
    pub method: Option<Method>,

    /// Requests started per second.
    #[arg(short, long)]
    pub rate: Option<f64>,

    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    #[arg(short = 'n', long)]
    pub iterations: Option<u64>,

    #[arg(long)]
    pub pre_allocated_workers: Option<usize>,

    #[arg(long)]
    pub max_workers: Option<usize>,

    #[arg(long)]
    pub queue_capacity: Option<usize>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub graceful_stop: Option<Duration>,

    #[arg(long, value_parser = humantime::parse_duration)]
    pub report_interval: Option<Duration>,

    /// Status code counted as success. Repeatable; replaces the configured set.
    #[arg(long = "expect-status")]
    pub expected_statuses: Vec<u16>,

    /// Rule such as `p95 < 1800ms`. Repeatable; added to the configured rules.
    #[arg(short, long = "threshold")]
    pub thresholds: Vec<ThresholdRule>,

    /// Skip resolving the target host before starting.
    #[arg(long)]
    pub no_preflight: bool,

    /// Write the final report as JSON.
    #[arg(long)]
    pub summary_export: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "pacer=info")]
    pub log: String,
}

impl Cli {
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.scenario {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            None => RunConfig::new("pacer"),
        };

        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.target.base_url = base_url.clone();
        }
        if let Some(path) = &self.path {
            config.target.path = path.clone();
        }
        if let Some(method) = self.method {
            config.target.method = method;
        }
        if let Some(rate) = self.rate {
            config.rate = rate;
        }
        if self.duration.is_some() {
            config.duration = self.duration;
        }
        if self.iterations.is_some() {
            config.iterations = self.iterations;
        }
        if let Some(pre) = self.pre_allocated_workers {
            config.pre_allocated_workers = pre;
        }
        if let Some(max) = self.max_workers {
            config.max_workers = max;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(grace) = self.graceful_stop {
            config.graceful_stop = grace;
        }
        if let Some(interval) = self.report_interval {
            config.report_interval = interval;
        }
        if !self.expected_statuses.is_empty() {
            config.expected_statuses = self.expected_statuses.clone();
        }
        config.thresholds.extend(self.thresholds.iter().copied());
        if self.no_preflight {
            config.preflight = false;
        }

        config.validate()?;
        Ok(config)
    }
}
