use std::time::Duration;

/// Endpoint exercised when a target does not name one.
pub const DEFAULT_PATH: &str = "/api/v1/products";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

pub const DEFAULT_PRE_ALLOCATED_WORKERS: usize = 20;

pub const DEFAULT_MAX_WORKERS: usize = 1000;

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long in-flight requests may run after the last tick before they are cancelled.
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Percentiles present in every snapshot, whether or not a threshold asks for them.
pub const DEFAULT_PERCENTILES: [f64; 4] = [50., 90., 95., 99.];

/// A tick dispatched later than this past its nominal time counts as late.
pub const LATE_TICK_THRESHOLD: Duration = Duration::from_millis(10);

/// Longest accepted run duration. Tick offsets are nanosecond counts and must not saturate.
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
