use thiserror::Error;

/// Problems with a [`RunConfig`](crate::RunConfig) detected before any request is sent.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("rate must be a positive, finite number of requests per second (got {0})")]
    InvalidRate(f64),

    #[error("duration must be greater than zero")]
    ZeroDuration,

    #[error("duration of {0:?} exceeds the supported maximum")]
    DurationTooLong(std::time::Duration),

    #[error("iteration count must be greater than zero")]
    ZeroIterations,

    #[error("either a duration or an iteration count is required")]
    MissingBudget,

    #[error("max_workers must be at least 1")]
    NoWorkers,

    #[error("pre_allocated_workers ({pre}) exceeds max_workers ({max})")]
    PreAllocatedExceedsMax { pre: usize, max: usize },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("no expected status codes configured")]
    NoExpectedStatus,

    #[error("invalid HTTP status code {0}")]
    InvalidStatus(u16),

    #[error("invalid target url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("target url `{0}` has no host")]
    MissingHost(String),

    #[error("unsupported url scheme `{0}`, expected http or https")]
    UnsupportedScheme(String),

    #[error("invalid threshold `{rule}`: {reason}")]
    InvalidThreshold { rule: String, reason: String },
}

impl ConfigError {
    pub(crate) fn threshold(rule: &str, reason: impl Into<String>) -> Self {
        Self::InvalidThreshold {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}
