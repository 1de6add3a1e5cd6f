use pacer_core::ConfigError;
use thiserror::Error;

/// Reasons a run ends without a verdict.
///
/// Per-request failures never show up here; they are recorded in the metrics instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("unable to resolve target host `{host}`: {source}")]
    Unresolvable {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("{emitted} ticks were emitted but {recorded} results were recorded")]
    Aggregation { emitted: u64, recorded: u64 },

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
