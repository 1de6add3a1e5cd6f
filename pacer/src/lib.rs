#![doc = include_str!("../README.md")]

pub mod aggregator;
pub mod evaluator;
pub mod http;
pub mod run;
pub mod transaction;

mod error;
mod measurement;
mod pool;
mod scheduler;
mod timer;

pub use error::RunError;
pub use measurement::Measurement;
pub use pacer_core as core;
pub use run::{ConfigurableRun, Run, RunHandle, RunState};

pub mod prelude {
    pub use crate::error::RunError;
    pub use crate::evaluator::evaluate;
    pub use crate::http::HttpTransaction;
    pub use crate::run::{ConfigurableRun, Run, RunHandle, RunState};
    pub use crate::transaction::{from_fn, Transaction};

    pub use pacer_core::{
        Method, MetricsSnapshot, Outcome, Report, RunConfig, RunStatistics, Target,
        ThresholdRule, TransportErrorKind, Verdict,
    };
}
