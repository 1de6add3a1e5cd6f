use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A scheduled request start.
///
/// `offset` is the nominal start time measured from the beginning of the run, i.e. `seq / rate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub seq: u64,
    pub offset: Duration,
}

/// Outcome of one tick, whether or not a request was actually sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestResult {
    pub seq: u64,
    pub outcome: Outcome,
    /// Wall-clock time spent on the request. Pinned to the timeout for [`Outcome::Timeout`].
    pub duration: Duration,
    /// When the tick was picked up, measured from the beginning of the run.
    pub started_at: Duration,
}

impl RequestResult {
    pub fn new(tick: &Tick, outcome: Outcome, duration: Duration, started_at: Duration) -> Self {
        Self {
            seq: tick.seq,
            outcome,
            duration,
            started_at,
        }
    }

    /// A tick that found no free worker and no room in the queue.
    pub fn overload(tick: &Tick, at: Duration) -> Self {
        Self::new(tick, Outcome::Overload, Duration::ZERO, at)
    }

    pub fn cancelled(tick: &Tick, duration: Duration, started_at: Duration) -> Self {
        Self::new(tick, Outcome::Cancelled, duration, started_at)
    }

    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Response with one of the expected status codes.
    Success { status: u16 },
    /// Response with any other status code.
    UnexpectedStatus { status: u16 },
    Transport(TransportErrorKind),
    Timeout,
    Overload,
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Outcome::Success { status } | Outcome::UnexpectedStatus { status } => Some(*status),
            _ => None,
        }
    }

    /// Whether the duration belongs in the latency distribution.
    ///
    /// Overloaded ticks never started and cancelled requests were abandoned, so neither has a
    /// meaningful latency.
    pub fn records_latency(&self) -> bool {
        !matches!(self, Outcome::Overload | Outcome::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success { .. } => "success",
            Outcome::UnexpectedStatus { .. } => "status",
            Outcome::Transport(_) => "transport",
            Outcome::Timeout => "timeout",
            Outcome::Overload => "overload",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success { status } | Outcome::UnexpectedStatus { status } => {
                write!(f, "{} ({status})", self.label())
            }
            Outcome::Transport(kind) => write!(f, "transport ({kind})"),
            _ => f.write_str(self.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Name resolution failed.
    Dns,
    /// Connection refused, reset or otherwise never established.
    Connect,
    /// The request could not be written.
    Request,
    /// The response body could not be read.
    Body,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}
