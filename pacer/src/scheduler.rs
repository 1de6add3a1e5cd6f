use pacer_core::{tick_offset, RunConfig, Tick};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Emits ticks at a fixed arrival rate.
///
/// Tick `n` is due at `start + n / rate` regardless of how long earlier requests take or how
/// late earlier ticks were picked up, so scheduling delays never accumulate. A consumer that
/// falls behind receives the overdue ticks immediately.
pub(crate) struct Scheduler {
    start: Instant,
    rate: f64,
    duration: Option<Duration>,
    iterations: Option<u64>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new(config: &RunConfig, start: Instant) -> Self {
        Self {
            start,
            rate: config.rate,
            duration: config.duration,
            iterations: config.iterations,
            next_seq: 0,
        }
    }

    /// Waits for the next tick, or returns `None` once the budget is spent.
    ///
    /// Cancel safe: dropping the future before it completes does not skip a tick.
    pub async fn next(&mut self) -> Option<Tick> {
        let seq = self.next_seq;
        if self.iterations.is_some_and(|max| seq >= max) {
            return None;
        }

        let offset = tick_offset(seq, self.rate);
        if self.duration.is_some_and(|d| offset >= d) {
            return None;
        }

        sleep_until(self.start + offset).await;
        self.next_seq += 1;

        Some(Tick { seq, offset })
    }

    /// How far behind its nominal time the tick is being handled.
    pub fn lag(&self, tick: &Tick) -> Duration {
        self.start.elapsed().saturating_sub(tick.offset)
    }

    pub fn emitted(&self) -> u64 {
        self.next_seq
    }
}
