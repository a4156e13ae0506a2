use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Wall-clock timestamps derived from the tokio clock.
///
/// Anchored once at construction so that a paused or advanced tokio clock
/// moves ledger timestamps and retry timers together.
#[derive(Debug, Clone, Copy)]
pub struct DispatchClock {
    origin_utc: DateTime<Utc>,
    origin: Instant,
}

impl Default for DispatchClock {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchClock {
    pub fn new() -> Self {
        Self {
            origin_utc: Utc::now(),
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.origin_utc + to_chrono(self.origin.elapsed())
    }

    /// Tokio instant at which the given timestamp is reached. Past timestamps map to the origin.
    pub fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        let offset = (at - self.origin_utc).to_std().unwrap_or(Duration::ZERO);
        self.origin + offset
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52))
}
