use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::Instant;

/// Monotonic session timeline in milliseconds, anchored to the wall clock
/// at session start. Every pipeline timestamp is read from one of these so
/// the state machine and the compositor agree on "now".
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
    started_at: DateTime<Utc>,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Milliseconds since the session started.
    pub fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis().min(u64::MAX as u128) as u64
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wall-clock time of a session timestamp.
    pub fn wall_clock(&self, ts: u64) -> Option<DateTime<Utc>> {
        let offset = ChronoDuration::try_milliseconds(i64::try_from(ts).ok()?)?;
        self.started_at.checked_add_signed(offset)
    }
}
