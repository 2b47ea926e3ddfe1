// ── Time source ──
//
// Freshness, stale deadlines and the wall-clock timestamps recorded on
// accepted updates all come from one injectable clock. `TokioClock` follows
// tokio's clock, so paused-time tests move it with `tokio::time::advance`.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Wall-clock source for freshness bookkeeping.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock anchored once, then advanced by tokio's monotonic clock.
///
/// The anchor is taken at construction; later wall-clock jumps (NTP, DST)
/// do not affect readings.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Start the clock at a fixed wall-clock time.
    pub fn anchored_at(wall_anchor: DateTime<Utc>) -> Self {
        Self {
            wall_anchor,
            mono_anchor: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.mono_anchor.elapsed()).unwrap_or(TimeDelta::MAX);
        self.wall_anchor
            .checked_add_signed(elapsed)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
