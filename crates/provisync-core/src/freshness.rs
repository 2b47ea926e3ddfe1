// ── Freshness signal ──
//
// Derived on every read from the last accepted update and the clock. Never
// stored: "stale" is only ever a function of elapsed time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which path delivered the last accepted update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    Stream,
    Poll,
}

/// Bookkeeping recorded when an update is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStamp {
    pub source: Source,
    pub at: DateTime<Utc>,
}

/// Freshness of a subscription's data at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Freshness {
    /// `None` until the first update is accepted.
    pub source: Option<Source>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
}

impl Freshness {
    /// Evaluate freshness at `now` for a window of `stale_after`.
    ///
    /// Data that was never updated is stale. Data exactly `stale_after` old
    /// is still fresh.
    pub fn evaluate(last: Option<UpdateStamp>, now: DateTime<Utc>, stale_after: Duration) -> Self {
        let Some(stamp) = last else {
            return Self {
                source: None,
                last_updated_at: None,
                is_stale: true,
            };
        };

        let is_stale = match (now - stamp.at).to_std() {
            Ok(age) => age > stale_after,
            // `now` before the stamp: clock went backwards, not stale.
            Err(_) => false,
        };

        Self {
            source: Some(stamp.source),
            last_updated_at: Some(stamp.at),
            is_stale,
        }
    }

    /// Age of the data at `now`, if it was ever updated.
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_updated_at.and_then(|at| (now - at).to_std().ok())
    }
}
