// ── Diagnostic counters ──
//
// Conditions that never reach the user (dropped frames, unknown event kinds,
// stale rejections) are still counted here so operators can see them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Which counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Counter {
    /// Push frames that failed envelope or event decoding.
    DroppedMessages,
    /// Events of a kind this client does not know.
    UnknownEvents,
    /// Events addressed to another resource.
    ForeignEvents,
    /// Child or field updates rejected as not strictly newer.
    StaleRejections,
    /// Schema violations in payloads (fields stripped, children skipped).
    SchemaWarnings,
    /// Well-formed error envelopes received.
    BusinessErrors,
    /// Reconnect attempts scheduled after a drop or failed connect.
    Reconnects,
    /// Poll requests issued.
    Polls,
}

/// Shared atomic counters. Cheap to bump from any task.
#[derive(Debug, Default)]
pub struct Diagnostics {
    dropped_messages: AtomicU64,
    unknown_events: AtomicU64,
    foreign_events: AtomicU64,
    stale_rejections: AtomicU64,
    schema_warnings: AtomicU64,
    business_errors: AtomicU64,
    reconnects: AtomicU64,
    polls: AtomicU64,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.cell(counter).fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.cell(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            dropped_messages: self.get(Counter::DroppedMessages),
            unknown_events: self.get(Counter::UnknownEvents),
            foreign_events: self.get(Counter::ForeignEvents),
            stale_rejections: self.get(Counter::StaleRejections),
            schema_warnings: self.get(Counter::SchemaWarnings),
            business_errors: self.get(Counter::BusinessErrors),
            reconnects: self.get(Counter::Reconnects),
            polls: self.get(Counter::Polls),
        }
    }

    fn cell(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::DroppedMessages => &self.dropped_messages,
            Counter::UnknownEvents => &self.unknown_events,
            Counter::ForeignEvents => &self.foreign_events,
            Counter::StaleRejections => &self.stale_rejections,
            Counter::SchemaWarnings => &self.schema_warnings,
            Counter::BusinessErrors => &self.business_errors,
            Counter::Reconnects => &self.reconnects,
            Counter::Polls => &self.polls,
        }
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub dropped_messages: u64,
    pub unknown_events: u64,
    pub foreign_events: u64,
    pub stale_rejections: u64,
    pub schema_warnings: u64,
    pub business_errors: u64,
    pub reconnects: u64,
    pub polls: u64,
}
