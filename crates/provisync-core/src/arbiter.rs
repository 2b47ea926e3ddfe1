// ── Fallback arbiter ──
//
// Decides, from the stream's connection state, whether push or poll is
// authoritative and what a stale episode should trigger. Pure bookkeeping:
// the subscription driver owns the timers and acts on these decisions.

use crate::config::StalePolicy;
use crate::connection::ConnectionState;

/// Which path currently owns the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Authority {
    /// Stream is connected; polling is suspended.
    Stream,
    /// Stream is down; the poll timer runs.
    Poll,
    /// Nothing is running (before open, after close).
    None,
}

/// Effect of a connection-state change on the poll schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Authority did not change.
    Unchanged,
    /// Stream lost (or not yet established): restart the poll interval.
    Degraded,
    /// Stream (re)connected: suspend polling.
    Restored,
}

/// What to do when the freshness window elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleAction {
    Nothing,
    Poll,
    Reconnect,
}

#[derive(Debug, Clone)]
pub struct Arbiter {
    state: ConnectionState,
    policy: StalePolicy,
}

impl Arbiter {
    pub fn new(policy: StalePolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn authority(&self) -> Authority {
        authority_of(&self.state)
    }

    /// Whether the poll timer should be running.
    pub fn should_poll(&self) -> bool {
        self.authority() == Authority::Poll
    }

    /// Record a new connection state.
    pub fn observe(&mut self, next: ConnectionState) -> Transition {
        let before = authority_of(&self.state);
        let after = authority_of(&next);
        self.state = next;

        match (before, after) {
            (a, b) if a == b => Transition::Unchanged,
            (_, Authority::Poll) => Transition::Degraded,
            (_, Authority::Stream) => Transition::Restored,
            (_, Authority::None) => Transition::Unchanged,
        }
    }

    /// Decide what a stale episode triggers.
    pub fn on_stale(&self, poll_available: bool, poll_in_flight: bool) -> StaleAction {
        match self.policy {
            StalePolicy::Passive => StaleAction::Nothing,
            StalePolicy::Resnapshot if poll_available && !poll_in_flight => StaleAction::Poll,
            StalePolicy::Resnapshot => StaleAction::Nothing,
            // Only a "connected" stream can be silently dead; a degraded one
            // is already reconnecting.
            StalePolicy::Reconnect if self.state.is_connected() => StaleAction::Reconnect,
            StalePolicy::Reconnect => StaleAction::Nothing,
        }
    }
}

fn authority_of(state: &ConnectionState) -> Authority {
    match state {
        ConnectionState::Connected => Authority::Stream,
        ConnectionState::Connecting { .. } | ConnectionState::Disconnected { .. } => Authority::Poll,
        ConnectionState::Idle => Authority::None,
    }
}
