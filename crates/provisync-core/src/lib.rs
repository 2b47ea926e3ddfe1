//! Live-sync engine between `provisync-api` and dashboard consumers (CLI).
//!
//! Keeps one in-memory view of a remote resource current from two sources,
//! a push stream and a periodic REST poll:
//!
//! - **[`LiveSync`]**: Facade holding the injected transport factory, poll
//!   source and clock. [`subscribe()`](LiveSync::subscribe) spawns one driver
//!   task per resource and returns a [`Subscription`].
//!
//! - **[`StreamConnection`]**: One push connection with exponential-backoff
//!   reconnect. Emits events and [`ConnectionState`] changes in transport
//!   order through a channel owned by its [`StreamHandle`].
//!
//! - **[`Reconciler`]**: Folds snapshots and partial events into a
//!   [`ResourceView`] with last-write-wins by event time.
//!
//! - **[`Arbiter`]**: Decides whether push or poll is authoritative and what
//!   an elapsed freshness window triggers ([`StalePolicy`]).

pub mod arbiter;
pub mod clock;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod freshness;
pub mod model;
pub mod reconcile;
pub mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use arbiter::{Arbiter, Authority, StaleAction, Transition};
pub use clock::{Clock, TokioClock};
pub use config::{ReconnectConfig, ResourceLayout, StalePolicy, SubscriptionConfig};
pub use connection::{ConnectionState, StreamConnection, StreamHandle, StreamUpdate, backoff_delay};
pub use diagnostics::{Counter, Diagnostics, DiagnosticsSnapshot};
pub use error::CoreError;
pub use freshness::{Freshness, Source, UpdateStamp};
pub use model::{ChildEntry, ChildKey, ResourceView, Snapshot};
pub use reconcile::{ApplyOutcome, IgnoreReason, Reconciler, Update};
pub use subscription::{LiveSync, LiveSyncBuilder, Subscription, SyncStatus};

// Collaborator types callers need to configure a subscription.
pub use provisync_api::{
    ClientContext, DecodedEnvelope, ErrorEnvelope, KeepaliveConfig, PayloadSchema, PollSource,
    RestPollSource, TlsMode, TransportFactory,
};
