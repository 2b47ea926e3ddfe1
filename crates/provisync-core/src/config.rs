// ── Runtime subscription configuration ──
//
// These types describe *how* one resource is kept in sync. They never touch
// disk: the config crate or the CLI builds them and hands them in.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use provisync_api::{PayloadSchema, PollSource};
use serde::{Deserialize, Serialize};
use url::Url;

/// Exponential backoff for stream reconnection.
///
/// `delay = min(base_delay * 2^attempt, max_delay)`, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub base_delay: Duration,
    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// What to do when the view goes stale while nothing else has noticed.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StalePolicy {
    /// Only report staleness through the freshness signal.
    #[default]
    Passive,
    /// Issue one out-of-band poll per stale episode, even while connected.
    Resnapshot,
    /// Tear the stream down and reopen it if it is still "connected".
    Reconnect,
}

/// Where children live inside a snapshot payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLayout {
    /// Top-level field holding the child collection. Default: `children`.
    pub children_field: String,
    /// Field inside each child holding its stable key. Default: `id`.
    pub key_field: String,
    /// Optional RFC3339 field inside each child used as its update time.
    /// Children without one take the snapshot timestamp.
    pub timestamp_field: Option<String>,
}

impl Default for ResourceLayout {
    fn default() -> Self {
        Self {
            children_field: "children".into(),
            key_field: "id".into(),
            timestamp_field: None,
        }
    }
}

/// Configuration for one subscription.
#[derive(Clone)]
pub struct SubscriptionConfig {
    /// Push endpoint (`http(s)://` event stream or `ws(s)://` socket).
    pub stream_endpoint: Url,
    /// Poll cadence while the stream is not connected. Default: 10s.
    pub poll_interval: Duration,
    /// Freshness window. Default: 60s.
    pub stale_after: Duration,
    pub stale_policy: StalePolicy,
    pub reconnect: ReconnectConfig,
    pub layout: ResourceLayout,
    /// Business schema for snapshot payloads.
    pub schema: Option<Arc<dyn PayloadSchema>>,
    /// Business schema for individual child payloads.
    pub child_schema: Option<Arc<dyn PayloadSchema>>,
    /// Overrides the poll source configured on `LiveSync`.
    pub poll_source: Option<Arc<dyn PollSource>>,
    /// Fetch one snapshot right after subscribing. Default: true.
    pub initial_snapshot: bool,
    /// `null` in a `resource.changed` event removes the field. Default: true.
    pub null_removes_field: bool,
}

impl SubscriptionConfig {
    pub fn new(stream_endpoint: Url) -> Self {
        Self {
            stream_endpoint,
            poll_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(60),
            stale_policy: StalePolicy::default(),
            reconnect: ReconnectConfig::default(),
            layout: ResourceLayout::default(),
            schema: None,
            child_schema: None,
            poll_source: None,
            initial_snapshot: true,
            null_removes_field: true,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after = window;
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_layout(mut self, layout: ResourceLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_schema(mut self, schema: Arc<dyn PayloadSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_child_schema(mut self, schema: Arc<dyn PayloadSchema>) -> Self {
        self.child_schema = Some(schema);
        self
    }

    pub fn with_poll_source(mut self, source: Arc<dyn PollSource>) -> Self {
        self.poll_source = Some(source);
        self
    }

    pub fn with_initial_snapshot(mut self, enabled: bool) -> Self {
        self.initial_snapshot = enabled;
        self
    }

    pub fn with_null_removes_field(mut self, enabled: bool) -> Self {
        self.null_removes_field = enabled;
        self
    }
}

impl fmt::Debug for SubscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionConfig")
            .field("stream_endpoint", &self.stream_endpoint.as_str())
            .field("poll_interval", &self.poll_interval)
            .field("stale_after", &self.stale_after)
            .field("stale_policy", &self.stale_policy)
            .field("reconnect", &self.reconnect)
            .field("layout", &self.layout)
            .field("schema", &self.schema.is_some())
            .field("child_schema", &self.child_schema.is_some())
            .field("poll_source", &self.poll_source.is_some())
            .field("initial_snapshot", &self.initial_snapshot)
            .field("null_removes_field", &self.null_removes_field)
            .finish()
    }
}
