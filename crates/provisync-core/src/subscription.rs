// ── LiveSync facade ──
//
// `LiveSync` holds the injected collaborators (transport factory, poll
// source, clock) and hands out `Subscription`s. Each subscription runs one
// driver task that owns the stream handle, the poll timer, the stale
// deadline and the resource view; the caller only ever sees published
// snapshots.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, OptionFuture};
use provisync_api::{
    ClientContext, DecodedEnvelope, DefaultTransportFactory, ErrorEnvelope, KeepaliveConfig,
    PollSource, TransportFactory,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::arbiter::{Arbiter, StaleAction, Transition};
use crate::clock::{Clock, TokioClock};
use crate::config::SubscriptionConfig;
use crate::connection::{ConnectionState, StreamConnection, StreamHandle, StreamUpdate};
use crate::diagnostics::{Counter, Diagnostics, DiagnosticsSnapshot};
use crate::error::CoreError;
use crate::freshness::{Freshness, Source, UpdateStamp};
use crate::model::{ResourceView, Snapshot};
use crate::reconcile::{Reconciler, Update};

type PollFuture = BoxFuture<'static, Result<DecodedEnvelope, provisync_api::Error>>;

// ── LiveSync ─────────────────────────────────────────────────────

/// Entry point for live-synced resource views.
///
/// Cheaply cloneable via `Arc<LiveSyncInner>`. Subscriptions share the
/// transport, poll source, clock and diagnostics counters.
#[derive(Clone)]
pub struct LiveSync {
    inner: Arc<LiveSyncInner>,
}

struct LiveSyncInner {
    transport: Arc<dyn TransportFactory>,
    poll_source: Option<Arc<dyn PollSource>>,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<Diagnostics>,
}

impl LiveSync {
    pub fn builder() -> LiveSyncBuilder {
        LiveSyncBuilder::default()
    }

    /// Start syncing one resource.
    ///
    /// Returns immediately; connecting and the initial snapshot happen on a
    /// spawned task, so this must be called inside a tokio runtime.
    pub fn subscribe(
        &self,
        resource_id: impl Into<String>,
        config: SubscriptionConfig,
    ) -> Result<Subscription, CoreError> {
        if config.poll_interval.is_zero() {
            return Err(CoreError::Config {
                message: "poll_interval must be greater than zero".into(),
            });
        }

        let resource_id = resource_id.into();
        let poll = config
            .poll_source
            .clone()
            .or_else(|| self.inner.poll_source.clone());
        let reconciler = Reconciler::new(config.layout.clone(), Arc::clone(&self.inner.diagnostics))
            .with_schema(config.schema.clone())
            .with_child_schema(config.child_schema.clone())
            .with_null_removes_field(config.null_removes_field);

        let (view_tx, view_rx) = watch::channel(Arc::new(ResourceView::new(resource_id.clone())));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());
        let view_tx = Arc::new(view_tx);
        let state_tx = Arc::new(state_tx);
        let status_tx = Arc::new(status_tx);
        let cancel = CancellationToken::new();
        let stale_after = config.stale_after;

        let driver = SyncDriver {
            view: ResourceView::new(resource_id.clone()),
            arbiter: Arbiter::new(config.stale_policy),
            resource_id: resource_id.clone(),
            config,
            transport: Arc::clone(&self.inner.transport),
            poll,
            clock: Arc::clone(&self.inner.clock),
            diagnostics: Arc::clone(&self.inner.diagnostics),
            reconciler,
            view_tx: Arc::clone(&view_tx),
            state_tx: Arc::clone(&state_tx),
            status_tx: Arc::clone(&status_tx),
            cancel: cancel.clone(),
        };

        let span = tracing::info_span!("subscription", resource = %resource_id);
        let task = tokio::spawn(driver.run().instrument(span));

        Ok(Subscription {
            resource_id,
            view_rx,
            state_rx,
            status_rx,
            view_tx,
            state_tx,
            status_tx,
            stale_after,
            clock: Arc::clone(&self.inner.clock),
            cancel,
            task: Some(task),
        })
    }

    /// One-shot snapshot through the configured poll source.
    ///
    /// A business error comes back as `DecodedEnvelope::Error`, not as `Err`.
    pub async fn fetch(&self, resource_id: &str) -> Result<DecodedEnvelope, CoreError> {
        let Some(poll) = self.inner.poll_source.as_ref() else {
            return Err(CoreError::Config {
                message: "no poll source configured".into(),
            });
        };
        self.inner.diagnostics.record(Counter::Polls);
        Ok(poll.fetch(resource_id).await?)
    }

    /// Counters shared by every subscription of this instance.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.inner.diagnostics.snapshot()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }
}

/// Builder for [`LiveSync`].
///
/// Either `transport` or `context` must be set; `context` builds the
/// default SSE/WebSocket transport.
#[derive(Default)]
pub struct LiveSyncBuilder {
    transport: Option<Arc<dyn TransportFactory>>,
    context: Option<Arc<ClientContext>>,
    keepalive: KeepaliveConfig,
    poll_source: Option<Arc<dyn PollSource>>,
    clock: Option<Arc<dyn Clock>>,
}

impl LiveSyncBuilder {
    pub fn transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn context(mut self, context: Arc<ClientContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn poll_source(mut self, source: Arc<dyn PollSource>) -> Self {
        self.poll_source = Some(source);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<LiveSync, CoreError> {
        let transport: Arc<dyn TransportFactory> = match (self.transport, self.context) {
            (Some(transport), _) => transport,
            (None, Some(context)) => Arc::new(DefaultTransportFactory::new(context, self.keepalive)?),
            (None, None) => {
                return Err(CoreError::Config {
                    message: "either a transport or a client context is required".into(),
                });
            }
        };

        Ok(LiveSync {
            inner: Arc::new(LiveSyncInner {
                transport,
                poll_source: self.poll_source,
                clock: self.clock.unwrap_or_else(|| Arc::new(TokioClock::new())),
                diagnostics: Arc::new(Diagnostics::new()),
            }),
        })
    }
}

// ── Subscription ─────────────────────────────────────────────────

/// Bookkeeping published alongside the view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatus {
    pub last_update: Option<UpdateStamp>,
    /// Latest business error from either path. Not cleared by later successes.
    pub last_error: Option<ErrorEnvelope>,
    /// How many times the freshness window elapsed without an update.
    pub stale_episodes: u64,
}

/// A live view of one resource.
///
/// Dropping the subscription tears it down.
pub struct Subscription {
    resource_id: String,
    view_rx: watch::Receiver<Arc<ResourceView>>,
    state_rx: watch::Receiver<ConnectionState>,
    status_rx: watch::Receiver<SyncStatus>,
    view_tx: Arc<watch::Sender<Arc<ResourceView>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Current view.
    pub fn data(&self) -> Arc<ResourceView> {
        self.view_rx.borrow().clone()
    }

    pub fn watch_data(&self) -> watch::Receiver<Arc<ResourceView>> {
        self.view_rx.clone()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Freshness as of now.
    pub fn freshness(&self) -> Freshness {
        let last = self.status_rx.borrow().last_update;
        Freshness::evaluate(last, self.clock.now(), self.stale_after)
    }

    pub fn last_error(&self) -> Option<ErrorEnvelope> {
        self.status_rx.borrow().last_error.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait until the view, the connection state or the status changes.
    ///
    /// Returns `false` once the subscription has been torn down.
    pub async fn changed(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            r = self.view_rx.changed() => r.is_ok(),
            r = self.state_rx.changed() => r.is_ok(),
            r = self.status_rx.changed() => r.is_ok(),
            () = self.cancel.cancelled() => false,
        }
    }

    /// Stop the stream handle and the poll timer. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // The driver publishes only while holding a channel lock and after
        // checking the token. Taking each lock once waits out any publish
        // already past that check, so nothing lands after this returns.
        self.view_tx.send_if_modified(|_| false);
        self.status_tx.send_if_modified(|_| false);
        self.state_tx.send_replace(ConnectionState::Idle);
        debug!(resource = %self.resource_id, "unsubscribed");
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ── Driver task ──────────────────────────────────────────────────

struct SyncDriver {
    resource_id: String,
    config: SubscriptionConfig,
    transport: Arc<dyn TransportFactory>,
    poll: Option<Arc<dyn PollSource>>,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<Diagnostics>,
    reconciler: Reconciler,
    arbiter: Arbiter,
    view: ResourceView,
    view_tx: Arc<watch::Sender<Arc<ResourceView>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    status_tx: Arc<watch::Sender<SyncStatus>>,
    cancel: CancellationToken,
}

impl SyncDriver {
    async fn run(mut self) {
        let mut stream = self.open_stream();

        let mut poll_timer = tokio::time::interval(self.config.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll_timer.tick().await; // consume the immediate first tick

        let mut in_flight: Option<PollFuture> = None;
        if self.config.initial_snapshot {
            in_flight = self.start_poll("initial");
        }

        // Window start on the injected clock, so stale triggers agree with
        // `Subscription::freshness`.
        let mut stale_since = self.clock.now();
        let mut stale_armed = true;

        loop {
            let poll_due = self.arbiter.should_poll() && self.poll.is_some() && in_flight.is_none();
            let stale_at = Instant::now() + self.stale_remaining(stale_since);

            let accepted = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                update = stream.next_update() => {
                    let Some(update) = update else { break };
                    self.on_stream_update(update, &mut poll_timer)
                }
                Some(result) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                    in_flight = None;
                    self.on_poll_result(result)
                }
                _ = poll_timer.tick(), if poll_due => {
                    in_flight = self.start_poll("interval");
                    false
                }
                () = tokio::time::sleep_until(stale_at), if stale_armed => {
                    // A clock slower than tokio time: wait out the rest.
                    if !self.stale_remaining(stale_since).is_zero() {
                        continue;
                    }
                    stale_armed = false;
                    self.update_status(|s| s.stale_episodes += 1);
                    debug!(window = ?self.config.stale_after, "view went stale");

                    match self.arbiter.on_stale(self.poll.is_some(), in_flight.is_some()) {
                        StaleAction::Nothing => {}
                        StaleAction::Poll => in_flight = self.start_poll("stale"),
                        StaleAction::Reconnect => {
                            info!("stream silent past freshness window, reconnecting");
                            stream.close();
                            stream = self.open_stream();
                        }
                    }
                    false
                }
            };

            if accepted {
                stale_since = self.clock.now();
                stale_armed = true;
            }
        }

        stream.close();
    }

    /// Time left in the freshness window, read from the injected clock.
    fn stale_remaining(&self, since: DateTime<Utc>) -> Duration {
        let elapsed = (self.clock.now() - since).to_std().unwrap_or(Duration::ZERO);
        self.config.stale_after.saturating_sub(elapsed)
    }

    fn open_stream(&self) -> StreamHandle {
        StreamConnection::open(
            self.config.stream_endpoint.clone(),
            Arc::clone(&self.transport),
            self.config.reconnect,
            Arc::clone(&self.diagnostics),
        )
    }

    fn start_poll(&self, reason: &'static str) -> Option<PollFuture> {
        let poll = self.poll.as_ref()?;
        self.diagnostics.record(Counter::Polls);
        debug!(reason, "polling snapshot");
        Some(poll.fetch(&self.resource_id))
    }

    /// Returns whether the view changed.
    fn on_stream_update(
        &mut self,
        update: StreamUpdate,
        poll_timer: &mut tokio::time::Interval,
    ) -> bool {
        match update {
            StreamUpdate::State(state) => {
                match self.arbiter.observe(state.clone()) {
                    Transition::Degraded => {
                        debug!(state = %state, "stream degraded, polling resumes");
                        poll_timer.reset();
                    }
                    Transition::Restored => debug!("stream restored, polling suspended"),
                    Transition::Unchanged => {}
                }
                self.publish_state(state);
                false
            }
            StreamUpdate::Event(event) => self.apply(Update::Event(event), Source::Stream),
            StreamUpdate::Rejected(envelope) => {
                self.record_error(envelope);
                false
            }
        }
    }

    fn on_poll_result(&mut self, result: Result<DecodedEnvelope, provisync_api::Error>) -> bool {
        match result {
            Ok(DecodedEnvelope::Success(success)) => {
                let timestamp = success.timestamp.unwrap_or_else(|| self.clock.now());
                let snapshot = Snapshot::new(success.payload, timestamp);
                self.apply(Update::Snapshot(snapshot), Source::Poll)
            }
            Ok(DecodedEnvelope::Error(envelope)) if envelope.is_schema_violation() => {
                self.diagnostics.record(Counter::SchemaWarnings);
                warn!(message = %envelope.message, "poll returned a malformed body");
                false
            }
            Ok(DecodedEnvelope::Error(envelope)) => {
                self.record_error(envelope);
                false
            }
            Err(e) => {
                warn!(error = %e, "poll failed");
                false
            }
        }
    }

    fn apply(&mut self, update: Update, source: Source) -> bool {
        let outcome = self.reconciler.apply(&mut self.view, update);
        if !outcome.is_accepted() {
            debug!(?outcome, %source, "update not applied");
            return false;
        }

        tracing::trace!(?outcome, %source, revision = self.view.revision, "update applied");
        self.publish_view(Arc::new(self.view.clone()));
        let stamp = UpdateStamp {
            source,
            at: self.clock.now(),
        };
        self.update_status(|s| s.last_update = Some(stamp));
        true
    }

    fn record_error(&self, envelope: ErrorEnvelope) {
        self.diagnostics.record(Counter::BusinessErrors);
        warn!(
            code = %envelope.code,
            retryable = envelope.retryable,
            correlation_id = envelope.correlation_id.as_deref().unwrap_or("-"),
            "business error: {}",
            envelope.message
        );
        self.update_status(|s| s.last_error = Some(envelope));
    }

    // Every publish checks the token under the watch lock; see `unsubscribe`.

    fn publish_view(&self, view: Arc<ResourceView>) {
        self.view_tx.send_if_modified(|current| {
            if self.cancel.is_cancelled() {
                return false;
            }
            *current = view;
            true
        });
    }

    fn update_status(&self, modify: impl FnOnce(&mut SyncStatus)) {
        self.status_tx.send_if_modified(|status| {
            if self.cancel.is_cancelled() {
                return false;
            }
            modify(status);
            true
        });
    }

    fn publish_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if self.cancel.is_cancelled() || *current == state {
                return false;
            }
            *current = state;
            true
        });
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use provisync_api::SuccessEnvelope;
    use serde_json::json;

    use crate::config::StalePolicy;
    use crate::connection::tests::{ScriptedTransport, child_frame, endpoint};

    /// Counts calls and replays one canned result.
    struct FakePoll {
        calls: AtomicUsize,
        response: Mutex<Result<DecodedEnvelope, String>>,
    }

    impl FakePoll {
        fn new(response: Result<DecodedEnvelope, String>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Mutex::new(response),
            })
        }

        fn snapshot(payload: serde_json::Value) -> Arc<Self> {
            Self::new(Ok(DecodedEnvelope::Success(SuccessEnvelope {
                payload,
                correlation_id: None,
                timestamp: None,
            })))
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PollSource for FakePoll {
        fn fetch(&self, _resource_id: &str) -> PollFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.response.lock().unwrap().clone();
            Box::pin(async move { response.map_err(provisync_api::Error::WebSocketConnect) })
        }
    }

    fn live_sync(transport: &Arc<ScriptedTransport>, poll: &Arc<FakePoll>) -> LiveSync {
        LiveSync::builder()
            .transport(Arc::clone(transport) as Arc<dyn TransportFactory>)
            .poll_source(Arc::clone(poll) as Arc<dyn PollSource>)
            .build()
            .unwrap()
    }

    fn config() -> SubscriptionConfig {
        SubscriptionConfig::new(endpoint()).with_initial_snapshot(false)
    }

    async fn secs(n: u64) {
        tokio::time::sleep(Duration::from_secs(n)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn polls_only_while_the_stream_is_down() {
        let transport = ScriptedTransport::new();
        let frames = transport.push_connection();
        let poll = FakePoll::snapshot(json!({ "children": [] }));
        let sync = live_sync(&transport, &poll);
        let sub = sync.subscribe("sess-1", config()).unwrap();

        secs(60).await;
        assert!(sub.current_state().is_connected());
        assert_eq!(poll.calls(), 0);

        // Link drops: first poll one full interval later, then every 10s.
        drop(frames);
        secs(35).await;
        assert_eq!(poll.calls(), 3);

        // Retries at +1, +3, +7, +15, +31 fail; the one at +61 succeeds.
        let _frames = transport.push_connection();
        secs(30).await;
        assert!(sub.current_state().is_connected());
        assert_eq!(poll.calls(), 6);

        secs(100).await;
        assert_eq!(poll.calls(), 6);
        assert_eq!(sync.diagnostics().polls, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_snapshot_populates_the_view() {
        let transport = ScriptedTransport::new();
        let poll = FakePoll::snapshot(json!({
            "title": "rack 4",
            "children": [{ "id": "a" }, { "id": "b" }, { "id": "c" }]
        }));
        let sync = live_sync(&transport, &poll);
        let mut sub = sync
            .subscribe("sess-1", config().with_initial_snapshot(true))
            .unwrap();

        while sub.data().len() < 3 {
            assert!(sub.changed().await);
        }
        let view = sub.data();
        assert_eq!(view.field("title"), Some(&json!("rack 4")));
        assert!(view.child("b").is_some());
        assert_eq!(sub.freshness().source, Some(Source::Poll));
        assert!(!sub.freshness().is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_events_update_freshness_and_go_stale_after_the_window() {
        let transport = ScriptedTransport::new();
        let frames = transport.push_connection();
        let poll = FakePoll::snapshot(json!({}));
        let sync = live_sync(&transport, &poll);
        let mut sub = sync
            .subscribe("sess-1", config().with_stale_after(Duration::from_secs(300)))
            .unwrap();

        assert!(sub.freshness().is_stale, "never updated");

        frames.send(Ok(child_frame("dev-1", "2026-01-01T00:00:00Z"))).unwrap();
        while sub.data().is_empty() {
            assert!(sub.changed().await);
        }
        let fresh = sub.freshness();
        assert_eq!(fresh.source, Some(Source::Stream));
        assert!(!fresh.is_stale);

        secs(300).await;
        assert!(!sub.freshness().is_stale);
        secs(1).await;
        assert!(sub.freshness().is_stale);
        assert_eq!(sub.status().stale_episodes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resnapshot_policy_polls_once_per_stale_episode() {
        let transport = ScriptedTransport::new();
        let _frames = transport.push_connection();
        let poll = FakePoll::snapshot(json!({ "children": [] }));
        let sync = live_sync(&transport, &poll);
        let _sub = sync
            .subscribe(
                "sess-1",
                config()
                    .with_stale_after(Duration::from_secs(30))
                    .with_stale_policy(StalePolicy::Resnapshot),
            )
            .unwrap();

        secs(45).await;
        assert_eq!(poll.calls(), 1);

        // Each accepted snapshot re-arms the window: polls at 30, 60, 90.
        secs(50).await;
        assert_eq!(poll.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_resnapshot_does_not_rearm() {
        let transport = ScriptedTransport::new();
        let _frames = transport.push_connection();
        let poll = FakePoll::new(Err("connection reset".into()));
        let sync = live_sync(&transport, &poll);
        let sub = sync
            .subscribe(
                "sess-1",
                config()
                    .with_stale_after(Duration::from_secs(30))
                    .with_stale_policy(StalePolicy::Resnapshot),
            )
            .unwrap();

        secs(200).await;
        assert_eq!(poll.calls(), 1);
        assert_eq!(sub.status().stale_episodes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_policy_reopens_a_silent_stream() {
        let transport = ScriptedTransport::new();
        let _first = transport.push_connection();
        let _second = transport.push_connection();
        let poll = FakePoll::snapshot(json!({}));
        let sync = live_sync(&transport, &poll);
        let sub = sync
            .subscribe(
                "sess-1",
                config()
                    .with_stale_after(Duration::from_secs(30))
                    .with_stale_policy(StalePolicy::Reconnect),
            )
            .unwrap();

        secs(20).await;
        assert_eq!(transport.opens(), 1);

        secs(25).await;
        assert_eq!(transport.opens(), 2);
        assert!(sub.current_state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn business_error_from_poll_is_published() {
        let transport = ScriptedTransport::new();
        let poll = FakePoll::new(Ok(DecodedEnvelope::Error(ErrorEnvelope {
            code: "RATE_LIMITED".into(),
            message: "slow down".into(),
            retryable: true,
            retry_after_seconds: Some(5.0),
            details: None,
            correlation_id: Some("c2".into()),
            timestamp: None,
        })));
        let sync = live_sync(&transport, &poll);
        let mut sub = sync
            .subscribe("sess-1", config().with_initial_snapshot(true))
            .unwrap();

        while sub.last_error().is_none() {
            assert!(sub.changed().await);
        }
        let err = sub.last_error().unwrap();
        assert_eq!(err.code, "RATE_LIMITED");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert!(!sub.data().is_loaded());
        assert_eq!(sync.diagnostics().business_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_all_background_work() {
        let transport = ScriptedTransport::new();
        let poll = FakePoll::snapshot(json!({ "children": [] }));
        let sync = live_sync(&transport, &poll);
        let mut sub = sync
            .subscribe("sess-1", config().with_initial_snapshot(true))
            .unwrap();

        secs(25).await;
        assert!(poll.calls() >= 2);
        sub.unsubscribe();
        sub.unsubscribe();
        let (polls, opens) = (poll.calls(), transport.opens());

        secs(300).await;
        assert_eq!(poll.calls(), polls);
        assert_eq!(transport.opens(), opens);
        assert_eq!(sub.current_state(), ConnectionState::Idle);
        assert!(!sub.is_active());
        assert!(!sub.changed().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nothing_is_published_after_unsubscribe_returns() {
        for round in 0..50 {
            let transport = ScriptedTransport::new();
            let frames = transport.push_connection();
            let poll = FakePoll::snapshot(json!({}));
            let sync = live_sync(&transport, &poll);
            let mut sub = sync.subscribe("sess-1", config()).unwrap();

            let feeder = std::thread::spawn(move || {
                for i in 0..5_000 {
                    let frame = child_frame(&format!("dev-{i}"), "2026-01-01T00:00:00Z");
                    if frames.send(Ok(frame)).is_err() {
                        break;
                    }
                }
            });

            while sub.data().is_empty() {
                assert!(sub.changed().await);
            }
            sub.unsubscribe();
            let revision = sub.data().revision;
            let status = sub.status();

            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_eq!(sub.data().revision, revision, "round {round}");
            assert_eq!(sub.status(), status, "round {round}");
            feeder.join().unwrap();
        }
    }

    /// Wall clock that only moves when told to.
    struct ManualClock(Mutex<chrono::DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::TimeDelta::from_std(by).unwrap();
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> chrono::DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_policy_follows_the_injected_clock() {
        let transport = ScriptedTransport::new();
        let _frames = transport.push_connection();
        let poll = FakePoll::snapshot(json!({ "children": [] }));
        let clock = Arc::new(ManualClock(Mutex::new(
            chrono::DateTime::from_timestamp(1_767_225_600, 0).unwrap(),
        )));
        let sync = LiveSync::builder()
            .transport(Arc::clone(&transport) as Arc<dyn TransportFactory>)
            .poll_source(Arc::clone(&poll) as Arc<dyn PollSource>)
            .clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .build()
            .unwrap();
        let sub = sync
            .subscribe(
                "sess-1",
                config()
                    .with_initial_snapshot(true)
                    .with_stale_after(Duration::from_secs(30))
                    .with_stale_policy(StalePolicy::Resnapshot),
            )
            .unwrap();

        // Tokio time passes but the clock does not: nothing is stale.
        secs(100).await;
        assert_eq!(poll.calls(), 1);
        assert!(!sub.freshness().is_stale);
        assert_eq!(sub.status().stale_episodes, 0);

        clock.advance(Duration::from_secs(31));
        assert!(sub.freshness().is_stale);
        secs(30).await;
        assert_eq!(poll.calls(), 2);
        assert_eq!(sub.status().stale_episodes, 1);
    }

    #[tokio::test]
    async fn zero_poll_interval_is_rejected() {
        let transport = ScriptedTransport::new();
        let poll = FakePoll::snapshot(json!({}));
        let sync = live_sync(&transport, &poll);
        let err = sync
            .subscribe("sess-1", config().with_poll_interval(Duration::ZERO))
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn builder_requires_a_transport() {
        assert!(matches!(
            LiveSync::builder().build(),
            Err(CoreError::Config { .. })
        ));
    }
}
