// ── Stream connection ──
//
// Owns one live push connection to an endpoint: connect, decode frames,
// reconnect with exponential backoff, tear down on close. Events and state
// changes leave through a single ordered channel owned by the handle, so
// nothing is delivered once the handle is closed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use provisync_api::event::{FrameOutcome, decode_frame};
use provisync_api::{ErrorEnvelope, FrameStream, StreamEvent, TransportFactory};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ReconnectConfig;
use crate::diagnostics::{Counter, Diagnostics};

// ── ConnectionState ──────────────────────────────────────────────

/// Lifecycle of one stream connection.
///
/// `attempt` is the retry counter: 0 for the first try after a successful
/// connection (or open), incremented per failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting { attempt: u32 },
    Connected,
    Disconnected { attempt: u32, retry_in: Duration },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Short lowercase name, stable for machine output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { attempt } if *attempt > 0 => {
                write!(f, "connecting (attempt {})", attempt + 1)
            }
            Self::Disconnected { retry_in, .. } => {
                write!(f, "disconnected (retry in {:.1}s)", retry_in.as_secs_f64())
            }
            other => f.write_str(other.label()),
        }
    }
}

/// One item from a stream connection, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Event(StreamEvent),
    State(ConnectionState),
    /// Well-formed business error pushed by the backend.
    Rejected(ErrorEnvelope),
}

// ── Backoff calculation ──────────────────────────────────────────

/// Exponential backoff: `min(base * 2^attempt, max)`.
pub fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| config.base_delay.checked_mul(factor))
        .map_or(config.max_delay, |delay| delay.min(config.max_delay))
}

// ── StreamConnection ─────────────────────────────────────────────

/// Entry point for opening stream connections.
pub struct StreamConnection;

impl StreamConnection {
    /// Start connecting to `endpoint` and return the handle.
    ///
    /// Returns immediately; the first attempt runs on a spawned task, so this
    /// must be called inside a tokio runtime.
    pub fn open(
        endpoint: Url,
        transport: Arc<dyn TransportFactory>,
        reconnect: ReconnectConfig,
        diagnostics: Arc<Diagnostics>,
    ) -> StreamHandle {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let state_tx = Arc::new(state_tx);
        let cancel = CancellationToken::new();

        let driver = Driver {
            endpoint,
            transport,
            reconnect,
            diagnostics,
            update_tx,
            state_tx: Arc::clone(&state_tx),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        StreamHandle {
            updates: Some(update_rx),
            state_tx,
            cancel,
            task: Some(task),
        }
    }
}

/// Handle to a running stream connection.
///
/// Dropping the handle closes the connection.
pub struct StreamHandle {
    updates: Option<mpsc::UnboundedReceiver<StreamUpdate>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Next event or state change. `None` once closed.
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        self.updates.as_mut()?.recv().await
    }

    /// Observe the latest connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.updates.is_none()
    }

    /// Stop the connection. Idempotent.
    ///
    /// Cancels any pending reconnect, aborts the driver (dropping the
    /// transport) and discards undelivered updates. The state settles on
    /// [`ConnectionState::Idle`].
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.updates = None;
        self.state_tx.send_replace(ConnectionState::Idle);
        tracing::debug!("stream handle closed");
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Background reconnection loop ─────────────────────────────────

/// How one established connection ended.
enum Ended {
    Cancelled,
    Closed,
    Failed(provisync_api::Error),
}

struct Driver {
    endpoint: Url,
    transport: Arc<dyn TransportFactory>,
    reconnect: ReconnectConfig,
    diagnostics: Arc<Diagnostics>,
    update_tx: mpsc::UnboundedSender<StreamUpdate>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
}

impl Driver {
    /// Main loop: connect → read → on drop, backoff → reconnect.
    async fn run(self) {
        let mut attempt: u32 = 0;

        loop {
            self.publish(ConnectionState::Connecting { attempt });

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                result = self.transport.open(&self.endpoint) => result,
            };

            match opened {
                Ok(frames) => {
                    tracing::info!(endpoint = %self.endpoint, "stream connected");
                    attempt = 0;
                    self.publish(ConnectionState::Connected);

                    match self.read(frames).await {
                        Ended::Cancelled => break,
                        Ended::Closed => {
                            tracing::info!(endpoint = %self.endpoint, "stream closed by peer");
                        }
                        Ended::Failed(e) => {
                            tracing::info!(endpoint = %self.endpoint, error = %e, "stream dropped");
                        }
                    }
                }
                // Permanent failures (bad URL, TLS setup) are retried too.
                Err(e) if e.is_transient() => {
                    tracing::warn!(endpoint = %self.endpoint, error = %e, attempt, "stream connect failed");
                }
                Err(e) => {
                    tracing::error!(endpoint = %self.endpoint, error = %e, attempt, "stream connect failed, not transient");
                }
            }

            let delay = backoff_delay(attempt, &self.reconnect);
            self.diagnostics.record(Counter::Reconnects);
            tracing::debug!(?delay, attempt, "waiting before reconnect");
            self.publish(ConnectionState::Disconnected {
                attempt,
                retry_in: delay,
            });

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            attempt = attempt.saturating_add(1);
        }

        tracing::debug!(endpoint = %self.endpoint, "stream loop exiting");
    }

    async fn read(&self, mut frames: FrameStream) -> Ended {
        loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ended::Cancelled,
                frame = frames.next() => frame,
            };

            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Ended::Failed(e),
                None => return Ended::Closed,
            };
            tracing::trace!(len = text.len(), "stream frame");

            let update = match decode_frame(&text) {
                FrameOutcome::Event(event) => StreamUpdate::Event(event),
                FrameOutcome::Rejected(envelope) => {
                    tracing::warn!(
                        code = %envelope.code,
                        correlation_id = ?envelope.correlation_id,
                        "backend pushed an error"
                    );
                    StreamUpdate::Rejected(envelope)
                }
                FrameOutcome::Dropped { reason } => {
                    tracing::debug!(%reason, "dropping undecodable frame");
                    self.diagnostics.record(Counter::DroppedMessages);
                    continue;
                }
            };

            if self.update_tx.send(update).is_err() {
                return Ended::Cancelled;
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        let cancel = &self.cancel;
        let changed = self.state_tx.send_if_modified(|current| {
            // Checked under the channel lock so `close` always has the last word.
            if cancel.is_cancelled() || *current == state {
                return false;
            }
            *current = state.clone();
            true
        });
        if changed {
            let _ = self.update_tx.send(StreamUpdate::State(state));
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
