//! Push transports.
//!
//! A push transport turns an endpoint URL into a stream of raw text
//! messages. Decoding is the caller's job ([`crate::event::decode_frame`]),
//! reconnection too: a transport reports one connection's life and nothing
//! more.
//!
//! - `http` / `https` endpoints use the event-stream transport ([`sse`]).
//! - `ws` / `wss` endpoints use the socket transport ([`socket`]) with
//!   client-driven keepalive.

pub mod socket;
pub mod sse;
mod tls;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use url::Url;

use crate::error::Error;
use crate::transport::ClientContext;

/// Messages from one established push connection.
///
/// `Err` means the connection broke; the end of the stream means it
/// closed. Either way the connection is finished.
pub type FrameStream = BoxStream<'static, Result<String, Error>>;

/// Opens push connections.
///
/// The returned future resolves once the transport is established, so the
/// caller can tell "connecting" from "connected".
pub trait TransportFactory: Send + Sync + 'static {
    fn open(&self, endpoint: &Url) -> BoxFuture<'static, Result<FrameStream, Error>>;
}

/// Socket keepalive tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Idle time between keepalive pings. Default: 15s.
    pub interval: Duration,
    /// How long to wait for the matching pong. Default: 10s.
    pub grace: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            grace: Duration::from_secs(10),
        }
    }
}

/// Picks the transport from the endpoint scheme.
#[derive(Clone)]
pub struct DefaultTransportFactory {
    context: Arc<ClientContext>,
    stream_client: reqwest::Client,
    keepalive: KeepaliveConfig,
}

impl DefaultTransportFactory {
    pub fn new(context: Arc<ClientContext>, keepalive: KeepaliveConfig) -> Result<Self, Error> {
        let stream_client = context.build_stream_client()?;
        Ok(Self {
            context,
            stream_client,
            keepalive,
        })
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn open(&self, endpoint: &Url) -> BoxFuture<'static, Result<FrameStream, Error>> {
        let endpoint = endpoint.clone();
        match endpoint.scheme() {
            "http" | "https" => {
                let client = self.stream_client.clone();
                let auth = self.context.authorization();
                Box::pin(async move { sse::connect(&client, endpoint, auth).await })
            }
            "ws" | "wss" => {
                let context = Arc::clone(&self.context);
                let keepalive = self.keepalive;
                Box::pin(async move { socket::connect(&endpoint, &context, keepalive).await })
            }
            other => {
                let scheme = other.to_owned();
                Box::pin(async move { Err(Error::UnsupportedScheme(scheme)) })
            }
        }
    }
}
