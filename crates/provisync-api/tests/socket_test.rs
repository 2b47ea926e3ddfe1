#![allow(clippy::unwrap_used)]
// Integration tests for the socket push transport against a local
// WebSocket server.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;

use provisync_api::{ClientContext, DefaultTransportFactory, Error, KeepaliveConfig, TransportFactory};

// ── Helpers ─────────────────────────────────────────────────────────

/// Accept one socket connection and hand it to `handler`.
///
/// Returns the endpoint and the `Authorization` header the client sent.
async fn serve_one<F, Fut>(handler: F) -> (Url, Arc<Mutex<Option<String>>>)
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let auth = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&auth);

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_hdr_async(tcp, move |req: &Request, resp: Response| {
            *seen.lock().unwrap() = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();
        handler(ws).await;
    });

    let url = Url::parse(&format!("ws://{addr}/ws/sessions/sess-1")).unwrap();
    (url, auth)
}

fn factory(endpoint: &Url, keepalive: KeepaliveConfig) -> DefaultTransportFactory {
    let ctx = ClientContext::new(endpoint.clone()).with_token(SecretString::from("t0k".to_string()));
    DefaultTransportFactory::new(Arc::new(ctx), keepalive).unwrap()
}

const FAST: KeepaliveConfig = KeepaliveConfig {
    interval: Duration::from_millis(200),
    grace: Duration::from_millis(300),
};

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_socket_yields_text_and_utf8_binary_frames() {
    let (url, auth) = serve_one(|mut ws| async move {
        ws.send(Message::text("{\"success\":true}")).await.unwrap();
        ws.send(Message::binary(b"{\"success\":false}".to_vec())).await.unwrap();
        ws.send(Message::binary(vec![0xff, 0xfe])).await.unwrap();
        ws.close(None).await.unwrap();
    })
    .await;

    let frames: Vec<String> = factory(&url, KeepaliveConfig::default())
        .open(&url)
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(frames, vec!["{\"success\":true}", "{\"success\":false}"]);
    assert_eq!(auth.lock().unwrap().as_deref(), Some("Bearer t0k"));
}

#[tokio::test]
async fn test_missing_pong_ends_the_stream_with_keepalive_timeout() {
    // Never reads, so pings are never answered.
    let (url, _) = serve_one(|ws| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(ws);
    })
    .await;

    let mut frames = factory(&url, FAST).open(&url).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(3), frames.next())
        .await
        .unwrap();
    match first {
        Some(Err(Error::KeepaliveTimeout { grace })) => assert_eq!(grace, FAST.grace),
        other => panic!("expected keepalive timeout, got {other:?}"),
    }
    assert!(frames.next().await.is_none());
}

#[tokio::test]
async fn test_answered_pings_keep_the_stream_open() {
    let (url, _) = serve_one(|mut ws| async move {
        // Reading drives tungstenite's automatic pong replies.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(1_200);
        while tokio::time::Instant::now() < deadline {
            let frame = tokio::time::timeout(Duration::from_millis(50), ws.next()).await;
            if frame.is_ok_and(|f| f.is_none()) {
                return;
            }
        }
        ws.send(Message::text("late")).await.unwrap();
        ws.close(None).await.unwrap();
    })
    .await;

    let frames: Vec<_> = factory(&url, FAST).open(&url).await.unwrap().collect().await;

    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], Ok(text) if text == "late"));
}
