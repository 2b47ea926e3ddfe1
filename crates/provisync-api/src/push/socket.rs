//! Socket (WebSocket) push transport with client-driven keepalive.
//!
//! After `interval` without a ping in flight the client sends a `Ping`
//! carrying a sequence number and expects the `Pong` with the same payload
//! within `grace`. A missed pong ends the stream with
//! [`Error::KeepaliveTimeout`], which callers treat exactly like a
//! transport-level close.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, interval_at, sleep_until};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use url::Url;

use super::{FrameStream, KeepaliveConfig, tls};
use crate::error::Error;
use crate::transport::ClientContext;

/// Open a socket connection.
///
/// Resolves once the WebSocket handshake completes.
pub async fn connect(
    url: &Url,
    context: &ClientContext,
    keepalive: KeepaliveConfig,
) -> Result<FrameStream, Error> {
    tracing::info!(url = %url, "Connecting to WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(auth) = context.authorization() {
        request = request.with_header("Authorization", auth);
    }

    let connector = tls::ws_connector(&context.tls)?;
    let handshake =
        tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
    let (ws_stream, _response) = tokio::time::timeout(context.timeout, handshake)
        .await
        .map_err(|_| Error::WebSocketConnect(format!("handshake timed out after {:?}", context.timeout)))?
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("WebSocket connected");

    let (mut write, mut read) = ws_stream.split();

    let frames = async_stream::stream! {
        let mut ping_timer = interval_at(Instant::now() + keepalive.interval, keepalive.interval);
        let mut seq: u64 = 0;
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline.unwrap_or_else(Instant::now);
            let step = tokio::select! {
                biased;
                () = sleep_until(deadline), if pong_deadline.is_some() => {
                    tracing::warn!(grace = ?keepalive.grace, "WebSocket keepalive timed out");
                    Step::Fail(Error::KeepaliveTimeout { grace: keepalive.grace })
                }
                _ = ping_timer.tick(), if pong_deadline.is_none() => {
                    seq += 1;
                    let payload = Bytes::copy_from_slice(&seq.to_be_bytes());
                    match write.send(Message::Ping(payload)).await {
                        Ok(()) => {
                            tracing::trace!(seq, "WebSocket keepalive ping");
                            pong_deadline = Some(Instant::now() + keepalive.grace);
                            Step::Continue
                        }
                        Err(e) => Step::Fail(Error::WebSocketConnect(e.to_string())),
                    }
                }
                frame = read.next() => {
                    let step = on_frame(frame, seq);
                    if matches!(step, Step::PongMatched) {
                        pong_deadline = None;
                        ping_timer.reset();
                    }
                    step
                }
            };

            match step {
                Step::Message(text) => yield Ok(text),
                Step::Fail(e) => {
                    yield Err(e);
                    break;
                }
                Step::End => break,
                Step::Continue | Step::PongMatched => {}
            }
        }
    };

    Ok(Box::pin(frames))
}

/// What one loop iteration produced.
enum Step {
    Message(String),
    PongMatched,
    Continue,
    Fail(Error),
    End,
}

fn on_frame(frame: Option<Result<Message, tungstenite::Error>>, seq: u64) -> Step {
    match frame {
        Some(Ok(Message::Text(text))) => Step::Message(text.as_str().to_owned()),
        Some(Ok(Message::Binary(bin))) => match String::from_utf8(bin.to_vec()) {
            Ok(text) => Step::Message(text),
            Err(_) => {
                tracing::debug!(len = bin.len(), "Dropping non-UTF-8 binary frame");
                Step::Continue
            }
        },
        Some(Ok(Message::Pong(payload))) => {
            if payload.as_ref() == seq.to_be_bytes().as_slice() {
                Step::PongMatched
            } else {
                tracing::trace!("Ignoring unmatched pong");
                Step::Continue
            }
        }
        Some(Ok(Message::Ping(_))) => {
            // tungstenite queues the pong reply itself
            tracing::trace!("WebSocket ping");
            Step::Continue
        }
        Some(Ok(Message::Close(frame))) => match frame {
            Some(cf) => {
                tracing::info!(
                    code = %cf.code,
                    reason = %cf.reason,
                    "WebSocket close frame received"
                );
                Step::Fail(Error::WebSocketClosed {
                    code: u16::from(cf.code),
                    reason: cf.reason.as_str().to_owned(),
                })
            }
            None => {
                tracing::info!("WebSocket close frame received (no payload)");
                Step::End
            }
        },
        Some(Ok(Message::Frame(_))) => Step::Continue,
        Some(Err(e)) => Step::Fail(Error::WebSocketConnect(e.to_string())),
        None => {
            tracing::info!("WebSocket stream ended");
            Step::End
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tungstenite::protocol::CloseFrame;
    use tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn text_frames_become_messages() {
        let step = on_frame(Some(Ok(Message::text("{\"success\":true}"))), 0);
        assert!(matches!(step, Step::Message(ref t) if t == "{\"success\":true}"));
    }

    #[test]
    fn matching_pong_clears_keepalive() {
        let pong = Message::Pong(Bytes::copy_from_slice(&3u64.to_be_bytes()));
        assert!(matches!(on_frame(Some(Ok(pong)), 3), Step::PongMatched));
    }

    #[test]
    fn stale_pong_is_ignored() {
        let pong = Message::Pong(Bytes::copy_from_slice(&2u64.to_be_bytes()));
        assert!(matches!(on_frame(Some(Ok(pong)), 3), Step::Continue));
    }

    #[test]
    fn close_frame_is_a_failure_with_code() {
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "restarting".into(),
        }));
        match on_frame(Some(Ok(close)), 0) {
            Step::Fail(Error::WebSocketClosed { code, reason }) => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "restarting");
            }
            _ => panic!("expected WebSocketClosed"),
        }
    }

    #[test]
    fn end_of_stream_ends() {
        assert!(matches!(on_frame(None, 0), Step::End));
    }

    #[test]
    fn invalid_utf8_binary_is_skipped() {
        let bin = Message::Binary(Bytes::from_static(&[0xff, 0xfe]));
        assert!(matches!(on_frame(Some(Ok(bin)), 0), Step::Continue));
    }
}
