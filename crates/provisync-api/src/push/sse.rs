//! Event-stream (server-sent events) push transport.
//!
//! One long-lived `GET` per connection. The server writes text frames:
//!
//! ```text
//! : comment
//! event: update
//! id: 42
//! data: {"success":true,
//! data:  "data":{...}}
//!
//! ```
//!
//! `data` lines are joined with `\n` and a blank line ends the message.
//! The server's `retry:` hint is ignored: reconnection timing belongs to
//! the caller's own backoff loop.

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL};
use url::Url;

use super::FrameStream;
use crate::error::Error;

/// One dispatched event-stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Incremental event-stream parser.
///
/// Chunks may split lines (or UTF-8 sequences) anywhere; bytes are
/// buffered until a full line is available. Lines end with `\n` or `\r\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: String,
    has_data: bool,
    event: Option<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every message it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                out.push(message);
            }
        }
        out
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "event" => self.event = Some(value.to_owned()),
            "id" => self.id = Some(value.to_owned()),
            // `retry` and unknown fields
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseMessage {
            event,
            id: self.id.clone(),
            data: std::mem::take(&mut self.data),
        })
    }
}

/// Open an event-stream connection.
///
/// Resolves once the response headers arrive with a 2xx status.
pub async fn connect(
    client: &reqwest::Client,
    url: Url,
    authorization: Option<String>,
) -> Result<FrameStream, Error> {
    tracing::info!(url = %url, "Connecting to event stream");

    let mut request = client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache");
    if let Some(auth) = authorization {
        request = request.header(AUTHORIZATION, auth);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    tracing::info!("Event stream connected");

    let mut body = response.bytes_stream();
    let frames = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for message in decoder.feed(&bytes) {
                        tracing::trace!(event = ?message.event, id = ?message.id, "event-stream message");
                        yield Ok(message.data);
                    }
                }
                Err(e) => {
                    yield Err(Error::Transport(e));
                    return;
                }
            }
        }
        // A partial message at end of stream is discarded.
        tracing::info!("Event stream ended");
    };

    Ok(Box::pin(frames))
}
