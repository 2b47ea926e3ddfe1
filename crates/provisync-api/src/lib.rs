// provisync-api: wire layer for live-synced dashboard resources.
//
// Response envelope codec, push event decoding, payload schema checks, the
// two push transports (event stream, socket) and the REST poll source.

pub mod envelope;
pub mod error;
pub mod event;
pub mod poll;
pub mod push;
pub mod schema;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use envelope::{DecodedEnvelope, ErrorEnvelope, SCHEMA_VIOLATION, SuccessEnvelope};
pub use error::Error;
pub use event::{EventKind, FrameOutcome, StreamEvent};
pub use poll::{PollSource, RestPollSource};
pub use push::{DefaultTransportFactory, FrameStream, KeepaliveConfig, TransportFactory};
pub use schema::{FieldKind, FieldSchema, PayloadSchema, SchemaWarning, Validated};
pub use transport::{ClientContext, TlsMode};
