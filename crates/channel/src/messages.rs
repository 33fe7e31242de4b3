//! Push-channel event types and parser.
//!
//! The event source is a Socket.IO namespace. Each event carries an
//! argument array `["<name>", {...}]`. [`packet`](crate::packet) strips
//! the Engine.IO and Socket.IO framing. This module turns the argument
//! array into an [`InboundFrame`] and describes outbound requests as
//! [`OutboundFrame`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use verse_core::job::JobId;
use verse_core::job_events::EVENT_JOIN;

/// A named event received from the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Channel name: a global `job:*` name or a job id for room acks.
    pub event: String,
    pub data: FramePayload,
}

/// Payload carried by inbound frames.
///
/// All fields are optional on the wire; the dispatcher decides which
/// ones a given channel requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    /// Event type, e.g. `"joined"` or `"completed"`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Job the event belongs to. Absent on room acknowledgements.
    pub job_id: Option<String>,
    /// Worker-supplied failure reason.
    pub reason: Option<String>,
}

/// A named request sent to the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundFrame {
    pub event: &'static str,
    pub data: Value,
}

impl OutboundFrame {
    /// Ask the worker to attach this connection to `job_id`'s room.
    pub fn join(job_id: &JobId) -> Self {
        Self {
            event: EVENT_JOIN,
            data: serde_json::json!({ "jobId": job_id }),
        }
    }

    /// The Socket.IO argument array: `["<event>", <data>]`.
    pub fn to_args(&self) -> Value {
        Value::Array(vec![Value::from(self.event), self.data.clone()])
    }
}

/// Signals delivered from a transport to the tracking core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// The namespace handshake completed.
    Connected,
    /// A parsed inbound frame.
    Frame(InboundFrame),
    /// The connection dropped without being asked to.
    Disconnected { reason: String },
}

/// Errors from decoding an event argument array.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event arguments must start with an event name")]
    MissingName,
}

/// Parse a Socket.IO event argument array into an [`InboundFrame`].
///
/// A missing payload becomes [`FramePayload::default`]. Extra
/// arguments are ignored. Callers should log errors and continue.
pub fn parse_event(args: &str) -> Result<InboundFrame, FrameError> {
    let args: Vec<Value> = serde_json::from_str(args)?;
    let mut args = args.into_iter();
    let Some(Value::String(event)) = args.next() else {
        return Err(FrameError::MissingName);
    };
    let data = match args.next() {
        Some(Value::Null) | None => FramePayload::default(),
        Some(value) => serde_json::from_value(value)?,
    };
    Ok(InboundFrame { event, data })
}
