//! Engine.IO v4 / Socket.IO v5 packet framing over a WebSocket.
//!
//! Every text frame on the socket is one Engine.IO packet: a type digit
//! followed by its body. Engine.IO `message` packets (`4`) carry one
//! Socket.IO packet, itself a type digit, an optional `/<namespace>,`
//! and a JSON body:
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                    ping / pong
//! 40/poem,                                                 namespace connect
//! 40/poem,{"sid":".."}                                     connect ack
//! 42/poem,["job:active",{"type":"active","jobId":".."}]   event
//! 44/poem,{"message":"Not authorized"}                     connect refused
//! ```
//!
//! Only the text protocol is implemented. Acknowledgement and binary
//! packets are decoded as [`Packet::Unsupported`].

use std::time::Duration;

use serde::Deserialize;

use crate::messages::{parse_event, FrameError, InboundFrame, OutboundFrame};

/// Engine.IO endpoint path on the server.
pub const ENGINE_PATH: &str = "/socket.io/";

/// Engine.IO protocol revision sent as the `EIO` query parameter.
pub const ENGINE_PROTOCOL: &str = "4";

pub const DEFAULT_NAMESPACE: &str = "/";

/// Reply to a server ping.
pub const PONG: &str = "3";

/// Heartbeat window used until the open packet says otherwise
/// (the server defaults, 25s interval plus 20s timeout).
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(45);

/// Body of the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
}

impl Handshake {
    /// Longest silence after which the server is presumed gone.
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// A decoded text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Noop,
    Connect {
        namespace: String,
        sid: Option<String>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        frame: InboundFrame,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
    /// Acks and binary packets. This client never asks for them.
    Unsupported {
        kind: char,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("Empty packet")]
    Empty,

    #[error("Unknown packet type {0:?}")]
    UnknownType(char),

    #[error("Invalid packet JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Deserialize)]
struct ConnectAck {
    sid: Option<String>,
}

#[derive(Deserialize)]
struct ConnectRefusal {
    message: String,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<Packet, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let body = chars.as_str();
    match kind {
        '0' => Ok(Packet::Open(serde_json::from_str(body)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_message(body),
        '6' => Ok(Packet::Noop),
        other => Err(PacketError::UnknownType(other)),
    }
}

/// Namespace connect request.
pub fn encode_connect(namespace: &str) -> String {
    format!("40{}", namespace_prefix(namespace))
}

/// Namespace disconnect, sent before closing the socket.
pub fn encode_disconnect(namespace: &str) -> String {
    format!("41{}", namespace_prefix(namespace))
}

/// Event packet for `frame` on `namespace`.
pub fn encode_event(namespace: &str, frame: &OutboundFrame) -> Result<String, serde_json::Error> {
    let args = serde_json::to_string(&frame.to_args())?;
    Ok(format!("42{}{args}", namespace_prefix(namespace)))
}

// ---- private helpers ----

fn decode_message(text: &str) -> Result<Packet, PacketError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(PacketError::Empty)?;
    let (namespace, body) = split_namespace(chars.as_str());
    let namespace = namespace.to_string();
    match kind {
        '0' => {
            let sid = if body.is_empty() {
                None
            } else {
                serde_json::from_str::<ConnectAck>(body)?.sid
            };
            Ok(Packet::Connect { namespace, sid })
        }
        '1' => Ok(Packet::Disconnect { namespace }),
        '2' => {
            // An ack id may sit between the namespace and the arguments.
            let args = body.trim_start_matches(|c: char| c.is_ascii_digit());
            Ok(Packet::Event {
                namespace,
                frame: parse_event(args)?,
            })
        }
        '4' => {
            let message = serde_json::from_str::<ConnectRefusal>(body)
                .map(|refusal| refusal.message)
                .unwrap_or_else(|_| body.to_string());
            Ok(Packet::ConnectError { namespace, message })
        }
        '3' | '5' | '6' => Ok(Packet::Unsupported { kind }),
        other => Err(PacketError::UnknownType(other)),
    }
}

/// `"/poem,rest"` becomes `("/poem", "rest")`. Without a leading slash
/// the packet belongs to the default namespace.
fn split_namespace(text: &str) -> (&str, &str) {
    if !text.starts_with('/') {
        return (DEFAULT_NAMESPACE, text);
    }
    text.split_once(',').unwrap_or((text, ""))
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE {
        String::new()
    } else {
        format!("{namespace},")
    }
}
