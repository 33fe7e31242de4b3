//! Physical push transports.
//!
//! [`Transport`] is the seam between the reference-counted
//! [`ChannelConnection`](crate::connection::ChannelConnection) and the
//! wire. Its methods are synchronous: [`WsTransport`] spawns a session
//! task on `open` and buffers outbound frames until the Socket.IO
//! namespace handshake completes, so the tracking core never awaits the
//! network.

use std::ops::ControlFlow;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::SocketClient;
use crate::messages::{ChannelSignal, OutboundFrame};
use crate::packet;
use crate::processor::SessionProcessor;

/// A bidirectional push connection that can be opened and closed.
pub trait Transport: Send {
    /// Start connecting. Must not block.
    fn open(&mut self) -> Result<(), ChannelError>;

    /// Queue a frame for delivery.
    fn send(&mut self, frame: &OutboundFrame) -> Result<(), ChannelError>;

    /// Tear the connection down. Safe to call when already closed.
    fn close(&mut self);
}

/// Errors raised by transports and the connection wrapper.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// `send` was called with no session open.
    #[error("Channel is not connected")]
    NotConnected,

    /// The session task has stopped accepting frames.
    #[error("Channel session closed")]
    Closed,

    /// `open` was called outside a Tokio runtime.
    #[error("No async runtime available to open the channel")]
    NoRuntime,

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// WsTransport
// ---------------------------------------------------------------------------

/// WebSocket-backed [`Transport`].
///
/// Inbound frames and unexpected drops are reported as
/// [`ChannelSignal`]s on the receiver returned by [`WsTransport::new`].
pub struct WsTransport {
    client: Arc<SocketClient>,
    inbound: mpsc::UnboundedSender<ChannelSignal>,
    session: Option<Session>,
}

/// Bookkeeping for one spawned connection task.
struct Session {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    task_handle: tokio::task::JoinHandle<()>,
}

impl WsTransport {
    pub fn new(client: SocketClient) -> (Self, mpsc::UnboundedReceiver<ChannelSignal>) {
        let (inbound, inbound_rx) = mpsc::unbounded_channel();
        let transport = Self {
            client: Arc::new(client),
            inbound,
            session: None,
        };
        (transport, inbound_rx)
    }

    fn session_alive(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| !s.task_handle.is_finished())
    }
}

impl Transport for WsTransport {
    fn open(&mut self) -> Result<(), ChannelError> {
        if self.session_alive() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let client = Arc::clone(&self.client);
        let inbound = self.inbound.clone();
        let cancel_clone = cancel.clone();

        let task_handle = runtime.spawn(async move {
            run_session(&client, outbound_rx, &inbound, &cancel_clone).await;
        });

        self.session = Some(Session {
            outbound,
            cancel,
            task_handle,
        });
        Ok(())
    }

    fn send(&mut self, frame: &OutboundFrame) -> Result<(), ChannelError> {
        let session = self.session.as_ref().ok_or(ChannelError::NotConnected)?;
        let text = packet::encode_event(self.client.namespace(), frame)?;
        session.outbound.send(text).map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// One connection lifetime: connect, run the Engine.IO and namespace
/// handshakes, pump frames both ways, report how it ended.
///
/// Outbound frames wait in the queue until the namespace is connected.
/// A server silent for longer than its advertised ping interval plus
/// timeout is treated as gone. A cancelled session ends silently; any
/// other ending is reported as [`ChannelSignal::Disconnected`].
async fn run_session(
    client: &SocketClient,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound: &mpsc::UnboundedSender<ChannelSignal>,
    cancel: &CancellationToken,
) {
    let conn = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = client.connect() => result,
    };

    let conn = match conn {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(error = %e, "Event source connection failed");
            let _ = inbound.send(ChannelSignal::Disconnected {
                reason: e.to_string(),
            });
            return;
        }
    };

    let (mut sink, mut stream) = conn.ws_stream.split();
    let mut processor = SessionProcessor::new(client.namespace());
    let heartbeat = tokio::time::sleep(processor.heartbeat());
    tokio::pin!(heartbeat);

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if processor.is_connected() {
                    let leave = packet::encode_disconnect(client.namespace());
                    let _ = sink.send(Message::Text(leave)).await;
                }
                let _ = sink.send(Message::Close(None)).await;
                tracing::info!(client_id = %conn.client_id, "Channel session closed");
                return;
            }
            frame = outbound_rx.recv(), if processor.is_connected() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        tracing::error!(error = %e, "Failed to send frame");
                        break e.to_string();
                    }
                }
                None => return,
            },
            msg = stream.next() => {
                match processor.handle_ws_message(msg, inbound) {
                    ControlFlow::Break(reason) => break reason,
                    ControlFlow::Continue(Some(reply)) => {
                        if let Err(e) = sink.send(Message::Text(reply)).await {
                            tracing::error!(error = %e, "Failed to send reply");
                            break e.to_string();
                        }
                    }
                    ControlFlow::Continue(None) => {}
                }
                heartbeat.as_mut().reset(Instant::now() + processor.heartbeat());
            }
            () = &mut heartbeat => {
                tracing::warn!(client_id = %conn.client_id, "Event source stopped answering");
                break "ping timeout".to_string();
            }
        }
    };

    let _ = inbound.send(ChannelSignal::Disconnected { reason });
}
