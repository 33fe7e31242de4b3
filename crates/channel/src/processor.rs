//! WebSocket message processing.
//!
//! Turns raw frames read from the event source into [`ChannelSignal`]s
//! for the tracking core. [`SessionProcessor`] holds the per-connection
//! protocol state: the heartbeat window from the open packet and whether
//! the namespace handshake has completed. The session loop in
//! [`transport`](crate::transport) calls
//! [`SessionProcessor::handle_ws_message`] for every item the stream
//! yields, writes back any reply it returns and stops on `Break`.

use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::messages::ChannelSignal;
use crate::packet::{self, Packet, DEFAULT_HEARTBEAT, PONG};

/// Outcome of one stream item: `Continue(Some(reply))` asks the caller
/// to write `reply` back; `Break(reason)` ends the session.
pub type Flow = ControlFlow<String, Option<String>>;

/// Protocol state of one socket.
#[derive(Debug)]
pub struct SessionProcessor {
    namespace: String,
    heartbeat: Duration,
    connected: bool,
}

impl SessionProcessor {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            heartbeat: DEFAULT_HEARTBEAT,
            connected: false,
        }
    }

    /// `true` once the server acknowledged the namespace connect.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Longest silence tolerated before the session is considered dead.
    pub fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    /// Handle one item read from the WebSocket stream.
    ///
    /// Breaks on a close frame, a receive error, an exhausted stream, an
    /// Engine.IO close or a namespace disconnect or refusal.
    pub fn handle_ws_message(
        &mut self,
        msg: Option<Result<Message, WsError>>,
        inbound: &mpsc::UnboundedSender<ChannelSignal>,
    ) -> Flow {
        match msg {
            Some(Ok(Message::Text(text))) => self.handle_text_message(&text, inbound),
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!("Ignoring binary frame");
                ControlFlow::Continue(None)
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // WebSocket-level pings are answered by tungstenite.
                ControlFlow::Continue(None)
            }
            Some(Ok(Message::Frame(_))) => ControlFlow::Continue(None),
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Event source closed WebSocket");
                ControlFlow::Break("closed by server".to_string())
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "WebSocket receive error");
                ControlFlow::Break(e.to_string())
            }
            None => {
                tracing::info!("WebSocket stream exhausted");
                ControlFlow::Break("stream exhausted".to_string())
            }
        }
    }

    // ---- private helpers ----

    fn handle_text_message(
        &mut self,
        text: &str,
        inbound: &mpsc::UnboundedSender<ChannelSignal>,
    ) -> Flow {
        match packet::decode(text) {
            Ok(packet) => self.handle_packet(packet, inbound),
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Failed to parse packet");
                ControlFlow::Continue(None)
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet, inbound: &mpsc::UnboundedSender<ChannelSignal>) -> Flow {
        match packet {
            Packet::Open(handshake) => {
                tracing::debug!(sid = %handshake.sid, "Engine handshake received");
                self.heartbeat = handshake.heartbeat();
                ControlFlow::Continue(Some(packet::encode_connect(&self.namespace)))
            }
            Packet::Ping => ControlFlow::Continue(Some(PONG.to_string())),
            Packet::Pong | Packet::Noop => ControlFlow::Continue(None),
            Packet::Close => {
                tracing::info!("Event source closed the engine session");
                ControlFlow::Break("closed by server".to_string())
            }
            Packet::Unsupported { kind } => {
                tracing::trace!(kind = %kind, "Ignoring unsupported packet");
                ControlFlow::Continue(None)
            }
            Packet::Connect { namespace, .. }
            | Packet::Disconnect { namespace }
            | Packet::ConnectError { namespace, .. }
            | Packet::Event { namespace, .. }
                if namespace != self.namespace =>
            {
                tracing::trace!(namespace = %namespace, "Ignoring packet for another namespace");
                ControlFlow::Continue(None)
            }
            Packet::Connect { sid, .. } => {
                tracing::info!(namespace = %self.namespace, sid = ?sid, "Namespace connected");
                self.connected = true;
                let _ = inbound.send(ChannelSignal::Connected);
                ControlFlow::Continue(None)
            }
            Packet::Disconnect { .. } => {
                tracing::info!(namespace = %self.namespace, "Event source left the namespace");
                ControlFlow::Break("namespace disconnected by server".to_string())
            }
            Packet::ConnectError { message, .. } => {
                tracing::warn!(namespace = %self.namespace, message = %message, "Namespace connect refused");
                ControlFlow::Break(format!("namespace connect refused: {message}"))
            }
            Packet::Event { frame, .. } => {
                tracing::debug!(event = %frame.event, "Received frame");
                if inbound.send(ChannelSignal::Frame(frame)).is_err() {
                    tracing::debug!("Tracker gone, dropping frame");
                }
                ControlFlow::Continue(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<ChannelSignal>,
        mpsc::UnboundedReceiver<ChannelSignal>,
    ) {
        mpsc::unbounded_channel()
    }

    fn text(packet: &str) -> Option<Result<Message, WsError>> {
        Some(Ok(Message::Text(packet.into())))
    }

    #[test]
    fn open_packet_starts_namespace_connect() {
        let (tx, mut rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        let flow = processor.handle_ws_message(
            text(r#"0{"sid":"s1","upgrades":[],"pingInterval":300,"pingTimeout":200}"#),
            &tx,
        );

        assert_eq!(flow, ControlFlow::Continue(Some("40/poem,".to_string())));
        assert_eq!(processor.heartbeat(), Duration::from_millis(500));
        assert!(!processor.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn connect_ack_reports_connected() {
        let (tx, mut rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        let flow = processor.handle_ws_message(text(r#"40/poem,{"sid":"n1"}"#), &tx);

        assert_eq!(flow, ControlFlow::Continue(None));
        assert!(processor.is_connected());
        assert_matches!(rx.try_recv(), Ok(ChannelSignal::Connected));
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let (tx, _rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        assert_eq!(
            processor.handle_ws_message(text("2"), &tx),
            ControlFlow::Continue(Some("3".to_string()))
        );
    }

    #[test]
    fn namespaced_event_is_forwarded() {
        let (tx, mut rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        let flow = processor.handle_ws_message(
            text(r#"42/poem,["job:completed",{"type":"completed","jobId":"poetry:text:J1"}]"#),
            &tx,
        );

        assert_eq!(flow, ControlFlow::Continue(None));
        assert_matches!(rx.try_recv(), Ok(ChannelSignal::Frame(f)) if f.event == "job:completed");
    }

    #[test]
    fn packets_for_other_namespaces_are_ignored() {
        let (tx, mut rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        processor.handle_ws_message(text(r#"40/admin,{"sid":"x"}"#), &tx);
        processor.handle_ws_message(text(r#"42["job:active",{"type":"active"}]"#), &tx);
        let flow = processor.handle_ws_message(text("41/admin,"), &tx);

        assert_eq!(flow, ControlFlow::Continue(None));
        assert!(!processor.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn malformed_text_is_dropped() {
        let (tx, mut rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        let flow = processor.handle_ws_message(text("42/poem,{oops"), &tx);

        assert_eq!(flow, ControlFlow::Continue(None));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn binary_and_ping_frames_are_ignored() {
        let (tx, mut rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        assert_eq!(
            processor.handle_ws_message(Some(Ok(Message::Binary(vec![1, 2, 3]))), &tx),
            ControlFlow::Continue(None)
        );
        assert_eq!(
            processor.handle_ws_message(Some(Ok(Message::Ping(vec![]))), &tx),
            ControlFlow::Continue(None)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn refusal_and_disconnect_end_the_session() {
        let (tx, _rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        assert_eq!(
            processor.handle_ws_message(text(r#"44/poem,{"message":"Not authorized"}"#), &tx),
            ControlFlow::Break("namespace connect refused: Not authorized".to_string())
        );
        assert_matches!(
            processor.handle_ws_message(text("41/poem,"), &tx),
            ControlFlow::Break(_)
        );
        assert_matches!(processor.handle_ws_message(text("1"), &tx), ControlFlow::Break(_));
    }

    #[test]
    fn close_and_exhaustion_end_the_session() {
        let (tx, _rx) = channel();
        let mut processor = SessionProcessor::new("/poem");

        assert_matches!(
            processor.handle_ws_message(Some(Ok(Message::Close(None))), &tx),
            ControlFlow::Break(_)
        );
        assert_matches!(processor.handle_ws_message(None, &tx), ControlFlow::Break(_));
        assert_matches!(
            processor.handle_ws_message(Some(Err(WsError::ConnectionClosed)), &tx),
            ControlFlow::Break(_)
        );
    }
}
