//! Push-channel and REST plumbing for Verse generation jobs.
//!
//! Provides the Socket.IO packet codec and named-event types, a
//! WebSocket client, the [`Transport`](transport::Transport) seam with
//! its WebSocket implementation, the reference-counted
//! [`ChannelConnection`](connection::ChannelConnection) shared by every
//! tracked job, and the HTTP wrapper that enqueues generation jobs.

pub mod api;
pub mod client;
pub mod connection;
pub mod messages;
pub mod packet;
pub mod processor;
pub mod transport;
