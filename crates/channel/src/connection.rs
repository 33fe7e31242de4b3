//! Reference-counted push connection shared by all tracked jobs.
//!
//! Every live job holds one reference. [`ChannelConnection::ensure_connected`]
//! takes a reference and opens the transport if needed;
//! [`ChannelConnection::release`] drops one and closes the transport when
//! the last reference goes away. The connection holds no job state.

use crate::messages::OutboundFrame;
use crate::transport::{ChannelError, Transport};

/// Callback invoked with the drop reason when the connection is lost.
pub type DisconnectHandler = Box<dyn Fn(&str) + Send>;

pub struct ChannelConnection {
    transport: Box<dyn Transport>,
    refs: usize,
    open: bool,
    disconnect_handlers: Vec<DisconnectHandler>,
}

impl ChannelConnection {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            refs: 0,
            open: false,
            disconnect_handlers: Vec::new(),
        }
    }

    /// Take a reference, opening the transport if it is not open.
    ///
    /// On failure no reference is taken.
    pub fn ensure_connected(&mut self) -> Result<(), ChannelError> {
        if !self.open {
            self.transport.open()?;
            self.open = true;
            tracing::info!(refs = self.refs + 1, "Channel connected");
        }
        self.refs += 1;
        Ok(())
    }

    /// Drop a reference. The transport is closed when none remain.
    pub fn release(&mut self) {
        if self.refs == 0 {
            tracing::debug!("Channel release with no outstanding references");
            return;
        }
        self.refs -= 1;
        if self.refs == 0 {
            self.transport.close();
            if self.open {
                tracing::info!("Channel disconnected (no remaining references)");
            }
            self.open = false;
        }
    }

    /// Register a hook run on unexpected drops.
    pub fn on_disconnect(&mut self, handler: DisconnectHandler) {
        self.disconnect_handlers.push(handler);
    }

    /// Report an unexpected drop from the transport.
    ///
    /// Marks the connection closed so the next `ensure_connected`
    /// reopens it. References are kept: jobs still hold theirs.
    pub fn handle_disconnect(&mut self, reason: &str) {
        self.open = false;
        for handler in &self.disconnect_handlers {
            handler(reason);
        }
    }

    pub fn send(&mut self, frame: &OutboundFrame) -> Result<(), ChannelError> {
        self.transport.send(frame)
    }

    /// Close regardless of outstanding references.
    pub fn close_all(&mut self) {
        self.refs = 0;
        self.open = false;
        self.transport.close();
    }

    pub fn ref_count(&self) -> usize {
        self.refs
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
