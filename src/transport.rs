//! Transport seams for the streaming loops
//!
//! The publisher/subscriber loops are written once against these traits;
//! WebSocket (server and client), RSSP-TCP and RSSP-UDP endpoints provide
//! the implementations. Deadlines are applied per operation; a missed
//! deadline surfaces as [`Error::Timeout`] and an orderly peer close as
//! [`Error::Closed`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::protocol::Frame;

/// Receiving half of a framed transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive one frame within `deadline`. Transport-level keepalives
    /// (WebSocket ping/pong) are absorbed and refresh the deadline.
    async fn recv_frame(&mut self, deadline: std::time::Duration) -> Result<Frame>;
}

/// Sending half of a framed transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one frame within `deadline`.
    async fn send_frame(&mut self, frame: &Frame, deadline: std::time::Duration) -> Result<()>;

    /// Send a transport keepalive, where the transport has one. The
    /// default is a no-op; an error means the peer is gone.
    async fn send_ping(&mut self, _deadline: std::time::Duration) -> Result<()> {
        Ok(())
    }
}

/// A sink shared across tasks: peer-direct partners and event listeners
/// write to sinks owned by other sessions.
pub type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

/// Wrap a sink for sharing.
pub fn share_sink<S: FrameSink + 'static>(sink: S) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}
