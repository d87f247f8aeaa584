//! Outbound connections: the bridge dialers
//!
//! A bridge couples a local channel to a remote server over a client
//! WebSocket. Push re-publishes local tracks to the remote publisher
//! endpoint; pull subscribes remotely and re-publishes into the local
//! channel.

mod bridge;

pub use bridge::{check_bridges, start_bridge, stop_bridge};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::protocol::{Frame, Mark};
use crate::transport::{FrameSink, FrameSource};

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receive half of a dialed WebSocket
pub(crate) struct WsClientSource(pub SplitStream<ClientStream>);

#[async_trait]
impl FrameSource for WsClientSource {
    async fn recv_frame(&mut self, deadline: Duration) -> Result<Frame> {
        loop {
            let msg = timeout(deadline, self.0.next())
                .await?
                .ok_or(Error::Closed)??;
            match msg {
                Message::Text(text) => {
                    return Ok(Frame { mark: Mark::Rtxt, data: Bytes::from(text.into_bytes()) })
                }
                Message::Binary(data) => return Ok(Frame { mark: Mark::Rbin, data: Bytes::from(data) }),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                Message::Close(_) => return Err(Error::Closed),
            }
        }
    }
}

/// Send half of a dialed WebSocket
pub(crate) struct WsClientSink(pub SplitSink<ClientStream, Message>);

#[async_trait]
impl FrameSink for WsClientSink {
    async fn send_frame(&mut self, frame: &Frame, deadline: Duration) -> Result<()> {
        let msg = if frame.mark.is_text() {
            Message::Text(String::from_utf8_lossy(&frame.data).into_owned())
        } else {
            Message::Binary(frame.data.to_vec())
        };
        timeout(deadline, self.0.send(msg)).await??;
        Ok(())
    }

    async fn send_ping(&mut self, deadline: Duration) -> Result<()> {
        timeout(deadline, self.0.send(Message::Ping(b"ka".to_vec()))).await??;
        Ok(())
    }
}
