//! UDP data plane with WebSocket signalling
//!
//! `/pang/udp/pub` and `/pang/udp/sub` keep a WebSocket open for JSON
//! `offer`/`answer` negotiation and move the actual slots over a UDP
//! socket speaking RSSP suffix framing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::WebSocket;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::flow;
use crate::protocol::{recv_udp_frame, send_udp_frame, Frame};
use crate::query::QueryOption;
use crate::registry::{attach, Live, Role};
use crate::server::ctl::WsMessage;
use crate::server::ws::{WsFrameSink, WsFrameSource};
use crate::server::AppState;
use crate::transport::{FrameSink, FrameSource};

/// Address block exchanged in offers and answers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalAddr {
    /// `udp`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    /// Peer host
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Peer port
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,
}

/// Offer/answer payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamSignal {
    /// Data-plane endpoint
    #[serde(default)]
    pub addr: SignalAddr,
    /// Stream MIME; the publisher announces it, the subscriber learns it
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime: String,
}

/// Receiving side of a UDP data plane
pub(crate) struct UdpFrameSource(pub Arc<UdpSocket>);

#[async_trait]
impl FrameSource for UdpFrameSource {
    async fn recv_frame(&mut self, deadline: Duration) -> Result<Frame> {
        let (frame, _) = recv_udp_frame(&self.0, deadline).await?;
        Ok(frame)
    }
}

/// Sending side of a UDP data plane (connected socket)
pub(crate) struct UdpFrameSink(pub Arc<UdpSocket>);

#[async_trait]
impl FrameSink for UdpFrameSink {
    async fn send_frame(&mut self, frame: &Frame, deadline: Duration) -> Result<()> {
        send_udp_frame(&self.0, deadline, frame.mark, &frame.data).await
    }
}

/// Dispatch one signalling socket by API path.
pub(crate) async fn run_pang_udp(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    match qo.url.path.as_str() {
        "/pang/udp/pub" => run_publisher(state, socket, qo).await,
        "/pang/udp/sub" => run_subscriber(state, socket, qo).await,
        path => Err(Error::Validation(format!("not support pang udp api: {path}"))),
    }
}

async fn run_publisher(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let live = attach(&state.studio, &qo, &qo.url.path, &qo.url.addr, "", Role::UDP_PUBLISHER)?;

    let (sink, stream) = socket.split();
    let mut source = WsFrameSource(stream);
    let mut sink = WsFrameSink(sink);

    while live.session.using() {
        let request = recv_signal(&mut source, &live).await?;
        let reply = match request.kind.as_str() {
            "ping" => WsMessage::reply("pong", ""),
            "offer" => {
                let signal: StreamSignal = serde_json::from_str(&request.data)?;
                live.track.set_mime(signal.mime.as_str());

                let udp = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
                let local = udp.local_addr()?;
                tracing::debug!(session = %live.session.id(), addr = %local, "udp receive port opened");

                tokio::spawn(flow::pump_source_to_ring(
                    Arc::clone(live.track.fore()),
                    Arc::clone(&live.session),
                    Arc::clone(&live.channel),
                    Arc::clone(&live.track),
                    UdpFrameSource(udp),
                    true,
                ));

                let answer = StreamSignal {
                    addr: SignalAddr {
                        network: "udp".into(),
                        host: local.ip().to_string(),
                        port: local.port().to_string(),
                    },
                    mime: signal.mime,
                };
                WsMessage::reply("answer", serde_json::to_string(&answer)?)
            }
            kind => {
                tracing::warn!(kind = %kind, "unknown signalling message");
                continue;
            }
        };
        send_signal(&mut sink, &live, &reply).await?;
    }
    Ok(())
}

async fn run_subscriber(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let live = attach(&state.studio, &qo, &qo.url.path, &qo.url.addr, "", Role::UDP_SUBSCRIBER)?;

    let (sink, stream) = socket.split();
    let mut source = WsFrameSource(stream);
    let mut sink = WsFrameSink(sink);

    while live.session.using() {
        let request = recv_signal(&mut source, &live).await?;
        let reply = match request.kind.as_str() {
            "ping" => WsMessage::reply("pong", ""),
            "offer" => {
                let signal: StreamSignal = serde_json::from_str(&request.data)?;
                let remote = format!("{}:{}", signal.addr.host, signal.addr.port);

                let udp = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
                udp.connect(&remote).await?;
                let local = udp.local_addr()?;
                tracing::debug!(session = %live.session.id(), remote = %remote, "udp send port opened");

                tokio::spawn(flow::pump_ring_to_sink(
                    Arc::clone(live.track.fore()),
                    Arc::clone(&live.session),
                    Arc::clone(&live.channel),
                    Arc::clone(&live.track),
                    UdpFrameSink(udp),
                    true,
                ));

                let answer = StreamSignal {
                    addr: SignalAddr {
                        network: "udp".into(),
                        host: local.ip().to_string(),
                        port: local.port().to_string(),
                    },
                    mime: live.track.mime(),
                };
                WsMessage::reply("answer", serde_json::to_string(&answer)?)
            }
            kind => {
                tracing::warn!(kind = %kind, "unknown signalling message");
                continue;
            }
        };
        send_signal(&mut sink, &live, &reply).await?;
    }
    Ok(())
}

async fn recv_signal(source: &mut WsFrameSource, live: &Live) -> Result<WsMessage> {
    let frame = source.recv_frame(live.session.time_over()).await?;
    Ok(serde_json::from_slice(&frame.data)?)
}

async fn send_signal(sink: &mut WsFrameSink, live: &Live, msg: &WsMessage) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    sink.send_frame(&Frame::text(json), live.session.time_over()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_round_trip() {
        let offer = StreamSignal {
            addr: SignalAddr { network: "udp".into(), host: "10.0.0.2".into(), port: "5004".into() },
            mime: "video/h264".into(),
        };
        let json = serde_json::to_string(&offer).unwrap();
        let back: StreamSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.addr.host, "10.0.0.2");
        assert_eq!(back.mime, "video/h264");
    }

    #[test]
    fn test_signal_defaults() {
        let signal: StreamSignal = serde_json::from_str("{}").unwrap();
        assert!(signal.mime.is_empty());
        assert!(signal.addr.host.is_empty());
    }
}
