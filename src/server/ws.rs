//! WebSocket streaming endpoints
//!
//! `/pang/ws/pub|sub|meb|eco|evt|ctl|p2p` after the HTTP upgrade. The
//! socket splits into a receive half and a send half; bundle-mode roles
//! run one loop on each. WebSocket text/binary frame types stand in for
//! the RSSP marks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::flow;
use crate::media::TrackMode;
use crate::protocol::{Frame, Mark};
use crate::query::QueryOption;
use crate::registry::{attach, Role, Session, State};
use crate::server::ctl;
use crate::server::AppState;
use crate::transport::{share_sink, FrameSink, FrameSource};

/// Receive half of an accepted WebSocket
pub(crate) struct WsFrameSource(pub SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn recv_frame(&mut self, deadline: Duration) -> Result<Frame> {
        loop {
            let msg = timeout(deadline, self.0.next())
                .await?
                .ok_or(Error::Closed)??;
            match msg {
                Message::Text(text) => return Ok(Frame { mark: Mark::Rtxt, data: Bytes::from(text.into_bytes()) }),
                Message::Binary(data) => return Ok(Frame { mark: Mark::Rbin, data: Bytes::from(data) }),
                // keepalives refresh the deadline
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => return Err(Error::Closed),
            }
        }
    }
}

/// Send half of an accepted WebSocket
pub(crate) struct WsFrameSink(pub SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for WsFrameSink {
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

/// Dispatch one upgraded socket by API path.
pub(crate) async fn run_pang_ws(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    match qo.url.path.as_str() {
        "/pang/ws/eco" | "/pang/ws/echo" => run_reflector(state, socket, qo).await,
        "/pang/ws/ctl" => ctl::run_controller(state, socket, qo).await,
        "/pang/ws/pub" => run_publisher(state, socket, qo).await,
        "/pang/ws/sub" => run_subscriber(state, socket, qo).await,
        "/pang/ws/meb" => run_medusa(state, socket, qo).await,
        "/pang/ws/evt" => run_eventer(state, socket, qo).await,
        "/pang/ws/p2p" => run_peer_direct(state, socket, qo).await,
        path => Err(Error::Validation(format!("not support pang ws api: {path}"))),
    }
}

/// `/pang/ws/eco`: echo every frame back after one time-unit delay.
async fn run_reflector(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let mut session = Session::new(qo.url.path.as_str());
    session.set_timeout(qo.session.timeout, &qo.session.unit);
    session.remote_addr = qo.url.addr.clone();
    let session = state.studio.add_session(session);

    let (sink, stream) = socket.split();
    let deadline = session.time_over();
    let result = flow::pump_echo(Arc::clone(&session), WsFrameSource(stream), WsFrameSink(sink), deadline).await;

    state.studio.delete_session(session.id());
    result
}

/// `/pang/ws/pub`: one receive loop into the forward ring; bundle mode
/// adds a send loop on the backward ring.
async fn run_publisher(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let live = attach(&state.studio, &qo, &qo.url.path, &qo.url.addr, "", Role::PUBLISHER)?;
    live.track.set_ring_len(qo.buffer.len);

    let (sink, stream) = socket.split();
    if live.track.mode() == TrackMode::Bundle {
        tokio::spawn(flow::pump_ring_to_sink(
            Arc::clone(live.track.back()),
            Arc::clone(&live.session),
            Arc::clone(&live.channel),
            Arc::clone(&live.track),
            WsFrameSink(sink),
            false,
        ));
    }
    flow::pump_source_to_ring(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        WsFrameSource(stream),
        false,
    )
    .await
}

/// `/pang/ws/sub`: one send loop from the forward ring; bundle mode adds
/// a receive loop into the backward ring.
async fn run_subscriber(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let live = attach(&state.studio, &qo, &qo.url.path, &qo.url.addr, "", Role::SUBSCRIBER)?;

    let (sink, stream) = socket.split();
    if TrackMode::parse(&qo.track.mode) == TrackMode::Bundle {
        tokio::spawn(flow::pump_source_to_ring(
            Arc::clone(live.track.back()),
            Arc::clone(&live.session),
            Arc::clone(&live.channel),
            Arc::clone(&live.track),
            WsFrameSource(stream),
            true,
        ));
    }
    flow::pump_ring_to_sink(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        WsFrameSink(sink),
        true,
    )
    .await
}

/// `/pang/ws/meb`: every participant publishes and subscribes on the
/// forward ring; writes are serialized by the ring lock.
async fn run_medusa(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let live = attach(&state.studio, &qo, &qo.url.path, &qo.url.addr, "", Role::MEDUSA)?;

    let (sink, stream) = socket.split();
    tokio::spawn(flow::pump_source_to_ring(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        WsFrameSource(stream),
        true,
    ));
    flow::pump_ring_to_sink(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        WsFrameSink(sink),
        false,
    )
    .await
}

/// `/pang/ws/evt`: register as an event listener; a per-channel broker is
/// started on demand.
async fn run_eventer(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let studio = &state.studio;
    let channel = studio
        .channel(&qo.channel.id)
        .ok_or_else(|| Error::NotFound(format!("channel {}", qo.channel.id)))?;

    let mut session = Session::with_request(qo.url.path.as_str(), qo.session.reqid.as_str());
    session.set_timeout(qo.session.timeout, &qo.session.unit);
    session.channel_id = channel.id().to_string();
    session.remote_addr = qo.url.addr.clone();
    let session = studio.add_session(session);

    let (sink, _stream) = socket.split();
    let sink = share_sink(WsFrameSink(sink));
    channel.add_eventer(session.id(), Arc::clone(&sink));

    let result = eventer_loop(&state, &session, &channel, &sink, &qo).await;

    channel.push_event(studio, "evt-out", session.id(), session.name(), &session.request_id);
    channel.delete_eventer(session.id());
    studio.delete_session(session.id());
    studio.idle_channel_if_unused(channel.id());
    result
}

async fn eventer_loop(
    state: &AppState,
    session: &Arc<Session>,
    channel: &Arc<crate::registry::Channel>,
    sink: &crate::transport::SharedSink,
    qo: &QueryOption,
) -> Result<()> {
    // only one broker per channel
    if channel.event_state() == State::Idle {
        tokio::spawn(crate::event::channel_event_broker(
            qo.url.path.clone(),
            Arc::clone(&state.studio),
            Arc::clone(channel),
        ));
        for _ in 0..30 {
            if channel.event_state() == State::Using {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    channel.push_event(&state.studio, "evt-in", session.id(), session.name(), &session.request_id);

    // keep the connection and probe it
    while session.using() {
        tokio::time::sleep(Duration::from_secs(1)).await;
        sink.lock().await.send_ping(Duration::from_secs(3)).await?;
        if channel.event_state() == State::Idle {
            tracing::debug!(channel = %channel.id(), "no channel event broker");
            return Ok(());
        }
    }
    Ok(())
}

/// `/pang/ws/p2p`: at most two peers per channel; frames cross directly
/// between the partner sockets, no ring involved.
async fn run_peer_direct(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let live = attach(&state.studio, &qo, &qo.url.path, &qo.url.addr, "", Role::PEER)?;

    let (sink, stream) = socket.split();
    live.channel.add_peer(crate::registry::Peer {
        session_id: live.session.id().to_string(),
        source_label: live.session.source_label.clone(),
        track_label: live.session.track_label.clone(),
        sink: share_sink(WsFrameSink(sink)),
    })?;

    let result = peer_loop(&live, WsFrameSource(stream)).await;
    live.channel.delete_peer(live.session.id());
    result
}

async fn peer_loop(live: &crate::registry::Live, source: WsFrameSource) -> Result<()> {
    wait_for_partner(live).await?;
    let partner = live
        .channel
        .partner_sink(&live.session)
        .ok_or_else(|| Error::State("peer sink is not ready".into()))?;
    flow::pump_peer(Arc::clone(&live.session), source, partner).await
}

/// Wait until both peers are registered, bounded by the session's
/// deadline counted in time units.
async fn wait_for_partner(live: &crate::registry::Live) -> Result<()> {
    let unit = if live.session.time_unit().is_zero() {
        Duration::from_millis(1)
    } else {
        live.session.time_unit()
    };
    let rounds = (live.session.time_over().as_nanos() / unit.as_nanos().max(1)) as u64;

    let mut i = 0u64;
    while live.session.using() {
        if live.channel.peer_count() == 2 {
            return Ok(());
        }
        if i >= rounds {
            return Err(Error::Timeout);
        }
        tokio::time::sleep(unit).await;
        i += 1;
    }
    Ok(())
}
