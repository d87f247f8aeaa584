//! Minimal cast endpoints
//!
//! `/cast/ws/pub` and `/cast/ws/sub` are the stripped-down surface: one
//! forward ring, no bundle direction, no events, no role bookkeeping
//! beyond the session itself.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use futures::StreamExt;

use crate::error::{Error, Result};
use crate::flow;
use crate::query::QueryOption;
use crate::registry::{attach, Role};
use crate::server::ws::{WsFrameSink, WsFrameSource};
use crate::server::AppState;

/// Dispatch one upgraded cast socket by API path.
pub(crate) async fn run_cast_ws(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    match qo.url.path.as_str() {
        "/cast/ws/pub" => run_publisher(state, socket, qo).await,
        "/cast/ws/sub" => run_subscriber(state, socket, qo).await,
        path => Err(Error::Validation(format!("not support cast api: {path}"))),
    }
}

async fn run_publisher(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let live = attach(&state.studio, &qo, &qo.url.path, &qo.url.addr, "", Role::CAST_PUBLISHER)?;

    let (_, stream) = socket.split();
    flow::pump_source_to_ring(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        WsFrameSource(stream),
        true,
    )
    .await
}

async fn run_subscriber(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let live = attach(&state.studio, &qo, &qo.url.path, &qo.url.addr, "", Role::CAST_SUBSCRIBER)?;

    let (sink, _) = socket.split();
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
