//! HTTP/WebSocket server and transport listeners
//!
//! One axum router serves every WebSocket surface; separate tokio
//! listeners carry RSSP over plain and TLS TCP. Handlers upgrade first
//! and report refusals on the socket-closing error path, so the HTTP
//! status is always an accepted upgrade.

mod cast;
mod config;
pub mod ctl;
mod tcp;
mod udp;
pub(crate) mod ws;

pub use config::ServerConfig;
pub use ctl::WsMessage;
pub use tcp::{run_tcp_listener, run_tls_listener};
pub use udp::{SignalAddr, StreamSignal};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, OriginalUri, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::query::QueryOption;
use crate::registry::Studio;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// The registry
    pub studio: Arc<Studio>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
}

/// Build the HTTP router with every WebSocket endpoint registered.
pub fn router(state: AppState) -> Router {
    let pang_ws = [
        "/pang/ws/pub",
        "/pang/ws/sub",
        "/pang/ws/meb",
        "/pang/ws/eco",
        "/pang/ws/echo",
        "/pang/ws/evt",
        "/pang/ws/ctl",
        "/pang/ws/p2p",
        "/pang/ws/zeb",
    ];
    let pang_udp = ["/pang/udp/pub", "/pang/udp/sub"];
    let cast_ws = ["/cast/ws/pub", "/cast/ws/sub"];

    let mut router = Router::new();
    for path in pang_ws {
        router = router.route(path, get(pang_ws_handler));
    }
    for path in pang_udp {
        router = router.route(path, get(pang_udp_handler));
    }
    for path in cast_ws {
        router = router.route(path, get(cast_ws_handler));
    }

    let cors = if state.config.cors_allow {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the HTTP/WebSocket server until the listener fails.
pub async fn run_http_server(state: AppState) -> Result<()> {
    let port = state.config.port_http;
    let worker = state.studio.add_worker("/server/http/api", state.studio.id(), "system");
    let addr = format!("0.0.0.0:{port}");
    worker.set_endpoint("http/tcp", &addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "http server started");

    let app = router(state);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

fn query_options(
    path: &str,
    params: &HashMap<String, String>,
    addr: SocketAddr,
) -> QueryOption {
    let mut qo = QueryOption::from_pairs(params);
    qo.url.scheme = "ws".into();
    qo.url.path = path.to_string();
    qo.url.addr = addr.to_string();
    qo
}

async fn pang_ws_handler(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let mut qo = query_options(uri.path(), &params, addr);
    upgrade.on_upgrade(move |socket| async move {
        state.studio.watcher.opened();
        let result = match state.studio.resolve_channel(&mut qo) {
            Ok(()) => ws::run_pang_ws(state.clone(), socket, qo).await,
            Err(e) => Err(e),
        };
        report(uri.path(), &addr, result);
        state.studio.watcher.closed();
    })
}

async fn pang_udp_handler(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let mut qo = query_options(uri.path(), &params, addr);
    upgrade.on_upgrade(move |socket| async move {
        state.studio.watcher.opened();
        let result = match state.studio.resolve_channel(&mut qo) {
            Ok(()) => udp::run_pang_udp(state.clone(), socket, qo).await,
            Err(e) => Err(e),
        };
        report(uri.path(), &addr, result);
        state.studio.watcher.closed();
    })
}

async fn cast_ws_handler(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let mut qo = query_options(uri.path(), &params, addr);
    upgrade.on_upgrade(move |socket| async move {
        state.studio.watcher.opened();
        let result = match state.studio.resolve_channel(&mut qo) {
            Ok(()) => cast::run_cast_ws(state.clone(), socket, qo).await,
            Err(e) => Err(e),
        };
        report(uri.path(), &addr, result);
        state.studio.watcher.closed();
    })
}

/// One boundary log per session; disconnects and timeouts are routine.
fn report(path: &str, addr: &SocketAddr, result: Result<()>) {
    match result {
        Ok(()) => tracing::debug!(path = %path, peer = %addr, "session ended"),
        Err(e) if e.is_benign() => tracing::debug!(path = %path, peer = %addr, error = %e, "session ended"),
        Err(e) => tracing::warn!(path = %path, peer = %addr, error = %e, "session failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Limits;

    #[test]
    fn test_router_builds_with_all_routes() {
        let state = AppState {
            studio: Arc::new(Studio::new("t", Limits::default())),
            config: Arc::new(ServerConfig::default()),
        };
        // route registration panics on duplicates or malformed paths
        let _router = router(state);
    }
}
