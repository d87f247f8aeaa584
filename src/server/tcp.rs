//! RSSP-TCP streaming endpoints
//!
//! Raw TCP (optionally TLS) carries the same roles as the WebSocket
//! surface. The first frame of a connection is an `RTXT` request line
//! `<path>?<query>`; after that the connection speaks framed slots. The
//! `p2p` path is a signalling directory (punch records) rather than a
//! data plane.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};
use crate::flow;
use crate::media::TrackMode;
use crate::protocol::{read_tcp_frame, write_tcp_frame, Frame, Mark};
use crate::query::QueryOption;
use crate::registry::{attach, Punch, PunchInfo, Role, Session, SessionInfo, State};
use crate::server::AppState;
use crate::transport::{FrameSink, FrameSource};

const REQUEST_DEADLINE: Duration = Duration::from_secs(3);
const ECHO_DEADLINE: Duration = Duration::from_secs(3);

/// Receive half of an RSSP-TCP connection
pub(crate) struct TcpFrameSource<R>(pub R);

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameSource for TcpFrameSource<R> {
    async fn recv_frame(&mut self, deadline: Duration) -> Result<Frame> {
        read_tcp_frame(&mut self.0, deadline).await
    }
}

/// Send half of an RSSP-TCP connection
pub(crate) struct TcpFrameSink<W>(pub W);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for TcpFrameSink<W> {
    async fn send_frame(&mut self, frame: &Frame, deadline: Duration) -> Result<()> {
        write_tcp_frame(&mut self.0, deadline, frame.mark, &frame.data).await?;
        Ok(())
    }
}

/// Run the plain RSSP-TCP listener. A zero port disables the listener;
/// the future then parks forever so the caller's supervision loop keeps
/// running.
pub async fn run_tcp_listener(state: AppState, port: u16) -> Result<()> {
    if port == 0 {
        std::future::pending::<()>().await;
        return Ok(());
    }
    let worker = state.studio.add_worker("/server/tcp/api", state.studio.id(), "system");
    let addr = format!("0.0.0.0:{port}");
    worker.set_endpoint("tcp", &addr);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "rssp tcp listener started");

    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        worker.stamp.touch_used();
        state.studio.watcher.opened();

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(state.clone(), socket, peer.to_string()).await {
                if e.is_benign() {
                    tracing::debug!(peer = %peer, error = %e, "tcp session ended");
                } else {
                    tracing::warn!(peer = %peer, error = %e, "tcp session failed");
                }
            }
            state.studio.watcher.closed();
        });
    }
}

/// Run the TLS RSSP-TCP listener. A zero port disables the listener.
pub async fn run_tls_listener(state: AppState, port: u16) -> Result<()> {
    if port == 0 {
        std::future::pending::<()>().await;
        return Ok(());
    }
    let acceptor = tls_acceptor(&state.config.pem_public, &state.config.pem_private)?;

    let worker = state.studio.add_worker("/server/tcps/api", state.studio.id(), "system");
    let addr = format!("0.0.0.0:{port}");
    worker.set_endpoint("tcps", &addr);

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "rssp tls listener started");

    loop {
        let (socket, peer) = listener.accept().await?;
        socket.set_nodelay(true)?;
        worker.stamp.touch_used();
        state.studio.watcher.opened();

        let state = state.clone();
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let result = async {
                let tls = acceptor.accept(socket).await?;
                handle_conn(state.clone(), tls, peer.to_string()).await
            }
            .await;
            if let Err(e) = result {
                if e.is_benign() {
                    tracing::debug!(peer = %peer, error = %e, "tls session ended");
                } else {
                    tracing::warn!(peer = %peer, error = %e, "tls session failed");
                }
            }
            state.studio.watcher.closed();
        });
    }
}

fn tls_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor> {
    use std::fs::File;
    use std::io::BufReader;

    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::Config(format!("read certs {cert_path}: {e}")))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))
        .map_err(|e| Error::Config(format!("read key {key_path}: {e}")))?
        .ok_or_else(|| Error::Config(format!("no private key in {key_path}")))?;

    let config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("tls config: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Parse the request line and dispatch one connection.
async fn handle_conn<S>(state: AppState, stream: S, peer: String) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut source = TcpFrameSource(read_half);
    let mut sink = TcpFrameSink(write_half);

    let request = source.recv_frame(REQUEST_DEADLINE).await?;
    if request.mark != Mark::Rtxt {
        return Err(Error::Framing(format!("invalid request mark: {}", request.mark)));
    }
    let line = String::from_utf8_lossy(&request.data).into_owned();
    tracing::debug!(peer = %peer, line = %line, "tcp request");

    let mut qo = QueryOption::from_request_line("tcp", &line)?;
    qo.url.addr = peer;
    state.studio.resolve_channel(&mut qo)?;

    match qo.url.path.as_str() {
        "/pang/tcp/eco" => run_reflector(&state, source, sink, &qo).await,
        "/pang/tcp/pub" => run_publisher(&state, source, sink, &qo).await,
        "/pang/tcp/sub" => run_subscriber(&state, source, sink, &qo).await,
        "/pang/tcp/meb" => run_medusa(&state, source, sink, &qo).await,
        "/pang/tcp/p2p" => run_peering(&state, &mut source, &mut sink, &qo).await,
        "/pang/tcp/tst" => run_tester(&state, &mut sink, &qo).await,
        path => Err(Error::Validation(format!("invalid tcp path: {path}"))),
    }
}

/// `/pang/tcp/eco`: echo frames back after one time-unit delay.
async fn run_reflector<S>(
    state: &AppState,
    source: TcpFrameSource<ReadHalf<S>>,
    sink: TcpFrameSink<WriteHalf<S>>,
    qo: &QueryOption,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut session = Session::new(qo.url.path.as_str());
    session.set_timeout(qo.session.timeout, &qo.session.unit);
    session.remote_addr = qo.url.addr.clone();
    let session = state.studio.add_session(session);

    let result = flow::pump_echo(Arc::clone(&session), source, sink, ECHO_DEADLINE).await;
    state.studio.delete_session(session.id());
    result
}

async fn run_publisher<S>(
    state: &AppState,
    source: TcpFrameSource<ReadHalf<S>>,
    sink: TcpFrameSink<WriteHalf<S>>,
    qo: &QueryOption,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let live = attach(&state.studio, qo, &qo.url.path, &qo.url.addr, "", Role::PUBLISHER)?;
    live.track.set_ring_len(qo.buffer.len);

    if live.track.mode() == TrackMode::Bundle {
        tokio::spawn(flow::pump_ring_to_sink(
            Arc::clone(live.track.back()),
            Arc::clone(&live.session),
            Arc::clone(&live.channel),
            Arc::clone(&live.track),
            sink,
            false,
        ));
    }
    flow::pump_source_to_ring(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        source,
        false,
    )
    .await
}

async fn run_subscriber<S>(
    state: &AppState,
    source: TcpFrameSource<ReadHalf<S>>,
    sink: TcpFrameSink<WriteHalf<S>>,
    qo: &QueryOption,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let live = attach(&state.studio, qo, &qo.url.path, &qo.url.addr, "", Role::SUBSCRIBER)?;

    if TrackMode::parse(&qo.track.mode) == TrackMode::Bundle {
        tokio::spawn(flow::pump_source_to_ring(
            Arc::clone(live.track.back()),
            Arc::clone(&live.session),
            Arc::clone(&live.channel),
            Arc::clone(&live.track),
            source,
            true,
        ));
    }
    flow::pump_ring_to_sink(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        sink,
        true,
    )
    .await
}

async fn run_medusa<S>(
    state: &AppState,
    source: TcpFrameSource<ReadHalf<S>>,
    sink: TcpFrameSink<WriteHalf<S>>,
    qo: &QueryOption,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let live = attach(&state.studio, qo, &qo.url.path, &qo.url.addr, "", Role::MEDUSA)?;

    tokio::spawn(flow::pump_source_to_ring(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        source,
        true,
    ));
    flow::pump_ring_to_sink(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        sink,
        false,
    )
    .await
}

/// `/pang/tcp/p2p`: the punch directory flow, selected by the `role`
/// query value.
async fn run_peering<R, W>(
    state: &AppState,
    source: &mut TcpFrameSource<R>,
    sink: &mut TcpFrameSink<W>,
    qo: &QueryOption,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let studio = &state.studio;
    let mut session = Session::new(qo.url.path.as_str());
    session.set_timeout(qo.session.timeout, &qo.session.unit);
    session.remote_addr = qo.url.addr.clone();
    let session = studio.add_session(session);

    let result = peering_flow(state, source, sink, qo, &session).await;
    studio.delete_session(session.id());
    result
}

async fn peering_flow<R, W>(
    state: &AppState,
    source: &mut TcpFrameSource<R>,
    sink: &mut TcpFrameSink<W>,
    qo: &QueryOption,
    session: &Arc<Session>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let studio = &state.studio;
    let name = format!("/{}/{}/{}", qo.channel.id, qo.source_label, qo.track_label);

    let punch = match qo.stream.role.as_str() {
        "/pang/tcp/pub" => {
            // create or refresh the directory record
            let punch = match studio.punch_by_name(&name) {
                Some(punch) => punch,
                None => studio.add_punch(Punch::new(&qo.channel.id, &qo.source_label, &qo.track_label)),
            };
            *punch.addr.lock() = qo.url.addr.clone();
            *punch.role.lock() = qo.stream.role.clone();
            punch.state.set(State::Idle);
            punch
        }
        "/pang/tcp/sub" => {
            let punch = studio
                .punch_by_name(&name)
                .ok_or_else(|| Error::NotFound(format!("punch {name}")))?;
            punch.state.set(State::Using);
            punch
        }
        "/pang/tcp/p2p/pub" | "/pang/tcp/p2p/sub" => {
            let punch = studio
                .punch_by_name(&name)
                .ok_or_else(|| Error::NotFound(format!("punch {name}")))?;
            *punch.session_id.lock() = session.id().to_string();

            // heartbeats keep the record alive until the peer drops
            loop {
                match source.recv_frame(session.time_over()).await {
                    Ok(_) => punch.stamp.expire_in(session.time_over()),
                    Err(e) => {
                        tracing::debug!(punch = %punch.name(), error = %e, "peer heartbeat ended");
                        break;
                    }
                }
            }
            if qo.stream.role == "/pang/tcp/p2p/pub" {
                studio.delete_punch(punch.id());
            }
            return Ok(());
        }
        role => return Err(Error::Validation(format!("invalid p2p role: {role}"))),
    };

    punch.stamp.touch_used();
    let info = serde_json::to_vec(&PunchInfo::of(&punch))?;
    sink.send_frame(&Frame { mark: Mark::Rtxt, data: info.into() }, session.time_over())
        .await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}

/// `/pang/tcp/tst`: validate the session setup and answer with the
/// session snapshot.
async fn run_tester<W>(state: &AppState, sink: &mut TcpFrameSink<W>, qo: &QueryOption) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut session = Session::new(qo.url.path.as_str());
    session.set_timeout(qo.session.timeout, &qo.session.unit);
    session.remote_addr = qo.url.addr.clone();
    let session = state.studio.add_session(session);

    let info = serde_json::to_vec(&SessionInfo::of(&session))?;
    let result = sink
        .send_frame(&Frame { mark: Mark::Rtxt, data: info.into() }, session.time_over())
        .await;

    state.studio.delete_session(session.id());
    result
}
