//! Server binary
//!
//! Loads the configuration, brings up the studio and the listeners, and
//! runs the periodic sweeper until interrupted. Exits 0 on a clean
//! shutdown, 1 on a fatal bind failure or missing channel config.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rssp_rs::client::check_bridges;
use rssp_rs::event::studio_event_broker;
use rssp_rs::registry::{Limits, Studio};
use rssp_rs::server::{run_http_server, run_tcp_listener, run_tls_listener, AppState, ServerConfig};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Ring-buffer fan-out streaming server
#[derive(Parser, Debug)]
#[command(name = "rssp-server", version, about)]
struct Args {
    /// Config file
    #[arg(short, long, default_value = "conf/moth.json")]
    config: String,

    /// HTTP/WebSocket port override
    #[arg(long)]
    port_http: Option<u16>,

    /// Plain RSSP-TCP port override (0 disables)
    #[arg(long)]
    tcp_plain: Option<u16>,

    /// TLS RSSP-TCP port override (0 disables)
    #[arg(long)]
    tcp_secure: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match ServerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration failed");
            return ExitCode::from(1);
        }
    };
    if let Some(port) = args.port_http {
        config.port_http = port;
    }
    if let Some(port) = args.tcp_plain {
        config.tcp_plain = port;
    }
    if let Some(port) = args.tcp_secure {
        config.tcp_secure = port;
    }
    if config.port_http == 0 && config.tcp_plain == 0 && config.tcp_secure == 0 {
        tracing::error!("no service ports configured");
        return ExitCode::from(1);
    }

    let config = Arc::new(config);
    let studio = Arc::new(Studio::new(
        &config.name,
        Limits { num_pubs: config.num_pubs, num_subs: config.num_subs },
    ));

    // the channel file is mandatory, the bridge file optional
    if let Err(e) = studio.load_channels(config.channels_path()) {
        tracing::error!(error = %e, "channel configuration is mandatory");
        return ExitCode::from(1);
    }
    if let Err(e) = studio.load_bridges(config.bridges_path()) {
        tracing::info!(error = %e, "no bridge configuration");
    }

    let state = AppState { studio: Arc::clone(&studio), config: Arc::clone(&config) };
    tracing::info!(
        name = %config.name,
        http = config.port_http,
        tcp = config.tcp_plain,
        tcps = config.tcp_secure,
        "server starting"
    );

    tokio::spawn(studio_event_broker(Arc::clone(&studio)));
    check_bridges(&studio, "ever").await;

    let mut http = tokio::spawn(run_http_server(state.clone()));
    let mut tcp = tokio::spawn(run_tcp_listener(state.clone(), config.tcp_plain));
    let mut tls = tokio::spawn(run_tls_listener(state.clone(), config.tcp_secure));
    let mut sweeper = tokio::spawn(run_sweeper(Arc::clone(&studio)));

    let fatal = tokio::select! {
        r = &mut http => ("http", r),
        r = &mut tcp => ("tcp", r),
        r = &mut tls => ("tcps", r),
        r = &mut sweeper => ("sweeper", r),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down on interrupt");
            if let Err(e) = studio.save_channels(config.channels_path()) {
                tracing::warn!(error = %e, "channel config not saved");
            }
            return ExitCode::SUCCESS;
        }
    };

    match fatal {
        (name, Ok(Err(e))) => tracing::error!(listener = name, error = %e, "listener failed"),
        (name, Err(e)) => tracing::error!(listener = name, error = %e, "listener panicked"),
        (name, Ok(Ok(()))) => tracing::error!(listener = name, "listener stopped unexpectedly"),
    }
    ExitCode::from(1)
}

/// The periodic sweeper: channel cleanup, punch expiry and `ever`
/// bridges, every 30 seconds.
async fn run_sweeper(studio: Arc<Studio>) -> rssp_rs::Result<()> {
    let worker = studio.add_worker("/checker/studio/sweep", studio.id(), "system");
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // immediate first tick

    while worker.state.using() {
        ticker.tick().await;
        studio.sweep();
        check_bridges(&studio, "ever").await;
        worker.stamp.touch_used();
    }
    studio.delete_worker(worker.id());
    Ok(())
}
