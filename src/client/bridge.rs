//! Bridge runners
//!
//! `check_bridges` is called at startup, on every sweep (`ever`) and from
//! the studio event broker after a `pub-in` (`auto`). Each qualifying
//! (source, track) pair gets its own dialer task; the bridge itself idles
//! back once its sessions are gone.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio_tungstenite::connect_async;

use crate::client::{WsClientSink, WsClientSource};
use crate::error::{Error, Result};
use crate::flow;
use crate::query::QueryOption;
use crate::registry::{attach, Bridge, BridgeAttr, BridgeDirection, Role, State, Studio};

const PUSH_LOCAL_API: &str = "/pang/ws/sub";
const PULL_LOCAL_API: &str = "/pang/ws/pub";

/// Track listing returned by a remote server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteTrack {
    /// Track label
    #[serde(default)]
    pub label: String,
    /// Stream MIME; tracks without one are skipped
    #[serde(default)]
    pub mime: String,
    /// Track mode, forwarded on the re-publish dial
    #[serde(default)]
    pub mode: String,
}

/// Source listing returned by a remote server
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteSource {
    /// Source label
    #[serde(default)]
    pub label: String,
    /// Tracks by label
    #[serde(default)]
    pub tracks: HashMap<String, RemoteTrack>,
}

/// Start every unblocked, non-running bridge with the given attribute.
pub async fn check_bridges(studio: &Arc<Studio>, attr: &str) {
    let attr = BridgeAttr::parse(attr);
    for bridge in studio.bridges() {
        if bridge.meta.blocked() || bridge.attr != attr {
            continue;
        }
        if bridge.state.using() {
            continue; // already running
        }
        if let Err(e) = start_bridge(studio, &bridge).await {
            tracing::warn!(bridge = %bridge.id(), name = %bridge.meta.name, error = %e, "bridge start failed");
        }
    }
}

/// Start one bridge in its configured direction.
pub async fn start_bridge(studio: &Arc<Studio>, bridge: &Arc<Bridge>) -> Result<()> {
    tracing::info!(bridge = %bridge.id(), name = %bridge.meta.name, direction = %bridge.direction.as_str(), "starting bridge");
    match bridge.direction {
        BridgeDirection::Push => start_push_bridge(studio, bridge).await,
        BridgeDirection::Pull => start_pull_bridge(studio, bridge).await,
    }
}

/// Stop a bridge by closing its sessions; the dial loops observe the
/// state on their next iteration.
pub fn stop_bridge(studio: &Studio, bridge_id: &str) -> Result<()> {
    let session = studio
        .session_by_bridge(bridge_id)
        .ok_or_else(|| Error::NotFound(format!("session of bridge {bridge_id}")))?;
    session.close();
    Ok(())
}

/// Push: for each local track with a known MIME, dial the remote
/// publisher endpoint and feed it from the local forward ring.
async fn start_push_bridge(studio: &Arc<Studio>, bridge: &Arc<Bridge>) -> Result<()> {
    let channel = studio
        .channel_in_state(&bridge.from.channel_id, State::Using)
        .map_err(|e| match e {
            Error::NotFound(_) | Error::State(_) => {
                Error::State(format!("no usable push channel {}", bridge.from.channel_id))
            }
            other => other,
        })?;

    for src in channel.sources() {
        if !bridge.from.source_label.is_empty() && bridge.from.source_label != src.label() {
            continue;
        }
        for trk in src.tracks() {
            if trk.mime().is_empty() {
                continue;
            }
            if !bridge.from.track_label.is_empty() && bridge.from.track_label != trk.label() {
                continue;
            }

            let from_query = format!(
                "channel={}&source={}&track={}&timeout={}",
                bridge.from.channel_id,
                src.label(),
                trk.label(),
                bridge.timeout
            );
            let to_url = format!(
                "{}://{}{}?{}",
                bridge.to.proto,
                bridge.to.addr,
                bridge.to.api,
                remap_query(bridge, src.label(), trk.label(), trk.mode().as_str())
            );

            let studio = Arc::clone(studio);
            let bridge = Arc::clone(bridge);
            tokio::spawn(async move {
                if let Err(e) = push_track(&studio, &bridge, &from_query, &to_url).await {
                    if e.is_benign() {
                        tracing::debug!(bridge = %bridge.id(), error = %e, "push track ended");
                    } else {
                        tracing::warn!(bridge = %bridge.id(), error = %e, "push track failed");
                    }
                }
            });
        }
    }
    Ok(())
}

async fn push_track(studio: &Arc<Studio>, bridge: &Arc<Bridge>, from_query: &str, to_url: &str) -> Result<()> {
    tracing::info!(bridge = %bridge.id(), url = %to_url, "dialing push target");

    let api = local_api(&bridge.from.api, PUSH_LOCAL_API);
    let qo = QueryOption::from_string("int", api, from_query)?;

    let (ws, _) = connect_async(to_url).await?;
    let (sink, _stream) = ws.split();

    bridge.state.set(State::Using);
    bridge.stamp.touch_used();

    let live = attach(studio, &qo, api, "", bridge.id(), Role::PUSHER)?;
    flow::pump_ring_to_sink(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        WsClientSink(sink),
        true,
    )
    .await
}

/// Pull: list the remote channel's tracks, dial each one on the remote
/// subscriber endpoint and re-publish into the local forward ring.
async fn start_pull_bridge(studio: &Arc<Studio>, bridge: &Arc<Bridge>) -> Result<()> {
    let sources = fetch_remote_sources(bridge).await?;

    studio
        .channel(&bridge.to.channel_id)
        .ok_or_else(|| Error::NotFound(format!("pull channel {}", bridge.to.channel_id)))?;

    for (slabel, src) in sources {
        if !bridge.from.source_label.is_empty() && bridge.from.source_label != slabel {
            continue;
        }
        for (tlabel, trk) in src.tracks {
            if trk.mime.is_empty() {
                continue;
            }
            if !bridge.from.track_label.is_empty() && bridge.from.track_label != tlabel {
                continue;
            }

            let from_url = format!(
                "{}://{}{}?channel={}&source={}&track={}&timeout={}",
                bridge.from.proto,
                bridge.from.addr,
                bridge.from.api,
                bridge.from.channel_id,
                slabel,
                tlabel,
                bridge.timeout
            );
            let to_query = remap_query(bridge, &slabel, &tlabel, &trk.mode);

            let studio = Arc::clone(studio);
            let bridge = Arc::clone(bridge);
            tokio::spawn(async move {
                if let Err(e) = pull_track(&studio, &bridge, &from_url, &to_query).await {
                    if e.is_benign() {
                        tracing::debug!(bridge = %bridge.id(), error = %e, "pull track ended");
                    } else {
                        tracing::warn!(bridge = %bridge.id(), error = %e, "pull track failed");
                    }
                }
            });
        }
    }
    Ok(())
}

async fn pull_track(studio: &Arc<Studio>, bridge: &Arc<Bridge>, from_url: &str, to_query: &str) -> Result<()> {
    tracing::info!(bridge = %bridge.id(), url = %from_url, "dialing pull origin");

    let (ws, _) = connect_async(from_url).await?;
    let (_sink, stream) = ws.split();

    let api = local_api(&bridge.to.api, PULL_LOCAL_API);
    let qo = QueryOption::from_string("ws", api, to_query)?;

    bridge.state.set(State::Using);
    bridge.stamp.touch_used();

    let live = attach(studio, &qo, api, "", bridge.id(), Role::PULLER)?;
    flow::pump_source_to_ring(
        Arc::clone(live.track.fore()),
        Arc::clone(&live.session),
        Arc::clone(&live.channel),
        Arc::clone(&live.track),
        WsClientSource(stream),
        false,
    )
    .await
}

/// The destination query, with source/track labels remapped when the
/// bridge configures overrides.
fn remap_query(bridge: &Bridge, source: &str, track: &str, mode: &str) -> String {
    let source = if bridge.to.source_label.is_empty() { source } else { bridge.to.source_label.as_str() };
    let track = if bridge.to.track_label.is_empty() { track } else { bridge.to.track_label.as_str() };
    format!(
        "channel={}&source={}&track={}&timeout={}&mode={}",
        bridge.to.channel_id, source, track, bridge.timeout, mode
    )
}

fn local_api<'a>(configured: &'a str, fallback: &'a str) -> &'a str {
    if configured.is_empty() {
        fallback
    } else {
        configured
    }
}

/// Ask the remote server for the channel's source/track listing.
async fn fetch_remote_sources(bridge: &Bridge) -> Result<HashMap<String, RemoteSource>> {
    let url = format!(
        "http://{}/manager/http/cmd?op=show&obj=channel&id={}&opt=track&format=json",
        bridge.from.addr, bridge.from.channel_id
    );
    tracing::debug!(url = %url, "listing remote resources");

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()?;
    let sources = client
        .get(&url)
        .send()
        .await?
        .json::<HashMap<String, RemoteSource>>()
        .await?;
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Spot;

    fn bridge_with_remap() -> Bridge {
        let mut b = Bridge::new("b1");
        b.to = Spot {
            proto: "ws".into(),
            addr: "peer:8276".into(),
            api: "/pang/ws/pub".into(),
            channel_id: "c40hp6epjh65aeq6ne51".into(),
            source_label: String::new(),
            track_label: "mirror".into(),
        };
        b.timeout = 10;
        b
    }

    #[test]
    fn test_remap_query_keeps_unmapped_labels() {
        let b = bridge_with_remap();
        let q = remap_query(&b, "base", "video", "single");
        assert!(q.contains("channel=c40hp6epjh65aeq6ne51"));
        assert!(q.contains("source=base"));
        assert!(q.contains("track=mirror")); // remapped
        assert!(q.contains("timeout=10"));
        assert!(q.contains("mode=single"));
    }

    #[test]
    fn test_local_api_fallback() {
        assert_eq!(local_api("", PUSH_LOCAL_API), "/pang/ws/sub");
        assert_eq!(local_api("/pang/ws/sub", PUSH_LOCAL_API), "/pang/ws/sub");
    }

    #[test]
    fn test_remote_listing_shape() {
        let json = r#"{
            "base": {"label": "base", "tracks": {
                "video": {"label": "video", "mime": "video/h264", "mode": "single"},
                "data": {"label": "data", "mime": "", "mode": "single"}
            }}
        }"#;
        let sources: HashMap<String, RemoteSource> = serde_json::from_str(json).unwrap();
        let base = &sources["base"];
        assert_eq!(base.tracks["video"].mime, "video/h264");
        assert!(base.tracks["data"].mime.is_empty());
    }
}
