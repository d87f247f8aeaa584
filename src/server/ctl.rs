//! Channel control surface
//!
//! `/pang/ws/ctl` accepts JSON control messages scoped to one channel:
//! info requests, stream-key and feature toggles, and session/channel
//! close commands. Errors are answered in-band as `{type: "error"}`
//! replies; the connection stays up.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::is_id;
use crate::protocol::Frame;
use crate::query::QueryOption;
use crate::registry::{Channel, ChannelInfo, Session, SessionInfo, SourceInfo, State, TrackInfo};
use crate::server::ws::{WsFrameSink, WsFrameSource};
use crate::server::AppState;
use crate::transport::{FrameSink, FrameSource};

/// JSON envelope for control requests and replies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsMessage {
    /// Message type (`ping`, `info_channel`, ... / `pong`, `channel`, `error`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Request arguments or reply payload, JSON-encoded
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    /// Optional name argument
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Optional path argument
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Client request id
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "req_id")]
    pub request_id: String,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_created: Option<DateTime<Utc>>,
}

impl WsMessage {
    /// A reply of `kind` carrying a JSON payload.
    pub fn reply(kind: &str, data: impl Into<String>) -> Self {
        Self { kind: kind.into(), data: data.into(), ..Default::default() }
    }

    /// An in-band error reply.
    pub fn error(err: &Error) -> Self {
        Self::reply("error", err.to_string())
    }
}

/// Request arguments carried in a control message's `data` field
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CtlQuery {
    /// Session selector
    #[serde(default)]
    pub session: CtlSession,
    /// Channel settings
    #[serde(default)]
    pub channel: CtlChannel,
    /// Source selector
    #[serde(default)]
    pub source: CtlLabel,
    /// Track selector
    #[serde(default)]
    pub track: CtlLabel,
}

/// Session selector part
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CtlSession {
    /// Target session id
    #[serde(default)]
    pub id: String,
    /// Name fragment filter
    #[serde(default)]
    pub name: String,
}

/// Channel settings part
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CtlChannel {
    /// Target channel id
    #[serde(default)]
    pub id: String,
    /// Stream key; `off` clears it
    #[serde(default)]
    pub key: String,
    /// Recording auto flag (`on`/`off`)
    #[serde(default)]
    pub record: String,
    /// Transcoding auto flag (`on`/`off`)
    #[serde(default)]
    pub trans: String,
}

/// A labelled selector
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CtlLabel {
    /// Label value
    #[serde(default)]
    pub label: String,
}

/// `/pang/ws/ctl`: take the channel into use and serve control messages
/// until the session or channel closes.
pub(crate) async fn run_controller(state: AppState, socket: WebSocket, qo: QueryOption) -> Result<()> {
    let studio = &state.studio;
    let channel = studio.use_channel(&qo.channel.id)?;

    let result = controller_loop(&state, socket, &channel, &qo).await;

    studio.idle_channel_if_unused(channel.id());
    result
}

async fn controller_loop(
    state: &AppState,
    socket: WebSocket,
    channel: &Arc<Channel>,
    qo: &QueryOption,
) -> Result<()> {
    if channel.meta.blocked() || !channel.is_valid_key(&qo.channel.key) {
        return Err(Error::Admission(format!(
            "not allowed to use: blocked {}, key {:?}",
            channel.meta.blocked(),
            qo.channel.key
        )));
    }

    let mut session = Session::new(qo.url.path.as_str());
    session.set_timeout(qo.session.timeout, &qo.session.unit);
    session.channel_id = channel.id().to_string();
    session.remote_addr = qo.url.addr.clone();
    let session = state.studio.add_session(session);

    let (sink, stream) = socket.split();
    let mut source = WsFrameSource(stream);
    let mut sink = WsFrameSink(sink);

    let result = async {
        while session.using() && channel.using() {
            let frame = source.recv_frame(session.time_over()).await?;
            let request: WsMessage = serde_json::from_slice(&frame.data)?;

            let reply = match proc_control(state, &session, channel, &request) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::debug!(session = %session.id(), kind = %request.kind, error = %e, "control error");
                    WsMessage::error(&e)
                }
            };
            let json = serde_json::to_string(&reply)?;
            sink.send_frame(&Frame::text(json), session.time_over()).await?;
        }
        Ok(())
    }
    .await;

    state.studio.delete_session(session.id());
    result
}

/// Handle one control message against the session's channel.
fn proc_control(
    state: &AppState,
    session: &Arc<Session>,
    channel: &Arc<Channel>,
    request: &WsMessage,
) -> Result<WsMessage> {
    let qo: CtlQuery = if request.data.is_empty() {
        CtlQuery::default()
    } else {
        serde_json::from_str(&request.data)?
    };

    match request.kind.as_str() {
        "ping" => Ok(WsMessage::reply("pong", "")),
        "info_channel" => {
            let info = ChannelInfo::of(channel);
            Ok(WsMessage::reply("channel", serde_json::to_string(&info)?))
        }
        "info_source" => {
            let src = channel
                .source(&qo.source.label)
                .ok_or_else(|| Error::NotFound(format!("source {}", qo.source.label)))?;
            Ok(WsMessage::reply("source", serde_json::to_string(&SourceInfo::of(&src))?))
        }
        "info_track" => {
            let (_, trk) = channel.source_track(&qo.source.label, &qo.track.label)?;
            Ok(WsMessage::reply("track", serde_json::to_string(&TrackInfo::of(&trk))?))
        }
        "set_buffer" => {
            // reserved: per-ring tuning through the control surface
            Ok(WsMessage::reply("buffer", ""))
        }
        "set_channel" => {
            match qo.channel.key.as_str() {
                "" => {}
                "off" => channel.set_stream_key(""),
                key => channel.set_stream_key(key),
            }
            match qo.channel.record.as_str() {
                "on" => channel.record.set_auto(true),
                "off" => channel.record.set_auto(false),
                _ => {}
            }
            match qo.channel.trans.as_str() {
                "on" => channel.trans.set_auto(true),
                "off" => channel.trans.set_auto(false),
                _ => {}
            }
            Ok(WsMessage::reply("channel", serde_json::to_string(&ChannelInfo::of(channel))?))
        }
        "close_channel" => {
            if !is_id(&qo.channel.id) {
                return Err(Error::Validation(format!("invalid channel id: {}", qo.channel.id)));
            }
            if channel.id() == qo.channel.id && channel.using() {
                state.studio.set_channel_state(channel.id(), State::Idle)?;
            }
            Ok(WsMessage::reply("channel", serde_json::to_string(&ChannelInfo::of(channel))?))
        }
        "show_session" => {
            let list = state.studio.sessions_by_channel(channel.id(), &qo.session.name);
            if list.is_empty() {
                return Err(Error::NotFound(format!("session for {:?}", qo.session.name)));
            }
            let infos: Vec<SessionInfo> = list.iter().map(|s| SessionInfo::of(s)).collect();
            Ok(WsMessage::reply("session", serde_json::to_string(&infos)?))
        }
        "info_session" => Ok(WsMessage::reply("session", serde_json::to_string(&SessionInfo::of(session))?)),
        "close_session" => {
            if !is_id(&qo.session.id) {
                return Err(Error::Validation(format!("invalid session id: {}", qo.session.id)));
            }
            let target = state
                .studio
                .session_in_channel(channel.id(), &qo.session.id)
                .ok_or_else(|| Error::NotFound(format!("session {}", qo.session.id)))?;
            target.close();
            Ok(WsMessage::reply("session", serde_json::to_string(&SessionInfo::of(&target))?))
        }
        kind => Err(Error::Validation(format!("unknown message type: {kind}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ChannelStyle, Limits, Studio};
    use crate::server::config::ServerConfig;

    fn state() -> AppState {
        AppState {
            studio: Arc::new(Studio::new("t", Limits::default())),
            config: Arc::new(ServerConfig::default()),
        }
    }

    fn parts(state: &AppState) -> (Arc<Session>, Arc<Channel>) {
        let ch = state.studio.add_channel(Channel::new("t1", ChannelStyle::Static));
        let mut s = Session::new("/pang/ws/ctl");
        s.channel_id = ch.id().to_string();
        let s = state.studio.add_session(s);
        (s, ch)
    }

    fn request(kind: &str, data: &str) -> WsMessage {
        WsMessage { kind: kind.into(), data: data.into(), ..Default::default() }
    }

    #[test]
    fn test_ping_pong() {
        let st = state();
        let (s, ch) = parts(&st);
        let reply = proc_control(&st, &s, &ch, &request("ping", "")).unwrap();
        assert_eq!(reply.kind, "pong");
    }

    #[test]
    fn test_info_channel() {
        let st = state();
        let (s, ch) = parts(&st);
        let reply = proc_control(&st, &s, &ch, &request("info_channel", "")).unwrap();
        assert_eq!(reply.kind, "channel");
        assert!(reply.data.contains(&format!("\"id\":\"{}\"", ch.id())));
    }

    #[test]
    fn test_info_track_requires_existing() {
        let st = state();
        let (s, ch) = parts(&st);
        let req = request("info_track", r#"{"source":{"label":"base"},"track":{"label":"video"}}"#);
        assert!(proc_control(&st, &s, &ch, &req).is_err());

        ch.add_source_track("base", "video");
        let reply = proc_control(&st, &s, &ch, &req).unwrap();
        assert_eq!(reply.kind, "track");
        assert!(reply.data.contains("\"label\":\"video\""));
    }

    #[test]
    fn test_set_channel_key_and_flags() {
        let st = state();
        let (s, ch) = parts(&st);

        let req = request("set_channel", r#"{"channel":{"key":"k9","record":"on"}}"#);
        proc_control(&st, &s, &ch, &req).unwrap();
        assert_eq!(ch.stream_key(), "k9");
        assert!(ch.record.auto());

        let req = request("set_channel", r#"{"channel":{"key":"off","record":"off"}}"#);
        proc_control(&st, &s, &ch, &req).unwrap();
        assert_eq!(ch.stream_key(), "");
        assert!(!ch.record.auto());
    }

    #[test]
    fn test_close_channel_validates_id() {
        let st = state();
        let (s, ch) = parts(&st);
        let req = request("close_channel", r#"{"channel":{"id":"not-an-id"}}"#);
        assert!(proc_control(&st, &s, &ch, &req).is_err());

        st.studio.use_channel(ch.id()).unwrap();
        let req = request("close_channel", &format!(r#"{{"channel":{{"id":"{}"}}}}"#, ch.id()));
        proc_control(&st, &s, &ch, &req).unwrap();
        assert!(!ch.using());
    }

    #[test]
    fn test_close_session_by_id() {
        let st = state();
        let (s, ch) = parts(&st);

        let mut other = Session::new("/pang/ws/sub");
        other.channel_id = ch.id().to_string();
        let other = st.studio.add_session(other);
        assert!(other.using());

        let req = request("close_session", &format!(r#"{{"session":{{"id":"{}"}}}}"#, other.id()));
        let reply = proc_control(&st, &s, &ch, &req).unwrap();
        assert_eq!(reply.kind, "session");
        assert!(!other.using());
    }

    #[test]
    fn test_unknown_type_is_error_not_disconnect() {
        let st = state();
        let (s, ch) = parts(&st);
        let err = proc_control(&st, &s, &ch, &request("reboot", "")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
