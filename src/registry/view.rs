//! Serializable snapshots of live entities
//!
//! The control surface answers info requests with JSON; these views
//! capture an entity at one instant so no lock is held while encoding.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::media::{RingBuffer, Source, Track};
use crate::registry::channel::Channel;
use crate::registry::session::Session;
use crate::registry::worker::Punch;
use crate::registry::State;

fn at(t: std::time::SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

/// Ring snapshot
#[derive(Debug, Clone, Serialize)]
pub struct RingInfo {
    /// Ring label
    pub label: String,
    /// Active length
    pub size_len: usize,
    /// Allocated capacity
    pub size_cap: usize,
    /// Last-write hint
    pub pos_read: usize,
    /// Write cursor
    pub pos_write: usize,
}

impl RingInfo {
    /// Snapshot a ring.
    pub fn of(ring: &RingBuffer) -> Self {
        Self {
            label: ring.label().to_string(),
            size_len: ring.len(),
            size_cap: ring.cap(),
            pos_read: ring.pos_read(),
            pos_write: ring.pos_write(),
        }
    }
}

/// Track snapshot
#[derive(Debug, Clone, Serialize)]
pub struct TrackInfo {
    /// Track id
    pub id: String,
    /// Track label
    pub label: String,
    /// Stream MIME, empty until announced
    pub mime: String,
    /// Operation mode
    pub mode: String,
    /// Publisher style
    pub style: String,
    /// Received bytes
    pub in_bytes: u64,
    /// Sent bytes
    pub out_bytes: u64,
    /// Ring snapshots
    pub rings: Vec<RingInfo>,
}

impl TrackInfo {
    /// Snapshot a track.
    pub fn of(trk: &Track) -> Self {
        Self {
            id: trk.id().to_string(),
            label: trk.label().to_string(),
            mime: trk.mime(),
            mode: trk.mode().as_str().to_string(),
            style: trk.style().as_str().to_string(),
            in_bytes: trk.metric.in_bytes(),
            out_bytes: trk.metric.out_bytes(),
            rings: trk.rings().iter().map(|r| RingInfo::of(r)).collect(),
        }
    }
}

/// Source snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    /// Source id
    pub id: String,
    /// Source label
    pub label: String,
    /// Track snapshots
    pub tracks: Vec<TrackInfo>,
}

impl SourceInfo {
    /// Snapshot a source.
    pub fn of(src: &Source) -> Self {
        Self {
            id: src.id().to_string(),
            label: src.label().to_string(),
            tracks: src.tracks().iter().map(|t| TrackInfo::of(t)).collect(),
        }
    }
}

/// Channel snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    /// Always "channel"
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Channel id
    pub id: String,
    /// Channel name
    pub name: String,
    /// Lifecycle style
    pub style: String,
    /// Current state
    pub state: State,
    /// Blocked flag
    pub blocked: bool,
    /// Registered publishers
    pub n_pubs: usize,
    /// Registered subscribers
    pub n_subs: usize,
    /// Recording auto flag
    pub record_auto: bool,
    /// Recording state
    pub record_state: State,
    /// Transcoding auto flag
    pub trans_auto: bool,
    /// Transcoding state
    pub trans_state: State,
    /// Received bytes
    pub in_bytes: u64,
    /// Sent bytes
    pub out_bytes: u64,
    /// Creation time
    pub at_created: DateTime<Utc>,
    /// Last use time
    pub at_used: DateTime<Utc>,
    /// Source snapshots
    pub sources: Vec<SourceInfo>,
}

impl ChannelInfo {
    /// Snapshot a channel with its sources.
    pub fn of(ch: &Channel) -> Self {
        Self {
            kind: "channel",
            id: ch.id().to_string(),
            name: ch.name().to_string(),
            style: ch.style.as_str().to_string(),
            state: ch.state(),
            blocked: ch.meta.blocked(),
            n_pubs: ch.publisher_count(),
            n_subs: ch.subscriber_count(),
            record_auto: ch.record.auto(),
            record_state: ch.record.state.get(),
            trans_auto: ch.trans.auto(),
            trans_state: ch.trans.state.get(),
            in_bytes: ch.metric.in_bytes(),
            out_bytes: ch.metric.out_bytes(),
            at_created: at(ch.stamp.created()),
            at_used: at(ch.stamp.last_used()),
            sources: ch.sources().iter().map(|s| SourceInfo::of(s)).collect(),
        }
    }
}

/// Session snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Always "session"
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Session id
    pub id: String,
    /// API path the session was admitted on
    pub name: String,
    /// Current state
    pub state: State,
    /// Channel back-reference
    #[serde(skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    /// Source label
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Track label
    #[serde(skip_serializing_if = "String::is_empty")]
    pub track: String,
    /// Remote peer address
    #[serde(skip_serializing_if = "String::is_empty")]
    pub remote_addr: String,
    /// Client request id
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    /// Owning bridge
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bridge_id: String,
    /// Received bytes
    pub in_bytes: u64,
    /// Sent bytes
    pub out_bytes: u64,
    /// Creation time
    pub at_created: DateTime<Utc>,
}

impl SessionInfo {
    /// Snapshot a session.
    pub fn of(s: &Session) -> Self {
        Self {
            kind: "session",
            id: s.id().to_string(),
            name: s.name().to_string(),
            state: s.state(),
            channel_id: s.channel_id.clone(),
            source: s.source_label.clone(),
            track: s.track_label.clone(),
            remote_addr: s.remote_addr.clone(),
            request_id: s.request_id.clone(),
            bridge_id: s.bridge_id.clone(),
            in_bytes: s.metric.in_bytes(),
            out_bytes: s.metric.out_bytes(),
            at_created: at(s.stamp.created()),
        }
    }
}

/// Punch snapshot, sent to TCP peers during signalling
#[derive(Debug, Clone, Serialize)]
pub struct PunchInfo {
    /// Always "punch"
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Punch id
    pub id: String,
    /// Directory name `/<channel>/<source>/<track>`
    pub name: String,
    /// Current state
    pub state: State,
    /// Channel id
    pub channel_id: String,
    /// Source label
    pub source: String,
    /// Track label
    pub track: String,
    /// Creating role
    pub role: String,
    /// Observed remote address
    pub addr: String,
    /// Holding session
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,
}

impl PunchInfo {
    /// Snapshot a punch.
    pub fn of(p: &Punch) -> Self {
        Self {
            kind: "punch",
            id: p.id().to_string(),
            name: p.name().to_string(),
            state: p.state.get(),
            channel_id: p.channel_id.clone(),
            source: p.source_label.clone(),
            track: p.track_label.clone(),
            role: p.role.lock().clone(),
            addr: p.addr.lock().clone(),
            session_id: p.session_id.lock().clone(),
        }
    }
}
