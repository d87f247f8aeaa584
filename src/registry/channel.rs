//! Channel: a named 1:N (or M:N) logical stream group
//!
//! A channel owns its sources (which own tracks, which own rings) and the
//! live membership: publisher/subscriber session sets, peer-direct
//! partners and event listeners. Static channels are preconfigured and
//! never garbage-collected; dynamic channels live 24 hours past creation
//! and instant channels one hour.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::event::{EventMessage, EVENT_QUEUE_LEN};
use crate::media::{Source, Track, RING_CAP_SLOTS, RING_LEN_SLOTS};
use crate::registry::base::{Meta, Metric, Stamp, State, StateCell};
use crate::registry::session::Session;
use crate::transport::SharedSink;

/// Lifetime of a dynamic channel past creation
pub const EXPIRE_DYNAMIC: Duration = Duration::from_secs(24 * 60 * 60);
/// Lifetime of an instant channel past creation
pub const EXPIRE_INSTANT: Duration = Duration::from_secs(60 * 60);

/// Channel lifecycle style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStyle {
    /// Preconfigured, survives restarts, never garbage-collected
    #[default]
    Static,
    /// Created on demand, expires 24 h after creation
    Dynamic,
    /// Created on demand, expires 1 h after creation
    Instant,
}

impl ChannelStyle {
    /// Parse a query/config value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "static" => Some(ChannelStyle::Static),
            "dynamic" => Some(ChannelStyle::Dynamic),
            "instant" => Some(ChannelStyle::Instant),
            _ => None,
        }
    }

    /// Wire form of the style.
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelStyle::Static => "static",
            ChannelStyle::Dynamic => "dynamic",
            ChannelStyle::Instant => "instant",
        }
    }
}

/// Auto flag plus state bit for an attached feature (record, transcode,
/// procs, relay, shoot). Only the state bit is core; the auto flag drives
/// external subprocesses and is persisted.
#[derive(Debug, Default)]
pub struct Feature {
    auto: AtomicBool,
    /// Feature activity state
    pub state: StateCell,
}

impl Feature {
    /// Whether the feature starts automatically with the first publisher.
    pub fn auto(&self) -> bool {
        self.auto.load(Ordering::Relaxed)
    }

    /// Set the auto flag.
    pub fn set_auto(&self, on: bool) {
        self.auto.store(on, Ordering::Relaxed);
    }
}

/// A registered peer-direct partner
pub struct Peer {
    /// Owning session id
    pub session_id: String,
    /// Source the peer attached to
    pub source_label: String,
    /// Track the peer attached to
    pub track_label: String,
    /// The peer's transport sink; its partner writes here
    pub sink: SharedSink,
}

#[derive(Default)]
struct ChannelInner {
    sources: HashMap<String, Arc<Source>>,
    publishers: HashMap<String, Arc<Session>>,
    subscribers: HashMap<String, Arc<Session>>,
    peers: HashMap<String, Peer>,
    eventers: HashMap<String, SharedSink>,
}

/// A named stream group
pub struct Channel {
    /// Common envelope
    pub meta: Meta,
    /// Lifecycle style, fixed at creation
    pub style: ChannelStyle,
    state: StateCell,
    /// Envelope clock; `expired` is set for dynamic/instant styles
    pub stamp: Stamp,
    stream_key: RwLock<String>,
    /// Recording feature bits
    pub record: Feature,
    /// Transcoding feature bits
    pub trans: Feature,
    /// Processing feature bits
    pub procs: Feature,
    /// Relaying feature bits
    pub relay: Feature,
    /// Shooting feature bits
    pub shoot: Feature,
    event_state: StateCell,
    event_tx: mpsc::Sender<EventMessage>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EventMessage>>>,
    inner: Mutex<ChannelInner>,
    /// In/out byte counters
    pub metric: Metric,
}

impl Channel {
    /// Create a channel; dynamic/instant styles get their expiry deadline.
    pub fn new(name: impl Into<String>, style: ChannelStyle) -> Self {
        let mut meta = Meta::new("channel");
        let name = name.into();
        meta.name = if name.is_empty() { meta.id.clone() } else { name };
        meta.style = style.as_str().into();

        let stamp = Stamp::default();
        match style {
            ChannelStyle::Dynamic => stamp.expire_in(EXPIRE_DYNAMIC),
            ChannelStyle::Instant => stamp.expire_in(EXPIRE_INSTANT),
            ChannelStyle::Static => {}
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        Self {
            meta,
            style,
            state: StateCell::new(State::Idle),
            stamp,
            stream_key: RwLock::new(String::new()),
            record: Feature::default(),
            trans: Feature::default(),
            procs: Feature::default(),
            relay: Feature::default(),
            shoot: Feature::default(),
            event_state: StateCell::new(State::Idle),
            event_tx,
            event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
            inner: Mutex::new(ChannelInner::default()),
            metric: Metric::default(),
        }
    }

    /// Channel id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state.get()
    }

    /// True while the channel is in use.
    pub fn using(&self) -> bool {
        self.state.using()
    }

    pub(crate) fn set_state(&self, state: State) {
        self.state.set(state);
    }

    /// Current stream key; empty means open.
    pub fn stream_key(&self) -> String {
        self.stream_key.read().clone()
    }

    /// Set (or clear) the stream key.
    pub fn set_stream_key(&self, key: impl Into<String>) {
        *self.stream_key.write() = key.into();
    }

    /// A key is valid when the channel has none or it matches.
    pub fn is_valid_key(&self, key: &str) -> bool {
        let own = self.stream_key.read();
        own.is_empty() || *own == key
    }

    // ----- sources and tracks -------------------------------------------

    /// Find a source by label.
    pub fn source(&self, label: &str) -> Option<Arc<Source>> {
        self.inner.lock().sources.get(label).cloned()
    }

    /// Snapshot of all sources.
    pub fn sources(&self) -> Vec<Arc<Source>> {
        self.inner.lock().sources.values().cloned().collect()
    }

    /// Find an existing (source, track) pair by labels.
    pub fn source_track(&self, slabel: &str, tlabel: &str) -> Result<(Arc<Source>, Arc<Track>)> {
        let inner = self.inner.lock();
        let src = inner
            .sources
            .get(slabel)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("source {slabel}")))?;
        let trk = src
            .track(tlabel)
            .ok_or_else(|| Error::NotFound(format!("track {tlabel}")))?;
        Ok((src, trk))
    }

    /// Find or lazily create the (source, track) pair for a request.
    pub fn add_source_track(&self, slabel: &str, tlabel: &str) -> (Arc<Source>, Arc<Track>) {
        let mut inner = self.inner.lock();
        let src = inner
            .sources
            .entry(slabel.to_string())
            .or_insert_with(|| Arc::new(Source::new(slabel)))
            .clone();
        let trk = src.track_or_insert(tlabel, RING_CAP_SLOTS, RING_LEN_SLOTS);
        (src, trk)
    }

    /// Drop every source and track. Only permitted while idle.
    pub fn purge_sources(&self) -> Result<()> {
        if self.using() {
            return Err(Error::State(format!("channel {} is using", self.id())));
        }
        let mut inner = self.inner.lock();
        for src in inner.sources.values() {
            for trk in src.tracks() {
                src.delete_track(trk.label());
            }
        }
        inner.sources.clear();
        Ok(())
    }

    /// Reset every track to idle defaults (mono style, no MIME). Only
    /// permitted while idle.
    pub fn reset_tracks(&self) -> Result<()> {
        if self.using() {
            return Err(Error::State(format!("channel {} is using", self.id())));
        }
        let inner = self.inner.lock();
        for src in inner.sources.values() {
            for trk in src.tracks() {
                trk.reset_style();
            }
        }
        Ok(())
    }

    // ----- membership ---------------------------------------------------

    /// Register a publisher session.
    pub fn add_publisher(&self, s: Arc<Session>) {
        self.inner.lock().publishers.insert(s.id().to_string(), s);
        self.stamp.touch_updated();
    }

    /// Unregister a publisher session.
    pub fn delete_publisher(&self, id: &str) {
        self.inner.lock().publishers.remove(id);
    }

    /// Register a subscriber session.
    pub fn add_subscriber(&self, s: Arc<Session>) {
        self.inner.lock().subscribers.insert(s.id().to_string(), s);
        self.stamp.touch_used();
    }

    /// Unregister a subscriber session.
    pub fn delete_subscriber(&self, id: &str) {
        self.inner.lock().subscribers.remove(id);
    }

    /// Number of registered publishers.
    pub fn publisher_count(&self) -> usize {
        self.inner.lock().publishers.len()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    // ----- peer-direct --------------------------------------------------

    /// Register a peer-direct partner; at most two per channel.
    pub fn add_peer(&self, peer: Peer) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.peers.len() >= 2 {
            return Err(Error::Admission(format!(
                "too many peers ({}) in channel {}",
                inner.peers.len(),
                self.id()
            )));
        }
        inner.peers.insert(peer.session_id.clone(), peer);
        Ok(())
    }

    /// Unregister a peer-direct partner.
    pub fn delete_peer(&self, session_id: &str) {
        self.inner.lock().peers.remove(session_id);
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// The partner's sink for a session: the other peer on the same
    /// (source, track).
    pub fn partner_sink(&self, session: &Session) -> Option<SharedSink> {
        let inner = self.inner.lock();
        inner
            .peers
            .values()
            .find(|p| {
                p.session_id != session.id()
                    && p.source_label == session.source_label
                    && p.track_label == session.track_label
            })
            .map(|p| Arc::clone(&p.sink))
    }

    // ----- events -------------------------------------------------------

    /// Register an event listener sink.
    pub fn add_eventer(&self, id: impl Into<String>, sink: SharedSink) {
        self.inner.lock().eventers.insert(id.into(), sink);
    }

    /// Unregister an event listener.
    pub fn delete_eventer(&self, id: &str) {
        self.inner.lock().eventers.remove(id);
    }

    /// Number of event listeners.
    pub fn eventer_count(&self) -> usize {
        self.inner.lock().eventers.len()
    }

    /// Snapshot of the event listeners.
    pub fn eventers(&self) -> Vec<(String, SharedSink)> {
        self.inner
            .lock()
            .eventers
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Event broker state.
    pub fn event_state(&self) -> State {
        self.event_state.get()
    }

    /// Set the event broker state.
    pub fn set_event_state(&self, state: State) {
        self.event_state.set(state);
    }

    /// The receiving end of the event queue, taken by the broker.
    pub fn event_rx(&self) -> Arc<tokio::sync::Mutex<mpsc::Receiver<EventMessage>>> {
        Arc::clone(&self.event_rx)
    }

    /// Enqueue an event for this channel's listeners. Dropped unless the
    /// channel broker is running; `pub-in` is also forwarded to the studio
    /// bus (which starts auto bridges).
    pub fn push_event(
        &self,
        studio: &crate::registry::Studio,
        name: &str,
        data: &str,
        path: &str,
        reqid: &str,
    ) {
        let event = EventMessage::new(name, data, path, reqid);
        tracing::debug!(channel = %self.id(), event = %event, "push event");

        if self.event_state.using() {
            let _ = self.event_tx.try_send(event.clone());
        }
        if name == "pub-in" {
            studio.forward_event(event);
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} style: {}, state: {}, pubs: {}, subs: {}",
            self.meta,
            self.style.as_str(),
            self.state(),
            self.publisher_count(),
            self.subscriber_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_styles_and_expiry() {
        let st = Channel::new("a", ChannelStyle::Static);
        assert!(!st.stamp.is_expired());
        assert_eq!(st.stamp.expired(), std::time::SystemTime::UNIX_EPOCH);

        let dy = Channel::new("b", ChannelStyle::Dynamic);
        assert!(dy.stamp.expired() > std::time::SystemTime::now() + Duration::from_secs(23 * 3600));

        let inst = Channel::new("c", ChannelStyle::Instant);
        assert!(inst.stamp.expired() <= std::time::SystemTime::now() + Duration::from_secs(3600));
    }

    #[test]
    fn test_unnamed_channel_uses_id() {
        let ch = Channel::new("", ChannelStyle::Instant);
        assert_eq!(ch.name(), ch.id());
    }

    #[test]
    fn test_stream_key_check() {
        let ch = Channel::new("keyed", ChannelStyle::Static);
        assert!(ch.is_valid_key(""));
        assert!(ch.is_valid_key("anything")); // no key set: open

        ch.set_stream_key("s3cret");
        assert!(ch.is_valid_key("s3cret"));
        assert!(!ch.is_valid_key(""));
        assert!(!ch.is_valid_key("wrong"));
    }

    #[test]
    fn test_lazy_source_track() {
        let ch = Channel::new("t", ChannelStyle::Instant);
        assert!(ch.source_track("base", "video").is_err());

        let (src, trk) = ch.add_source_track("base", "video");
        assert_eq!(src.label(), "base");
        assert_eq!(trk.label(), "video");

        let (src2, trk2) = ch.add_source_track("base", "video");
        assert_eq!(src.id(), src2.id());
        assert_eq!(trk.id(), trk2.id());

        let (found_src, found_trk) = ch.source_track("base", "video").unwrap();
        assert_eq!(found_src.id(), src.id());
        assert_eq!(found_trk.id(), trk.id());
    }

    #[test]
    fn test_purge_requires_idle() {
        let ch = Channel::new("t", ChannelStyle::Static);
        ch.add_source_track("base", "video");

        ch.set_state(State::Using);
        assert!(ch.purge_sources().is_err());

        ch.set_state(State::Idle);
        ch.purge_sources().unwrap();
        assert!(ch.sources().is_empty());
    }

    #[test]
    fn test_peer_limit() {
        use crate::protocol::Frame;
        use crate::transport::{share_sink, FrameSink};
        use async_trait::async_trait;

        struct NullSink;
        #[async_trait]
        impl FrameSink for NullSink {
            async fn send_frame(&mut self, _: &Frame, _: std::time::Duration) -> crate::error::Result<()> {
                Ok(())
            }
        }

        let ch = Channel::new("p", ChannelStyle::Instant);
        for i in 0..2 {
            ch.add_peer(Peer {
                session_id: format!("s{i}"),
                source_label: "base".into(),
                track_label: "video".into(),
                sink: share_sink(NullSink),
            })
            .unwrap();
        }
        let third = ch.add_peer(Peer {
            session_id: "s2".into(),
            source_label: "base".into(),
            track_label: "video".into(),
            sink: share_sink(NullSink),
        });
        assert!(third.is_err());
        assert_eq!(ch.peer_count(), 2);
    }
}
