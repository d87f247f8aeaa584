//! Studio: the process-wide registry
//!
//! The studio owns every top-level entity by id: channels, sessions,
//! bridges, workers, groups and punches, each map behind its own
//! reader/writer gate. Lookups take the read side, mutations the write
//! side, and no gate is ever held across a suspension point (the guards
//! are not `Send`, so the compiler enforces it). One studio is created at
//! process start and passed as an `Arc` through every handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::event::{EventMessage, EVENT_QUEUE_LEN};
use crate::id::is_id;
use crate::query::QueryOption;
use crate::registry::base::{ConnWatcher, Meta, Stamp, State, StateCell};
use crate::registry::bridge::Bridge;
use crate::registry::channel::{Channel, ChannelStyle};
use crate::registry::session::Session;
use crate::registry::worker::{Group, Punch, Worker};
use crate::transport::SharedSink;

/// Hour after which an idle static channel's sources are purged
pub const STATIC_PURGE_AGE: Duration = Duration::from_secs(60 * 60);

/// Admission limits, read from the server configuration
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum channels in use (publisher admission)
    pub num_pubs: usize,
    /// Maximum sessions in use (subscriber admission)
    pub num_subs: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { num_pubs: 2, num_subs: 5 }
    }
}

/// \[total, using\] counts per entity kind
#[derive(Debug, Clone, Copy, Default)]
pub struct Counts {
    /// Registered entities
    pub total: usize,
    /// Entities in the Using state
    pub using: usize,
}

/// The process-wide registry singleton
pub struct Studio {
    /// Common envelope
    pub meta: Meta,
    /// Studio activity state
    pub state: StateCell,
    /// Envelope clock
    pub stamp: Stamp,
    /// Admission limits
    pub limits: Limits,
    /// Process-wide connection counters
    pub watcher: ConnWatcher,

    channels: RwLock<HashMap<String, Arc<Channel>>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    bridges: RwLock<HashMap<String, Arc<Bridge>>>,
    workers: RwLock<HashMap<String, Arc<Worker>>>,
    groups: RwLock<HashMap<String, Arc<Group>>>,
    punches: RwLock<HashMap<String, Arc<Punch>>>,
    eventers: RwLock<HashMap<String, SharedSink>>,

    event_state: StateCell,
    event_tx: mpsc::Sender<EventMessage>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<EventMessage>>>,
}

impl Studio {
    /// Create the studio. Call once at process start.
    pub fn new(name: impl Into<String>, limits: Limits) -> Self {
        let mut meta = Meta::new("studio");
        meta.name = name.into();
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_LEN);
        Self {
            meta,
            state: StateCell::new(State::Using),
            stamp: Stamp::default(),
            limits,
            watcher: ConnWatcher::default(),
            channels: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            bridges: RwLock::new(HashMap::new()),
            workers: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            punches: RwLock::new(HashMap::new()),
            eventers: RwLock::new(HashMap::new()),
            event_state: StateCell::new(State::Idle),
            event_tx,
            event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
        }
    }

    /// Studio id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    // ----- channels -----------------------------------------------------

    /// Register a channel.
    pub fn add_channel(&self, ch: Channel) -> Arc<Channel> {
        let ch = Arc::new(ch);
        self.channels.write().insert(ch.id().to_string(), Arc::clone(&ch));
        ch
    }

    /// Look a channel up by id.
    pub fn channel(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.read().get(id).cloned()
    }

    /// Look a channel up by id, filtered by state.
    pub fn channel_in_state(&self, id: &str, state: State) -> Result<Arc<Channel>> {
        let ch = self
            .channel(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        if ch.state() != state {
            return Err(Error::State(format!("channel {id} is {}", ch.state())));
        }
        Ok(ch)
    }

    /// Look a channel up by name.
    pub fn channel_by_name(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.read().values().find(|c| c.name() == name).cloned()
    }

    /// Look a channel up by (name, style).
    pub fn channel_by_name_style(&self, name: &str, style: ChannelStyle) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .values()
            .find(|c| c.style == style && c.name() == name)
            .cloned()
    }

    /// Transition a channel to `state` by id. Transitioning to Idle also
    /// resets its tracks to their idle defaults.
    pub fn set_channel_state(&self, id: &str, state: State) -> Result<Arc<Channel>> {
        let ch = self
            .channel(id)
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;
        ch.set_state(state);
        if state == State::Idle {
            let _ = ch.reset_tracks();
        }
        Ok(ch)
    }

    /// Take a channel into use for a new session.
    pub fn use_channel(&self, id: &str) -> Result<Arc<Channel>> {
        let ch = self.set_channel_state(id, State::Using)?;
        ch.stamp.touch_used();
        Ok(ch)
    }

    /// Set a channel Idle when no sessions reference it any more. Returns
    /// true when the transition happened.
    pub fn idle_channel_if_unused(&self, id: &str) -> bool {
        if id.is_empty() || self.count_sessions_by_channel(id) > 0 {
            return false;
        }
        self.set_channel_state(id, State::Idle).is_ok()
    }

    /// Remove a channel outright (expiry). Its sources are purged.
    pub fn delete_channel(&self, id: &str) {
        if let Some(ch) = self.channels.write().remove(id) {
            let _ = ch.purge_sources();
        }
    }

    /// Ids of all registered channels.
    pub fn channel_ids(&self) -> Vec<String> {
        self.channels.read().keys().cloned().collect()
    }

    /// Count channels, optionally only those in `state`.
    pub fn count_channels(&self, state: Option<State>) -> usize {
        let channels = self.channels.read();
        match state {
            None => channels.len(),
            Some(s) => channels.values().filter(|c| c.state() == s).count(),
        }
    }

    /// Create and register a channel from request options.
    pub fn add_channel_with_options(
        &self,
        name: &str,
        style: ChannelStyle,
        key: &str,
        record: &str,
        trans: &str,
    ) -> Arc<Channel> {
        let ch = Channel::new(name, style);
        if !key.is_empty() {
            ch.set_stream_key(key);
        }
        match record {
            "on" => ch.record.set_auto(true),
            "off" => ch.record.set_auto(false),
            _ => {}
        }
        match trans {
            "on" => ch.trans.set_auto(true),
            "off" => ch.trans.set_auto(false),
            _ => {}
        }
        self.add_channel(ch)
    }

    /// Resolve the channel a request addresses, rewriting
    /// `qo.channel.id` to a real id.
    ///
    /// When the `channel` query value is not an id it names a style:
    /// instant/dynamic channels are found by (name, style) or lazily
    /// created; static channels must preexist.
    pub fn resolve_channel(&self, qo: &mut QueryOption) -> Result<()> {
        if is_id(&qo.channel.id) {
            return Ok(());
        }
        let style = ChannelStyle::parse(&qo.channel.id).ok_or_else(|| {
            Error::Validation(format!("invalid channel info: {}, {}", qo.channel.id, qo.channel.name))
        })?;
        let ch = match self.channel_by_name_style(&qo.channel.name, style) {
            Some(ch) => ch,
            None if style == ChannelStyle::Static => {
                return Err(Error::NotFound(format!(
                    "channel {} ({})",
                    qo.channel.name,
                    style.as_str()
                )));
            }
            None => self.add_channel_with_options(
                &qo.channel.name,
                style,
                &qo.channel.key,
                &qo.channel.record,
                &qo.channel.trans,
            ),
        };
        qo.channel.id = ch.id().to_string();
        Ok(())
    }

    /// One sweep over the channels: purge the sources of static channels
    /// idle past the hour, delete dynamic/instant channels past expiry.
    /// Channels in use, or with a live event broker, are left alone.
    pub fn clean_channels(&self) {
        let snapshot: Vec<Arc<Channel>> = self.channels.read().values().cloned().collect();
        for ch in snapshot {
            if ch.using() || ch.event_state() == State::Using {
                continue;
            }
            match ch.style {
                ChannelStyle::Static => {
                    if !ch.sources().is_empty() && ch.stamp.idle_for(STATIC_PURGE_AGE) {
                        if ch.purge_sources().is_ok() {
                            tracing::info!(channel = %ch.id(), name = %ch.name(), "purged static channel resources");
                        }
                    }
                }
                ChannelStyle::Dynamic | ChannelStyle::Instant => {
                    if ch.stamp.is_expired() {
                        self.delete_channel(ch.id());
                        tracing::info!(channel = %ch.id(), name = %ch.name(), style = %ch.style.as_str(), "expired channel");
                    }
                }
            }
        }
    }

    // ----- sessions -----------------------------------------------------

    /// Register a session.
    pub fn add_session(&self, s: Session) -> Arc<Session> {
        let s = Arc::new(s);
        self.sessions.write().insert(s.id().to_string(), Arc::clone(&s));
        s
    }

    /// Look a session up by id.
    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Close a session and remove it from the registry.
    pub fn delete_session(&self, id: &str) {
        if let Some(s) = self.sessions.write().remove(id) {
            s.close();
        }
    }

    /// Count sessions, optionally only those in `state`.
    pub fn count_sessions(&self, state: Option<State>) -> usize {
        let sessions = self.sessions.read();
        match state {
            None => sessions.len(),
            Some(st) => sessions.values().filter(|s| s.state() == st).count(),
        }
    }

    /// Count sessions referencing a channel.
    pub fn count_sessions_by_channel(&self, channel_id: &str) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.channel_id == channel_id)
            .count()
    }

    /// Count sessions owned by a bridge.
    pub fn count_sessions_by_bridge(&self, bridge_id: &str) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.bridge_id == bridge_id)
            .count()
    }

    /// Find one session owned by a bridge.
    pub fn session_by_bridge(&self, bridge_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .find(|s| s.bridge_id == bridge_id)
            .cloned()
    }

    /// List a channel's sessions, optionally filtered by a name fragment.
    pub fn sessions_by_channel(&self, channel_id: &str, name: &str) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.channel_id == channel_id && (name.is_empty() || s.name().contains(name)))
            .cloned()
            .collect()
    }

    /// Find a channel's session by id.
    pub fn session_in_channel(&self, channel_id: &str, session_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .find(|s| s.channel_id == channel_id && s.id() == session_id)
            .cloned()
    }

    /// Find the publishing session on a (channel, source, track), if any.
    /// Publisher-like roles are those admitted on `/pub`, `/seb` or `/meb`
    /// paths.
    pub fn publisher_by_resource(&self, channel_id: &str, source: &str, track: &str) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .find(|s| {
                s.channel_id == channel_id
                    && s.source_label == source
                    && s.track_label == track
                    && (s.name().contains("/pub") || s.name().contains("/seb") || s.name().contains("/meb"))
            })
            .cloned()
    }

    /// Resource uniqueness rule: a second publisher on the same
    /// (channel, source, track) is refused unless the request asks for the
    /// `multi` style.
    pub fn is_resource_available(&self, qo: &QueryOption) -> bool {
        qo.track.style == "multi"
            || self
                .publisher_by_resource(&qo.channel.id, &qo.source_label, &qo.track_label)
                .is_none()
    }

    // ----- bridges ------------------------------------------------------

    /// Register a bridge.
    pub fn add_bridge(&self, b: Bridge) -> Arc<Bridge> {
        let b = Arc::new(b);
        self.bridges.write().insert(b.id().to_string(), Arc::clone(&b));
        b
    }

    /// Look a bridge up by id.
    pub fn bridge(&self, id: &str) -> Option<Arc<Bridge>> {
        self.bridges.read().get(id).cloned()
    }

    /// Remove a bridge.
    pub fn delete_bridge(&self, id: &str) {
        self.bridges.write().remove(id);
    }

    /// Snapshot of all bridges.
    pub fn bridges(&self) -> Vec<Arc<Bridge>> {
        self.bridges.read().values().cloned().collect()
    }

    /// Set a bridge Idle when none of its sessions remain.
    pub fn idle_bridge_if_unused(&self, id: &str) -> bool {
        if id.is_empty() || self.count_sessions_by_bridge(id) > 0 {
            return false;
        }
        match self.bridge(id) {
            Some(b) => {
                b.state.set(State::Idle);
                true
            }
            None => false,
        }
    }

    /// Count bridges, optionally only those in `state`.
    pub fn count_bridges(&self, state: Option<State>) -> usize {
        let bridges = self.bridges.read();
        match state {
            None => bridges.len(),
            Some(st) => bridges.values().filter(|b| b.state.get() == st).count(),
        }
    }

    // ----- workers ------------------------------------------------------

    /// Register a worker for an internal task.
    pub fn add_worker(&self, name: &str, channel_id: &str, style: &str) -> Arc<Worker> {
        let w = Arc::new(Worker::new(name, channel_id, style));
        self.workers.write().insert(w.id().to_string(), Arc::clone(&w));
        w
    }

    /// Look a worker up by id.
    pub fn worker(&self, id: &str) -> Option<Arc<Worker>> {
        self.workers.read().get(id).cloned()
    }

    /// Remove a worker.
    pub fn delete_worker(&self, id: &str) {
        self.workers.write().remove(id);
    }

    // ----- punches ------------------------------------------------------

    /// Register a punch record.
    pub fn add_punch(&self, p: Punch) -> Arc<Punch> {
        let p = Arc::new(p);
        self.punches.write().insert(p.id().to_string(), Arc::clone(&p));
        p
    }

    /// Look a punch up by directory name.
    pub fn punch_by_name(&self, name: &str) -> Option<Arc<Punch>> {
        self.punches.read().values().find(|p| p.name() == name).cloned()
    }

    /// Remove a punch.
    pub fn delete_punch(&self, id: &str) {
        self.punches.write().remove(id);
    }

    /// Drop punches past their expiry.
    pub fn clean_punches(&self) {
        let expired: Vec<String> = self
            .punches
            .read()
            .values()
            .filter(|p| p.stamp.is_expired())
            .map(|p| p.id().to_string())
            .collect();
        for id in expired {
            if let Some(p) = self.punches.write().remove(&id) {
                tracing::info!(punch = %p.id(), name = %p.name(), "expired punch");
            }
        }
    }

    // ----- groups -------------------------------------------------------

    /// Register a group.
    pub fn add_group(&self, g: Group) -> Arc<Group> {
        let g = Arc::new(g);
        self.groups.write().insert(g.id().to_string(), Arc::clone(&g));
        g
    }

    /// Look a group up by id.
    pub fn group(&self, id: &str) -> Option<Arc<Group>> {
        self.groups.read().get(id).cloned()
    }

    /// Remove a group.
    pub fn delete_group(&self, id: &str) {
        self.groups.write().remove(id);
    }

    // ----- events -------------------------------------------------------

    /// Register a studio-level event listener.
    pub fn add_eventer(&self, id: impl Into<String>, sink: SharedSink) {
        self.eventers.write().insert(id.into(), sink);
    }

    /// Unregister a studio-level event listener.
    pub fn delete_eventer(&self, id: &str) {
        self.eventers.write().remove(id);
    }

    /// Snapshot of studio-level event listeners.
    pub fn eventers(&self) -> Vec<(String, SharedSink)> {
        self.eventers
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    /// Studio event broker state.
    pub fn event_state(&self) -> State {
        self.event_state.get()
    }

    /// Set the studio event broker state.
    pub fn set_event_state(&self, state: State) {
        self.event_state.set(state);
    }

    /// The receiving end of the studio event queue.
    pub fn event_rx(&self) -> Arc<tokio::sync::Mutex<mpsc::Receiver<EventMessage>>> {
        Arc::clone(&self.event_rx)
    }

    /// Forward a channel event onto the studio bus. Dropped unless the
    /// studio broker is running.
    pub fn forward_event(&self, event: EventMessage) {
        if self.event_state.using() {
            let _ = self.event_tx.try_send(event);
        }
    }

    /// Enqueue a studio-originated event.
    pub fn push_event(&self, name: &str, path: &str, data: &str) {
        self.forward_event(EventMessage::new(name, data, path, ""));
    }

    // ----- sweeping -----------------------------------------------------

    /// One periodic sweep: channel cleanup and punch expiry. `ever`
    /// bridges are restarted by the caller, which owns the dialers.
    pub fn sweep(&self) {
        self.stamp.touch_used();
        self.clean_channels();
        self.clean_punches();
    }

    /// \[total, using\] counts for one entity kind.
    pub fn counts(&self, kind: &str) -> Counts {
        match kind {
            "channel" => Counts {
                total: self.count_channels(None),
                using: self.count_channels(Some(State::Using)),
            },
            "session" => Counts {
                total: self.count_sessions(None),
                using: self.count_sessions(Some(State::Using)),
            },
            "bridge" => Counts {
                total: self.count_bridges(None),
                using: self.count_bridges(Some(State::Using)),
            },
            "worker" => Counts { total: self.workers.read().len(), using: self.workers.read().len() },
            "group" => Counts { total: self.groups.read().len(), using: 0 },
            "punch" => Counts { total: self.punches.read().len(), using: 0 },
            _ => Counts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryOption;

    fn studio() -> Studio {
        Studio::new("test studio", Limits::default())
    }

    #[test]
    fn test_channel_add_find_delete() {
        let st = studio();
        let ch = st.add_channel(Channel::new("t1", ChannelStyle::Static));
        let id = ch.id().to_string();

        assert!(st.channel(&id).is_some());
        assert!(st.channel_by_name("t1").is_some());
        assert!(st.channel_by_name_style("t1", ChannelStyle::Static).is_some());
        assert!(st.channel_by_name_style("t1", ChannelStyle::Dynamic).is_none());

        st.delete_channel(&id);
        assert!(st.channel(&id).is_none());
    }

    #[test]
    fn test_not_found_vs_wrong_state() {
        let st = studio();
        let ch = st.add_channel(Channel::new("t1", ChannelStyle::Static));

        assert!(matches!(st.channel_in_state("nope", State::Using), Err(Error::NotFound(_))));
        assert!(matches!(
            st.channel_in_state(ch.id(), State::Using),
            Err(Error::State(_))
        ));
        assert!(st.channel_in_state(ch.id(), State::Idle).is_ok());
    }

    #[test]
    fn test_use_channel_and_idle_back() {
        let st = studio();
        let ch = st.add_channel(Channel::new("t1", ChannelStyle::Static));
        let id = ch.id().to_string();

        let ch = st.use_channel(&id).unwrap();
        assert!(ch.using());

        // no sessions reference it, so it idles
        assert!(st.idle_channel_if_unused(&id));
        assert!(!ch.using());
    }

    #[test]
    fn test_channel_kept_using_while_sessions_remain() {
        let st = studio();
        let ch = st.add_channel(Channel::new("t1", ChannelStyle::Static));
        let id = ch.id().to_string();
        st.use_channel(&id).unwrap();

        let mut s = Session::new("/pang/ws/sub");
        s.channel_id = id.clone();
        let s = st.add_session(s);

        assert!(!st.idle_channel_if_unused(&id));
        assert!(ch.using());

        st.delete_session(s.id());
        assert!(st.idle_channel_if_unused(&id));
    }

    #[test]
    fn test_resolve_creates_instant_channel() {
        let st = studio();
        let mut qo = QueryOption::default();
        qo.channel.id = "instant".into();
        qo.channel.name = "meb1".into();

        st.resolve_channel(&mut qo).unwrap();
        assert!(is_id(&qo.channel.id));
        let ch = st.channel(&qo.channel.id).unwrap();
        assert_eq!(ch.style, ChannelStyle::Instant);

        // second resolve finds the same channel
        let mut qo2 = QueryOption::default();
        qo2.channel.id = "instant".into();
        qo2.channel.name = "meb1".into();
        st.resolve_channel(&mut qo2).unwrap();
        assert_eq!(qo.channel.id, qo2.channel.id);
    }

    #[test]
    fn test_resolve_static_must_preexist() {
        let st = studio();
        let mut qo = QueryOption::default();
        qo.channel.id = "static".into();
        qo.channel.name = "missing".into();
        assert!(matches!(st.resolve_channel(&mut qo), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_resolve_rejects_unknown_style() {
        let st = studio();
        let mut qo = QueryOption::default();
        qo.channel.id = "evergreen".into();
        qo.channel.name = "x".into();
        assert!(matches!(st.resolve_channel(&mut qo), Err(Error::Validation(_))));
    }

    #[test]
    fn test_resource_uniqueness() {
        let st = studio();
        let ch = st.add_channel(Channel::new("t1", ChannelStyle::Static));

        let mut s = Session::new("/pang/ws/pub");
        s.channel_id = ch.id().to_string();
        s.source_label = "base".into();
        s.track_label = "video".into();
        st.add_session(s);

        let mut qo = QueryOption::default();
        qo.channel.id = ch.id().to_string();
        qo.source_label = "base".into();
        qo.track_label = "video".into();
        assert!(!st.is_resource_available(&qo));

        // multi style bypasses the uniqueness rule
        qo.track.style = "multi".into();
        assert!(st.is_resource_available(&qo));

        // a different track is free
        qo.track.style = String::new();
        qo.track_label = "audio".into();
        assert!(st.is_resource_available(&qo));
    }

    #[test]
    fn test_expired_instant_channel_swept() {
        let st = studio();
        let ch = st.add_channel(Channel::new("gone", ChannelStyle::Instant));
        ch.stamp
            .set_expired(std::time::SystemTime::now() - Duration::from_secs(1));
        let id = ch.id().to_string();

        st.clean_channels();
        assert!(st.channel(&id).is_none());
    }

    #[test]
    fn test_static_channel_kept_within_idle_hour() {
        let st = studio();
        let ch = st.add_channel(Channel::new("old", ChannelStyle::Static));
        ch.add_source_track("base", "video");

        // recently used: the sweep leaves its sources alone
        st.clean_channels();
        assert_eq!(ch.sources().len(), 1);
    }

    #[test]
    fn test_punch_expiry_sweep() {
        let st = studio();
        let p = st.add_punch(Punch::new("ch1", "base", "video"));
        p.stamp
            .set_expired(std::time::SystemTime::now() - Duration::from_secs(1));
        let name = p.name().to_string();

        st.clean_punches();
        assert!(st.punch_by_name(&name).is_none());
    }
}
