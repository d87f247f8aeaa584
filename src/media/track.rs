//! Tracks and sources
//!
//! A track is the synchronization and fan-out point: it owns the forward
//! and backward rings, the stream MIME, and per-session agent cards. A
//! source groups tracks under a label (`base`, `addon`); a channel groups
//! sources. Both are created lazily on first publisher request and are not
//! deleted while the owning channel is in use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::id::new_id;
use crate::media::ring::{RingBuffer, RING_BACK, RING_FORE};
use crate::registry::Metric;

/// Track operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackMode {
    /// One direction over the forward ring
    #[default]
    Single,
    /// Both directions: forward ring out, backward ring in
    Bundle,
}

impl TrackMode {
    /// Parse a query value; unknown values fall back to `Single`.
    pub fn parse(s: &str) -> Self {
        match s {
            "bundle" => TrackMode::Bundle,
            _ => TrackMode::Single,
        }
    }

    /// Wire form of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            TrackMode::Single => "single",
            TrackMode::Bundle => "bundle",
        }
    }
}

/// Track publisher style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackStyle {
    /// Exactly one publisher
    #[default]
    Mono,
    /// Multiple publishers share the ring (medusa)
    Multi,
}

impl TrackStyle {
    /// Parse a query value; unknown values fall back to `Mono`.
    pub fn parse(s: &str) -> Self {
        match s {
            "multi" => TrackStyle::Multi,
            _ => TrackStyle::Mono,
        }
    }

    /// Wire form of the style.
    pub fn as_str(self) -> &'static str {
        match self {
            TrackStyle::Mono => "mono",
            TrackStyle::Multi => "multi",
        }
    }
}

/// A named stream within a source, owning its ring buffers
pub struct Track {
    id: String,
    label: String,
    mime: RwLock<String>,
    mode: AtomicU8,
    style: AtomicU8,
    rings: Vec<Arc<RingBuffer>>,
    cards: Mutex<HashMap<String, String>>,
    /// In/out byte counters (statistics, relaxed ordering)
    pub metric: Metric,
}

impl Track {
    /// Create a track with dual rings for bi-directional use: index 0
    /// forward, index 1 backward.
    pub fn new(label: impl Into<String>, cap: usize, len: usize) -> Self {
        Self {
            id: new_id(),
            label: label.into(),
            mime: RwLock::new(String::new()),
            mode: AtomicU8::new(TrackMode::Single as u8),
            style: AtomicU8::new(TrackStyle::Mono as u8),
            rings: vec![
                Arc::new(RingBuffer::new("fore", cap, len)),
                Arc::new(RingBuffer::new("back", cap, len)),
            ],
            cards: Mutex::new(HashMap::new()),
            metric: Metric::default(),
        }
    }

    /// Track id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Track label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The forward ring (publisher deposits, subscribers read).
    pub fn fore(&self) -> &Arc<RingBuffer> {
        &self.rings[RING_FORE]
    }

    /// The backward ring (bundle return direction).
    pub fn back(&self) -> &Arc<RingBuffer> {
        &self.rings[RING_BACK]
    }

    /// All rings.
    pub fn rings(&self) -> &[Arc<RingBuffer>] {
        &self.rings
    }

    /// Current stream MIME; empty until a publisher announces one.
    pub fn mime(&self) -> String {
        self.mime.read().clone()
    }

    /// Set the stream MIME.
    pub fn set_mime(&self, mime: impl Into<String>) {
        *self.mime.write() = mime.into();
    }

    /// Current mode.
    pub fn mode(&self) -> TrackMode {
        if self.mode.load(Ordering::Relaxed) == TrackMode::Bundle as u8 {
            TrackMode::Bundle
        } else {
            TrackMode::Single
        }
    }

    /// Set the mode.
    pub fn set_mode(&self, mode: TrackMode) {
        self.mode.store(mode as u8, Ordering::Relaxed);
    }

    /// Current style.
    pub fn style(&self) -> TrackStyle {
        if self.style.load(Ordering::Relaxed) == TrackStyle::Multi as u8 {
            TrackStyle::Multi
        } else {
            TrackStyle::Mono
        }
    }

    /// Set the style.
    pub fn set_style(&self, style: TrackStyle) {
        self.style.store(style as u8, Ordering::Relaxed);
    }

    /// Store an agent card contributed by a peer session.
    pub fn set_card(&self, session_id: impl Into<String>, card: impl Into<String>) {
        self.cards.lock().insert(session_id.into(), card.into());
    }

    /// Snapshot of the agent cards.
    pub fn cards(&self) -> HashMap<String, String> {
        self.cards.lock().clone()
    }

    /// Set the active length of every ring; out-of-range values are
    /// ignored by the rings.
    pub fn set_ring_len(&self, len: usize) {
        for ring in &self.rings {
            ring.set_len(len);
        }
    }

    /// Clear the stream metadata when its publisher leaves: MIME and
    /// counters go back to zero, the rings keep their slots.
    pub fn reset_stream(&self) {
        self.mime.write().clear();
        self.metric.reset();
    }

    /// Full reset for peer-direct use: mode and MIME both cleared.
    pub fn reset_full(&self) {
        self.set_mode(TrackMode::Single);
        self.mime.write().clear();
    }

    /// Reset to the idle defaults when the owning channel goes idle.
    pub fn reset_style(&self) {
        self.set_style(TrackStyle::Mono);
        self.mime.write().clear();
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {}:{},{} ({},{})",
            self.id,
            self.label,
            self.mime(),
            self.mode().as_str(),
            self.metric.in_bytes(),
            self.metric.out_bytes()
        )
    }
}

/// A labelled set of tracks within a channel
pub struct Source {
    id: String,
    label: String,
    tracks: Mutex<HashMap<String, Arc<Track>>>,
}

impl Source {
    /// Create an empty source.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            label: label.into(),
            tracks: Mutex::new(HashMap::new()),
        }
    }

    /// Source id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Find a track by label.
    pub fn track(&self, label: &str) -> Option<Arc<Track>> {
        self.tracks.lock().get(label).cloned()
    }

    /// Find or lazily create a track by label.
    pub fn track_or_insert(&self, label: &str, cap: usize, len: usize) -> Arc<Track> {
        self.tracks
            .lock()
            .entry(label.to_string())
            .or_insert_with(|| Arc::new(Track::new(label, cap, len)))
            .clone()
    }

    /// Remove a track by label.
    pub fn delete_track(&self, label: &str) {
        self.tracks.lock().remove(label);
    }

    /// Number of tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.lock().len()
    }

    /// Snapshot of all tracks.
    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ring::{RING_CAP_SLOTS, RING_LEN_SLOTS};

    #[test]
    fn test_track_has_dual_rings() {
        let trk = Track::new("video", RING_CAP_SLOTS, RING_LEN_SLOTS);
        assert_eq!(trk.rings().len(), 2);
        assert_eq!(trk.fore().label(), "fore");
        assert_eq!(trk.back().label(), "back");
    }

    #[test]
    fn test_track_mime_and_reset() {
        let trk = Track::new("video", RING_CAP_SLOTS, RING_LEN_SLOTS);
        trk.set_mime("video/jpeg");
        trk.metric.add_in(100);
        assert_eq!(trk.mime(), "video/jpeg");

        trk.reset_stream();
        assert_eq!(trk.mime(), "");
        assert_eq!(trk.metric.in_bytes(), 0);
    }

    #[test]
    fn test_mode_style_parse() {
        assert_eq!(TrackMode::parse("bundle"), TrackMode::Bundle);
        assert_eq!(TrackMode::parse("anything"), TrackMode::Single);
        assert_eq!(TrackStyle::parse("multi"), TrackStyle::Multi);
        assert_eq!(TrackStyle::parse(""), TrackStyle::Mono);
    }

    #[test]
    fn test_source_lazy_track() {
        let src = Source::new("base");
        assert!(src.track("video").is_none());

        let t1 = src.track_or_insert("video", RING_CAP_SLOTS, RING_LEN_SLOTS);
        let t2 = src.track_or_insert("video", RING_CAP_SLOTS, RING_LEN_SLOTS);
        assert_eq!(t1.id(), t2.id());
        assert_eq!(src.track_count(), 1);

        src.delete_track("video");
        assert_eq!(src.track_count(), 0);
    }

    #[test]
    fn test_agent_cards() {
        let trk = Track::new("data", RING_CAP_SLOTS, RING_LEN_SLOTS);
        trk.set_card("sess-1", "robot-arm");
        trk.set_card("sess-2", "camera");
        let cards = trk.cards();
        assert_eq!(cards.get("sess-1").map(String::as_str), Some("robot-arm"));
        assert_eq!(cards.len(), 2);
    }
}
