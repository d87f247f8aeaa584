//! Common envelope types shared by all registry entities
//!
//! Channels, sessions, bridges, workers, groups, punches and the studio
//! itself carry the same envelope: a kind tag, an id, a name, a two-valued
//! state, a blocked flag and four timestamps. The envelope is composed in
//! (`meta`/`stamp` fields), not inherited.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::id::new_id;

/// Entity lifecycle state.
///
/// "Closing" an entity means transitioning Using → Idle; it never erases
/// the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Not in use
    #[default]
    Idle,
    /// In use
    Using,
}

impl State {
    /// Parse the wire form; anything but "idle" reads as Using.
    pub fn parse(s: &str) -> Self {
        if s == "idle" {
            State::Idle
        } else {
            State::Using
        }
    }

    /// Wire form of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Using => "using",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free state holder checked by session loops on every iteration.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Create a cell in the given state.
    pub fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    /// Current state.
    pub fn get(&self) -> State {
        if self.0.load(Ordering::Acquire) == State::Using as u8 {
            State::Using
        } else {
            State::Idle
        }
    }

    /// Set the state.
    pub fn set(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// True when the cell holds `state`.
    pub fn is(&self, state: State) -> bool {
        self.get() == state
    }

    /// True when the cell holds `Using`.
    pub fn using(&self) -> bool {
        self.is(State::Using)
    }
}

/// Identity part of the common envelope.
#[derive(Debug)]
pub struct Meta {
    /// Entity kind tag ("channel", "session", ...)
    pub kind: &'static str,
    /// Sortable unique id
    pub id: String,
    /// User-facing name; defaults to the id when empty
    pub name: String,
    /// Free-form description
    pub describe: String,
    /// Entity style (channel: static/dynamic/instant)
    pub style: String,
    blocked: AtomicBool,
}

impl Meta {
    /// Create an envelope with a fresh id.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            id: new_id(),
            name: String::new(),
            describe: String::new(),
            style: String::new(),
            blocked: AtomicBool::new(false),
        }
    }

    /// Blocked entities admit nothing.
    pub fn blocked(&self) -> bool {
        self.blocked.load(Ordering::Relaxed)
    }

    /// Set the blocked flag.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::Relaxed);
    }
}

impl std::fmt::Display for Meta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] id: {}, name: {}, block: {}",
            self.kind,
            self.id,
            self.name,
            self.blocked()
        )
    }
}

/// Clock part of the common envelope.
#[derive(Debug)]
pub struct Stamp {
    created: SystemTime,
    updated: Mutex<SystemTime>,
    expired: Mutex<SystemTime>,
    last_used: Mutex<SystemTime>,
}

impl Default for Stamp {
    fn default() -> Self {
        let now = SystemTime::now();
        Self {
            created: now,
            updated: Mutex::new(now),
            expired: Mutex::new(SystemTime::UNIX_EPOCH),
            last_used: Mutex::new(now),
        }
    }
}

impl Stamp {
    /// Creation time, fixed at construction.
    pub fn created(&self) -> SystemTime {
        self.created
    }

    /// Last update time.
    pub fn updated(&self) -> SystemTime {
        *self.updated.lock()
    }

    /// Record an update now.
    pub fn touch_updated(&self) {
        *self.updated.lock() = SystemTime::now();
    }

    /// Last use time.
    pub fn last_used(&self) -> SystemTime {
        *self.last_used.lock()
    }

    /// Record a use now.
    pub fn touch_used(&self) {
        *self.last_used.lock() = SystemTime::now();
    }

    /// Expiry deadline; `UNIX_EPOCH` means never.
    pub fn expired(&self) -> SystemTime {
        *self.expired.lock()
    }

    /// Set the expiry deadline.
    pub fn set_expired(&self, at: SystemTime) {
        *self.expired.lock() = at;
    }

    /// Extend the expiry to `ttl` from now.
    pub fn expire_in(&self, ttl: Duration) {
        self.set_expired(SystemTime::now() + ttl);
    }

    /// True once the deadline has passed (never true for `UNIX_EPOCH`).
    pub fn is_expired(&self) -> bool {
        let at = self.expired();
        at != SystemTime::UNIX_EPOCH && SystemTime::now() > at
    }

    /// True when the last use is older than `age`.
    pub fn idle_for(&self, age: Duration) -> bool {
        SystemTime::now() > self.last_used() + age
    }
}

/// In/out byte counters.
///
/// Incremented by one writer or reader per direction and read by monitors;
/// relaxed ordering is fine, these are statistics, not correctness.
#[derive(Debug, Default)]
pub struct Metric {
    in_bytes: AtomicU64,
    out_bytes: AtomicU64,
}

impl Metric {
    /// Add received bytes.
    pub fn add_in(&self, n: usize) {
        self.in_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Add sent bytes.
    pub fn add_out(&self, n: usize) {
        self.out_bytes.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Total received bytes.
    pub fn in_bytes(&self) -> u64 {
        self.in_bytes.load(Ordering::Relaxed)
    }

    /// Total sent bytes.
    pub fn out_bytes(&self) -> u64 {
        self.out_bytes.load(Ordering::Relaxed)
    }

    /// Zero both counters.
    pub fn reset(&self) {
        self.in_bytes.store(0, Ordering::Relaxed);
        self.out_bytes.store(0, Ordering::Relaxed);
    }
}

/// Process-wide connection counters, bumped by the listeners.
#[derive(Debug, Default)]
pub struct ConnWatcher {
    total: AtomicU64,
    current: AtomicU64,
}

impl ConnWatcher {
    /// Record an accepted connection.
    pub fn opened(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed (or hijacked) connection.
    pub fn closed(&self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }

    /// Connections currently open.
    pub fn count(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Connections accepted since start.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse() {
        assert_eq!(State::parse("idle"), State::Idle);
        assert_eq!(State::parse("using"), State::Using);
        assert_eq!(State::parse("anything"), State::Using);
    }

    #[test]
    fn test_state_cell() {
        let cell = StateCell::new(State::Idle);
        assert!(cell.is(State::Idle));
        assert!(!cell.using());
        cell.set(State::Using);
        assert!(cell.using());
    }

    #[test]
    fn test_stamp_expiry() {
        let stamp = Stamp::default();
        assert!(!stamp.is_expired()); // never expires until set

        stamp.set_expired(SystemTime::now() - Duration::from_secs(1));
        assert!(stamp.is_expired());

        stamp.expire_in(Duration::from_secs(60));
        assert!(!stamp.is_expired());
    }

    #[test]
    fn test_metric_counts() {
        let m = Metric::default();
        m.add_in(100);
        m.add_in(24);
        m.add_out(7);
        assert_eq!(m.in_bytes(), 124);
        assert_eq!(m.out_bytes(), 7);
        m.reset();
        assert_eq!(m.in_bytes(), 0);
    }

    #[test]
    fn test_conn_watcher() {
        let w = ConnWatcher::default();
        w.opened();
        w.opened();
        w.closed();
        assert_eq!(w.count(), 1);
        assert_eq!(w.total(), 2);
    }
}
