//! Worker, punch and group entities
//!
//! Workers are handles for internal long-running tasks (listeners, event
//! brokers, the sweeper); they are registered in the studio but not
//! user-visible. Punches are directory records for the TCP peer
//! signalling flow. Groups collect channels and sessions under one name.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::registry::base::{Meta, Stamp, State, StateCell};

/// Handle for an internal long-running task
pub struct Worker {
    /// Common envelope; `name` carries the worker's role path
    pub meta: Meta,
    /// Worker activity state
    pub state: StateCell,
    /// Envelope clock
    pub stamp: Stamp,
    /// Owning session, when the worker serves one
    pub session_id: String,
    /// Owning channel (or studio) id
    pub channel_id: String,
    /// Transport the worker listens on (`tcp`, `tcps`, `http/tcp`)
    pub proto: Mutex<String>,
    /// Bind address
    pub addr: Mutex<String>,
    /// Worker style (`system`)
    pub style: String,
}

impl Worker {
    /// Create a Using worker for `name` bound to `channel_id`.
    pub fn new(name: impl Into<String>, channel_id: impl Into<String>, style: impl Into<String>) -> Self {
        let mut meta = Meta::new("worker");
        meta.name = name.into();
        Self {
            meta,
            state: StateCell::new(State::Using),
            stamp: Stamp::default(),
            session_id: String::new(),
            channel_id: channel_id.into(),
            proto: Mutex::new(String::new()),
            addr: Mutex::new(String::new()),
            style: style.into(),
        }
    }

    /// Worker id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Record the listen endpoint.
    pub fn set_endpoint(&self, proto: &str, addr: &str) {
        *self.proto.lock() = proto.into();
        *self.addr.lock() = addr.into();
    }
}

/// Directory record for the TCP peer signalling flow
pub struct Punch {
    /// Common envelope; `name` is `/<channel>/<source>/<track>`
    pub meta: Meta,
    /// Punch activity state
    pub state: StateCell,
    /// Envelope clock; `expired` is refreshed by peer heartbeats
    pub stamp: Stamp,
    /// Session currently holding the punch
    pub session_id: Mutex<String>,
    /// Channel the punch belongs to
    pub channel_id: String,
    /// Source label
    pub source_label: String,
    /// Track label
    pub track_label: String,
    /// Role that created the record
    pub role: Mutex<String>,
    /// Observed remote address for hole punching
    pub addr: Mutex<String>,
}

impl Punch {
    /// Create a punch for a (channel, source, track) triple.
    pub fn new(channel_id: &str, source_label: &str, track_label: &str) -> Self {
        let mut meta = Meta::new("punch");
        meta.name = format!("/{channel_id}/{source_label}/{track_label}");
        Self {
            meta,
            state: StateCell::new(State::Idle),
            stamp: Stamp::default(),
            session_id: Mutex::new(String::new()),
            channel_id: channel_id.into(),
            source_label: source_label.into(),
            track_label: track_label.into(),
            role: Mutex::new(String::new()),
            addr: Mutex::new(String::new()),
        }
    }

    /// Punch id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Directory name (`/<channel>/<source>/<track>`).
    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

/// A named set of channels and sessions
pub struct Group {
    /// Common envelope
    pub meta: Meta,
    /// Group activity state
    pub state: StateCell,
    /// Envelope clock
    pub stamp: Stamp,
    /// Member channel ids
    pub channels: Mutex<HashSet<String>>,
    /// Member session ids
    pub sessions: Mutex<HashSet<String>>,
}

impl Group {
    /// Create an empty group.
    pub fn new(name: impl Into<String>) -> Self {
        let mut meta = Meta::new("group");
        meta.name = name.into();
        Self {
            meta,
            state: StateCell::new(State::Idle),
            stamp: Stamp::default(),
            channels: Mutex::new(HashSet::new()),
            sessions: Mutex::new(HashSet::new()),
        }
    }

    /// Group id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punch_directory_name() {
        let p = Punch::new("chan1", "base", "video");
        assert_eq!(p.name(), "/chan1/base/video");
        assert!(p.state.is(State::Idle));
    }

    #[test]
    fn test_worker_starts_using() {
        let w = Worker::new("/server/tcp/api", "studio1", "system");
        assert!(w.state.using());
        w.set_endpoint("tcp", ":8274");
        assert_eq!(*w.proto.lock(), "tcp");
    }
}
