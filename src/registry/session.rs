//! Session: one live connection's state
//!
//! A session is created Using when a connection is admitted and
//! transitions to Idle on close; the streaming loops check both the
//! session and its channel state on every iteration. Back-references to
//! the channel/source/track are ids, not owning pointers: a session never
//! keeps a channel alive.

use std::time::Duration;

use crate::registry::base::{Meta, Metric, Stamp, State, StateCell};

/// Default read/write deadline
pub const WAIT_BASE_SECONDS: u64 = 30;
/// Upper bound for the deadline
pub const WAIT_MAX_SECONDS: u64 = 3600;

/// Sleep granularity used when a reader has caught up with the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    /// Busy spin (still yields to the scheduler)
    Zero,
    /// Nanosecond ticks
    Nano,
    /// Microsecond ticks
    Micro,
    /// Millisecond ticks (default)
    #[default]
    Milli,
    /// Second ticks
    Sec,
}

impl TimeUnit {
    /// Parse a query value; unknown values fall back to `Milli`.
    pub fn parse(s: &str) -> Self {
        match s {
            "zero" => TimeUnit::Zero,
            "nano" => TimeUnit::Nano,
            "micro" => TimeUnit::Micro,
            "sec" => TimeUnit::Sec,
            _ => TimeUnit::Milli,
        }
    }

    /// One tick of this unit.
    pub fn tick(self) -> Duration {
        match self {
            TimeUnit::Zero => Duration::ZERO,
            TimeUnit::Nano => Duration::from_nanos(1),
            TimeUnit::Micro => Duration::from_micros(1),
            TimeUnit::Milli => Duration::from_millis(1),
            TimeUnit::Sec => Duration::from_secs(1),
        }
    }
}

/// One live connection
pub struct Session {
    /// Common envelope; `name` carries the API path that selected the role
    pub meta: Meta,
    state: StateCell,
    /// Envelope clock
    pub stamp: Stamp,
    /// Remote peer address, when known
    pub remote_addr: String,
    /// Owning bridge id, for bridge-driven sessions
    pub bridge_id: String,
    /// Owning group id
    pub group_id: String,
    /// Channel back-reference (id, weak)
    pub channel_id: String,
    /// Source back-reference (label)
    pub source_label: String,
    /// Track back-reference (label)
    pub track_label: String,
    /// Opaque client request id
    pub request_id: String,
    time_over: Duration,
    time_unit: Duration,
    /// In/out byte counters
    pub metric: Metric,
}

impl Session {
    /// Create a session in the Using state, named after its API path.
    pub fn new(path: impl Into<String>) -> Self {
        let mut meta = Meta::new("session");
        meta.name = path.into();
        Self {
            meta,
            state: StateCell::new(State::Using),
            stamp: Stamp::default(),
            remote_addr: String::new(),
            bridge_id: String::new(),
            group_id: String::new(),
            channel_id: String::new(),
            source_label: String::new(),
            track_label: String::new(),
            request_id: String::new(),
            time_over: Duration::from_secs(WAIT_BASE_SECONDS),
            time_unit: TimeUnit::Milli.tick(),
            metric: Metric::default(),
        }
    }

    /// Create a session carrying a client request id.
    pub fn with_request(path: impl Into<String>, reqid: impl Into<String>) -> Self {
        let mut s = Self::new(path);
        s.request_id = reqid.into();
        s
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// API path this session was admitted on.
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// True while the session is in use; loops check this every iteration.
    pub fn using(&self) -> bool {
        self.state.using()
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state.get()
    }

    /// Transition to Idle. Loops observe on their next iteration; the
    /// transport deadline bounds the wait.
    pub fn close(&self) {
        self.state.set(State::Idle);
    }

    /// Configure deadline and tick from query values. Timeouts outside
    /// 1..3599 seconds fall back to the 30 s default.
    pub fn set_timeout(&mut self, timeout_secs: u64, unit: &str) {
        self.time_unit = TimeUnit::parse(unit).tick();
        self.time_over = if timeout_secs > 0 && timeout_secs < WAIT_MAX_SECONDS {
            Duration::from_secs(timeout_secs)
        } else {
            Duration::from_secs(WAIT_BASE_SECONDS)
        };
    }

    /// Read/write deadline.
    pub fn time_over(&self) -> Duration {
        self.time_over
    }

    /// Idle-sleep tick.
    pub fn time_unit(&self) -> Duration {
        self.time_unit
    }
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} channel: {}, source: {}, track: {}, time: {:?}/{:?}",
            self.meta, self.channel_id, self.source_label, self.track_label,
            self.time_unit, self.time_over
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_starts_using() {
        let s = Session::new("/pang/ws/pub");
        assert!(s.using());
        assert_eq!(s.name(), "/pang/ws/pub");
        s.close();
        assert!(!s.using());
        assert_eq!(s.state(), State::Idle);
    }

    #[test]
    fn test_timeout_defaults() {
        let mut s = Session::new("/pang/ws/sub");
        s.set_timeout(0, "");
        assert_eq!(s.time_over(), Duration::from_secs(30));
        assert_eq!(s.time_unit(), Duration::from_millis(1));
    }

    #[test]
    fn test_timeout_bounds() {
        let mut s = Session::new("/pang/ws/sub");
        s.set_timeout(1, "sec");
        assert_eq!(s.time_over(), Duration::from_secs(1));
        assert_eq!(s.time_unit(), Duration::from_secs(1));

        s.set_timeout(3599, "nano");
        assert_eq!(s.time_over(), Duration::from_secs(3599));
        assert_eq!(s.time_unit(), Duration::from_nanos(1));

        // 3600 is out of range, back to default
        s.set_timeout(3600, "zero");
        assert_eq!(s.time_over(), Duration::from_secs(30));
        assert_eq!(s.time_unit(), Duration::ZERO);
    }
}
