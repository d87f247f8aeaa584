//! Bridge: a one-way copy between a remote endpoint and a local channel
//!
//! The entity lives here; the dialers that run a bridge are in
//! [`crate::client`]. A bridge is described by two spots (`from`, `to`),
//! a direction (`push` publishes a local channel to a remote server,
//! `pull` republishes a remote channel locally) and an attribute deciding
//! when it starts.

use serde::{Deserialize, Serialize};

use crate::registry::base::{Meta, Metric, Stamp, State, StateCell};

/// When a bridge starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeAttr {
    /// Start when the local channel first receives a publisher
    Auto,
    /// Start at studio startup and on every sweep while not running
    Ever,
    /// Manual only
    #[default]
    None,
}

impl BridgeAttr {
    /// Parse a config value; unknown values fall back to `None`.
    pub fn parse(s: &str) -> Self {
        match s {
            "auto" => BridgeAttr::Auto,
            "ever" => BridgeAttr::Ever,
            _ => BridgeAttr::None,
        }
    }

    /// Wire form of the attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeAttr::Auto => "auto",
            BridgeAttr::Ever => "ever",
            BridgeAttr::None => "none",
        }
    }
}

/// Copy direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeDirection {
    /// Local tracks are dialed out to the remote publisher endpoint
    #[default]
    Push,
    /// Remote tracks are dialed in and republished locally
    Pull,
}

impl BridgeDirection {
    /// Parse a config value; unknown values fall back to `Push`.
    pub fn parse(s: &str) -> Self {
        match s {
            "pull" => BridgeDirection::Pull,
            _ => BridgeDirection::Push,
        }
    }

    /// Wire form of the direction.
    pub fn as_str(self) -> &'static str {
        match self {
            BridgeDirection::Push => "push",
            BridgeDirection::Pull => "pull",
        }
    }
}

/// One end of a bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Spot {
    /// Dial scheme (`ws`, `wss`); `int` marks the in-process side
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proto: String,
    /// host:port of the server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub addr: String,
    /// API path (`/pang/ws/pub`, `/pang/ws/sub`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api: String,
    /// Channel id on this end
    #[serde(default, rename = "chid", skip_serializing_if = "String::is_empty")]
    pub channel_id: String,
    /// Optional source label filter/remap
    #[serde(default, rename = "slabel", skip_serializing_if = "String::is_empty")]
    pub source_label: String,
    /// Optional track label filter/remap
    #[serde(default, rename = "tlabel", skip_serializing_if = "String::is_empty")]
    pub track_label: String,
}

impl std::fmt::Display for Spot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}://{}{} ({} / {} / {})",
            self.proto, self.addr, self.api, self.channel_id, self.source_label, self.track_label
        )
    }
}

/// Default bridge timeout in seconds
pub const BRIDGE_BASE_TIMEOUT: u64 = 10;

/// A connection line between tracks of two channels
pub struct Bridge {
    /// Common envelope
    pub meta: Meta,
    /// Bridge activity state
    pub state: StateCell,
    /// Envelope clock
    pub stamp: Stamp,
    /// Client request id
    pub request_id: String,
    /// Per-dial timeout in seconds
    pub timeout: u64,
    /// Remote or local origin
    pub from: Spot,
    /// Remote or local destination
    pub to: Spot,
    /// Start policy
    pub attr: BridgeAttr,
    /// Copy direction
    pub direction: BridgeDirection,
    /// In/out byte counters
    pub metric: Metric,
}

impl Bridge {
    /// Create a bridge with the `push`/`none` defaults.
    pub fn new(name: impl Into<String>) -> Self {
        let mut meta = Meta::new("bridge");
        meta.name = name.into();
        Self {
            meta,
            state: StateCell::new(State::Idle),
            stamp: Stamp::default(),
            request_id: String::new(),
            timeout: BRIDGE_BASE_TIMEOUT,
            from: Spot::default(),
            to: Spot::default(),
            attr: BridgeAttr::None,
            direction: BridgeDirection::Push,
            metric: Metric::default(),
        }
    }

    /// Bridge id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Fill in the dial defaults for loaded bridges: `from` is the
    /// in-process side unless told otherwise, `to` dials WebSocket, and
    /// the timeout floors at one second.
    pub fn normalize(&mut self) {
        if self.from.proto.is_empty() {
            self.from.proto = "int".into();
        }
        if self.to.proto.is_empty() {
            self.to.proto = "ws".into();
        }
        if self.timeout < 1 {
            self.timeout = BRIDGE_BASE_TIMEOUT;
        }
    }
}

impl std::fmt::Display for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} timeout: {}s, attr: {}, direction: {}, from: {}, to: {}",
            self.meta,
            self.timeout,
            self.attr.as_str(),
            self.direction.as_str(),
            self.from,
            self.to
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_parse() {
        assert_eq!(BridgeAttr::parse("auto"), BridgeAttr::Auto);
        assert_eq!(BridgeAttr::parse("ever"), BridgeAttr::Ever);
        assert_eq!(BridgeAttr::parse("none"), BridgeAttr::None);
        assert_eq!(BridgeAttr::parse(""), BridgeAttr::None);
    }

    #[test]
    fn test_normalize_defaults() {
        let mut b = Bridge::new("b1");
        b.timeout = 0;
        b.normalize();
        assert_eq!(b.from.proto, "int");
        assert_eq!(b.to.proto, "ws");
        assert_eq!(b.timeout, BRIDGE_BASE_TIMEOUT);
    }
}
