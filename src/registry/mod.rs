//! The registry: channels, sessions, bridges, workers and the studio
//!
//! The studio is the process-wide owner of every top-level entity; a
//! channel owns its sources, a source its tracks, a track its rings.
//! Sessions reference their channel by id only: a session never keeps a
//! channel alive.

mod admit;
mod base;
mod bridge;
mod channel;
mod persist;
mod session;
mod studio;
mod view;
mod worker;

pub use admit::{attach, Live, Role};
pub use base::{ConnWatcher, Meta, Metric, Stamp, State, StateCell};
pub use bridge::{Bridge, BridgeAttr, BridgeDirection, Spot, BRIDGE_BASE_TIMEOUT};
pub use channel::{Channel, ChannelStyle, Feature, Peer, EXPIRE_DYNAMIC, EXPIRE_INSTANT};
pub use persist::{BridgeSpec, ChannelSpec};
pub use session::{Session, TimeUnit, WAIT_BASE_SECONDS, WAIT_MAX_SECONDS};
pub use studio::{Counts, Limits, Studio, STATIC_PURGE_AGE};
pub use view::{ChannelInfo, PunchInfo, RingInfo, SessionInfo, SourceInfo, TrackInfo};
pub use worker::{Group, Punch, Worker};
