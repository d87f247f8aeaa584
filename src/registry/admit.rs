//! Admission control
//!
//! Every publish/subscribe request goes through the same gate: resource
//! uniqueness, channel state, license caps, stream key. Admission yields a
//! [`Live`] handle owning the registered session and its channel
//! attachment; dropping it unwinds everything the admission did:
//! out-event, track reset, role unregistration, session removal and the
//! channel's Using→Idle transition once no sessions remain.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::media::{Source, Track, TrackMode, TrackStyle};
use crate::query::QueryOption;
use crate::registry::channel::Channel;
use crate::registry::session::Session;
use crate::registry::studio::Studio;
use crate::registry::State;

/// Which channel membership set a role joins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joins {
    Publishers,
    Subscribers,
    Nobody,
}

/// Which license cap a role is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cap {
    /// Using channels vs `num_pubs`
    Pubs,
    /// Using sessions vs `num_subs`
    Subs,
    Free,
}

/// How a role shapes the track it attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// Mode and style from the query
    FromQuery,
    /// Medusa: bundle mode, multi style, regardless of query
    Medusa,
    /// Peer-direct: bundle mode
    Bundle,
    Keep,
}

/// What to restore on the track when the role leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restore {
    /// Clear MIME and counters (publisher left)
    Stream,
    /// Clear MIME and mode (peer-direct)
    Full,
    Keep,
}

/// Admission profile of an API role
#[derive(Debug, Clone, Copy)]
pub struct Role {
    event: Option<&'static str>,
    joins: Joins,
    cap: Cap,
    checks_key: bool,
    unique: bool,
    shape: Shape,
    restore: Restore,
}

impl Role {
    /// Data publisher (`/pang/ws/pub`, `/pang/tcp/pub`)
    pub const PUBLISHER: Role = Role {
        event: Some("pub"),
        joins: Joins::Publishers,
        cap: Cap::Pubs,
        checks_key: true,
        unique: true,
        shape: Shape::FromQuery,
        restore: Restore::Stream,
    };

    /// Data subscriber (`/pang/ws/sub`, `/pang/tcp/sub`)
    pub const SUBSCRIBER: Role = Role {
        event: Some("sub"),
        joins: Joins::Subscribers,
        cap: Cap::Subs,
        checks_key: true,
        unique: false,
        shape: Shape::Keep,
        restore: Restore::Keep,
    };

    /// Medusa participant (`/pang/ws/meb`, `/pang/tcp/meb`)
    pub const MEDUSA: Role = Role {
        event: Some("meb"),
        joins: Joins::Nobody,
        cap: Cap::Free,
        checks_key: true,
        unique: false,
        shape: Shape::Medusa,
        restore: Restore::Keep,
    };

    /// Peer-direct partner (`/pang/ws/p2p`)
    pub const PEER: Role = Role {
        event: Some("p2p"),
        joins: Joins::Nobody,
        cap: Cap::Free,
        checks_key: false,
        unique: false,
        shape: Shape::Bundle,
        restore: Restore::Full,
    };

    /// UDP data publisher (`/pang/udp/pub`)
    pub const UDP_PUBLISHER: Role = Role {
        event: None,
        joins: Joins::Nobody,
        cap: Cap::Free,
        checks_key: true,
        unique: true,
        shape: Shape::FromQuery,
        restore: Restore::Keep,
    };

    /// UDP data subscriber (`/pang/udp/sub`)
    pub const UDP_SUBSCRIBER: Role = Role {
        event: None,
        joins: Joins::Nobody,
        cap: Cap::Free,
        checks_key: true,
        unique: false,
        shape: Shape::Keep,
        restore: Restore::Keep,
    };

    /// Minimal cast publisher (`/cast/ws/pub`)
    pub const CAST_PUBLISHER: Role = Role {
        event: None,
        joins: Joins::Nobody,
        cap: Cap::Free,
        checks_key: true,
        unique: false,
        shape: Shape::Keep,
        restore: Restore::Keep,
    };

    /// Minimal cast subscriber (`/cast/ws/sub`)
    pub const CAST_SUBSCRIBER: Role = Role {
        event: None,
        joins: Joins::Nobody,
        cap: Cap::Free,
        checks_key: true,
        unique: false,
        shape: Shape::Keep,
        restore: Restore::Keep,
    };

    /// Pull-bridge local republisher
    pub const PULLER: Role = Role {
        event: Some("pull"),
        joins: Joins::Publishers,
        cap: Cap::Pubs,
        checks_key: false,
        unique: false,
        shape: Shape::FromQuery,
        restore: Restore::Stream,
    };

    /// Push-bridge local reader
    pub const PUSHER: Role = Role {
        event: Some("push"),
        joins: Joins::Subscribers,
        cap: Cap::Free,
        checks_key: false,
        unique: false,
        shape: Shape::Keep,
        restore: Restore::Keep,
    };
}

/// A fully admitted session with its channel attachment.
///
/// Dropping the handle performs the whole teardown.
pub struct Live {
    studio: Arc<Studio>,
    /// The admitted session
    pub session: Arc<Session>,
    /// The channel the session attached to
    pub channel: Arc<Channel>,
    /// The resolved source
    pub source: Arc<Source>,
    /// The resolved track
    pub track: Arc<Track>,
    role: Role,
    announced: bool,
}

impl Live {
    /// The reqid slot events carry: the bridge id for bridge-driven
    /// sessions, the client request id otherwise.
    fn event_tag(&self) -> String {
        if self.session.bridge_id.is_empty() {
            self.session.request_id.clone()
        } else {
            self.session.bridge_id.clone()
        }
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        if self.announced {
            if let Some(prefix) = self.role.event {
                self.channel.push_event(
                    &self.studio,
                    &format!("{prefix}-out"),
                    self.session.id(),
                    self.session.name(),
                    &self.event_tag(),
                );
            }
        }
        match self.role.restore {
            Restore::Stream => self.track.reset_stream(),
            Restore::Full => self.track.reset_full(),
            Restore::Keep => {}
        }
        match self.role.joins {
            Joins::Publishers => self.channel.delete_publisher(self.session.id()),
            Joins::Subscribers => self.channel.delete_subscriber(self.session.id()),
            Joins::Nobody => {}
        }
        self.studio.delete_session(self.session.id());
        self.studio.idle_channel_if_unused(self.channel.id());
        if !self.session.bridge_id.is_empty() {
            self.studio.idle_bridge_if_unused(&self.session.bridge_id);
        }
    }
}

/// Admit a session on the channel a query resolved to.
///
/// The query must already carry a real channel id (see
/// [`Studio::resolve_channel`]). On any refusal the channel is returned to
/// Idle when nothing else uses it.
pub fn attach(
    studio: &Arc<Studio>,
    qo: &QueryOption,
    path: &str,
    remote_addr: &str,
    bridge_id: &str,
    role: Role,
) -> Result<Live> {
    let result = attach_inner(studio, qo, path, remote_addr, bridge_id, role);
    if result.is_err() {
        studio.idle_channel_if_unused(&qo.channel.id);
    }
    result
}

fn attach_inner(
    studio: &Arc<Studio>,
    qo: &QueryOption,
    path: &str,
    remote_addr: &str,
    bridge_id: &str,
    role: Role,
) -> Result<Live> {
    if role.unique && !studio.is_resource_available(qo) {
        return Err(Error::Admission(format!(
            "resource [{}/{}/{}] already used",
            qo.channel.id, qo.source_label, qo.track_label
        )));
    }

    let channel = studio.use_channel(&qo.channel.id)?;

    match role.cap {
        Cap::Pubs => {
            let using = studio.count_channels(Some(State::Using));
            if using > studio.limits.num_pubs {
                return Err(Error::Admission(format!(
                    "too many channels for license: {}/{}",
                    using, studio.limits.num_pubs
                )));
            }
        }
        Cap::Subs => {
            let using = studio.count_sessions(Some(State::Using)) + 1;
            if using > studio.limits.num_subs {
                return Err(Error::Admission(format!(
                    "too many sessions for license: {}/{}",
                    using, studio.limits.num_subs
                )));
            }
        }
        Cap::Free => {}
    }

    if role.checks_key && (channel.meta.blocked() || !channel.is_valid_key(&qo.channel.key)) {
        return Err(Error::Admission(format!(
            "not allowed to use: blocked {}, key {:?}",
            channel.meta.blocked(),
            qo.channel.key
        )));
    }

    let (source, track) = channel.add_source_track(&qo.source_label, &qo.track_label);
    match role.shape {
        Shape::FromQuery => {
            track.set_mode(TrackMode::parse(&qo.track.mode));
            track.set_style(TrackStyle::parse(&qo.track.style));
        }
        Shape::Medusa => {
            track.set_mode(TrackMode::Bundle);
            track.set_style(TrackStyle::Multi);
        }
        Shape::Bundle => track.set_mode(TrackMode::Bundle),
        Shape::Keep => {}
    }

    let mut session = Session::with_request(path, qo.session.reqid.as_str());
    session.set_timeout(qo.session.timeout, &qo.session.unit);
    session.channel_id = channel.id().to_string();
    session.source_label = qo.source_label.clone();
    session.track_label = qo.track_label.clone();
    session.remote_addr = remote_addr.to_string();
    session.bridge_id = bridge_id.to_string();
    let session = studio.add_session(session);

    match role.joins {
        Joins::Publishers => channel.add_publisher(Arc::clone(&session)),
        Joins::Subscribers => channel.add_subscriber(Arc::clone(&session)),
        Joins::Nobody => {}
    }

    let mut live = Live {
        studio: Arc::clone(studio),
        session,
        channel,
        source,
        track,
        role,
        announced: false,
    };

    if let Some(prefix) = role.event {
        live.channel.push_event(
            &live.studio,
            &format!("{prefix}-in"),
            live.session.id(),
            live.session.name(),
            &live.event_tag(),
        );
        live.announced = true;
    }

    Ok(live)
}
