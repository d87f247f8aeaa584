//! Event messages and brokers
//!
//! Each channel owns a bounded event queue (capacity 2) and a set of
//! listener sinks; a per-channel broker drains the queue and fans events
//! out as JSON text frames, exiting when no listeners remain. Selected
//! events (`pub-in`) are forwarded to the studio-wide bus, whose broker
//! additionally triggers `auto` bridges.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::check_bridges;
use crate::error::Result;
use crate::id::new_id;
use crate::protocol::Frame;
use crate::registry::{Channel, State, Studio};
use crate::transport::FrameSink;

/// Capacity of every event queue
pub const EVENT_QUEUE_LEN: usize = 2;

/// One event on a channel or studio bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// Always "event"
    #[serde(rename = "type")]
    pub kind: String,
    /// Event id
    pub id: String,
    /// Event name (`pub-in`, `sub-out`, ...)
    pub name: String,
    /// Payload, usually the subject session id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    /// API path that produced the event
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Client request id, when the subject session carried one
    #[serde(default, skip_serializing_if = "String::is_empty", rename = "req_id")]
    pub request_id: String,
    /// Creation time
    pub at_created: DateTime<Utc>,
}

impl EventMessage {
    /// Create an event.
    pub fn new(name: &str, data: &str, path: &str, reqid: &str) -> Self {
        Self {
            kind: "event".into(),
            id: new_id(),
            name: name.into(),
            data: data.into(),
            path: path.into(),
            request_id: reqid.into(),
            at_created: Utc::now(),
        }
    }
}

impl std::fmt::Display for EventMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}, {}, {}, {}", self.kind, self.id, self.name, self.data, self.path)
    }
}

/// Drain a channel's event queue and fan out to its listeners.
///
/// Runs while listeners remain; exits (and flips the channel's event state
/// back to Idle) once the listener set empties or the queue closes.
pub async fn channel_event_broker(path: String, studio: Arc<Studio>, channel: Arc<Channel>) -> Result<()> {
    tracing::debug!(channel = %channel.id(), "channel event broker started");

    let worker = studio.add_worker(&path, channel.id(), "system");
    channel.set_event_state(State::Using);

    let result = broker_loop(&channel).await;

    channel.set_event_state(State::Idle);
    studio.delete_worker(worker.id());
    tracing::debug!(channel = %channel.id(), "channel event broker stopped");
    result
}

async fn broker_loop(channel: &Arc<Channel>) -> Result<()> {
    let rx = channel.event_rx();
    let mut rx = rx.lock().await;

    loop {
        let event = match tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(()), // queue closed with the channel
            Err(_) => {
                if channel.eventer_count() == 0 {
                    return Ok(()); // broker no longer needed
                }
                continue;
            }
        };

        tracing::debug!(event = %event, "channel event");
        let frame = Frame::text(serde_json::to_string(&event)?);
        for (id, sink) in channel.eventers() {
            let mut sink = sink.lock().await;
            if let Err(e) = sink.send_frame(&frame, Duration::from_secs(3)).await {
                tracing::debug!(eventer = %id, error = %e, "dropping event listener");
                channel.delete_eventer(&id);
            }
        }
    }
}

/// Drain the studio-wide event queue.
///
/// Fans events out to studio-level listeners, and on `pub-in` gives the
/// publisher a settling second before starting `auto` bridges.
pub async fn studio_event_broker(studio: Arc<Studio>) -> Result<()> {
    tracing::info!(studio = %studio.id(), "studio event broker started");

    let worker = studio.add_worker("/studio/event/broker", studio.id(), "system");
    studio.set_event_state(State::Using);

    let rx = studio.event_rx();
    let mut rx = rx.lock().await;

    while worker.state.using() {
        let Some(event) = rx.recv().await else { break };
        tracing::debug!(event = %event, "studio event");

        let frame = match serde_json::to_string(&event) {
            Ok(json) => Frame::text(json),
            Err(e) => {
                tracing::warn!(error = %e, "unencodable studio event");
                continue;
            }
        };
        for (id, sink) in studio.eventers() {
            let mut sink = sink.lock().await;
            if let Err(e) = sink.send_frame(&frame, Duration::from_secs(3)).await {
                tracing::debug!(eventer = %id, error = %e, "dropping studio event listener");
                studio.delete_eventer(&id);
            }
        }

        if event.name == "pub-in" {
            tokio::time::sleep(Duration::from_secs(1)).await;
            check_bridges(&studio, "auto").await;
        }
    }

    studio.set_event_state(State::Idle);
    studio.delete_worker(worker.id());
    tracing::info!(studio = %studio.id(), "studio event broker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = EventMessage::new("pub-in", "sess-1", "/pang/ws/pub", "req-9");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("\"name\":\"pub-in\""));
        assert!(json.contains("\"req_id\":\"req-9\""));

        let back: EventMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "pub-in");
        assert_eq!(back.data, "sess-1");
    }

    #[test]
    fn test_event_elides_empty_fields() {
        let event = EventMessage::new("sub-out", "", "", "");
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"data\""));
        assert!(!json.contains("\"req_id\""));
    }
}
