//! The streaming loops
//!
//! One receive loop per publisher writes decoded frames into a ring; one
//! send loop per subscriber follows the ring with a private cursor. Both
//! run `while session.using() && channel.using()`, sleep by the session's
//! time unit when there is nothing to do, and bound every transport
//! operation by the session deadline. On exit a loop closes its session so
//! any companion loop (bundle mode) winds down on its next iteration.

use std::sync::Arc;

use tokio::time::Instant;

use crate::error::Result;
use crate::media::{RingBuffer, Slot, Track};
use crate::protocol::{is_ext_message, ExtMessage, Frame, Mark};
use crate::registry::{Channel, Session};
use crate::transport::{FrameSink, FrameSource, SharedSink};

/// Sleep one time unit; the `zero` unit still yields so other sessions
/// on the same worker keep running.
async fn idle_tick(unit: std::time::Duration) {
    if unit.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(unit).await;
    }
}

/// Send loop: follow a ring with a private cursor and copy new slots to
/// the transport.
///
/// The track MIME, when known, is announced first as a text frame. Slots
/// originating from this session are skipped (self-echo suppression).
/// With `fout` the loop returns once no new slot arrives within the
/// session deadline; without it the loop waits for the session or channel
/// to close.
pub async fn pump_ring_to_sink<S: FrameSink>(
    ring: Arc<RingBuffer>,
    session: Arc<Session>,
    channel: Arc<Channel>,
    track: Arc<Track>,
    mut sink: S,
    fout: bool,
) -> Result<()> {
    let result = send_loop(&ring, &session, &channel, &track, &mut sink, fout).await;
    session.close();
    result
}

async fn send_loop<S: FrameSink>(
    ring: &RingBuffer,
    session: &Session,
    channel: &Channel,
    track: &Track,
    sink: &mut S,
    fout: bool,
) -> Result<()> {
    if channel.using() {
        let mime = track.mime();
        if !mime.is_empty() {
            tracing::debug!(session = %session.id(), mime = %mime, "announcing track mime");
            sink.send_frame(&Frame::text(mime), session.time_over()).await?;
        }
    }

    let mut last = ring.pos_write();
    let mut etime = Instant::now() + session.time_over();

    while session.using() && channel.using() {
        if last == ring.pos_write() {
            if fout && Instant::now() > etime {
                tracing::debug!(session = %session.id(), "send loop timeout");
                return Ok(());
            }
            idle_tick(session.time_unit()).await;
            continue;
        }
        etime = Instant::now() + session.time_over();

        let slot = ring.read_slot(last);
        if slot.head != session.id() {
            let frame = Frame { mark: slot.mark, data: slot.data.clone() };
            sink.send_frame(&frame, session.time_over()).await?;

            session.metric.add_out(slot.len);
            track.metric.add_out(slot.len);
            channel.metric.add_out(slot.len);
        }

        last = ring.next_read_pos(last);
    }
    Ok(())
}

/// Receive loop: decode frames from the transport into ring slots.
///
/// Text frames either carry an extended message or set the track MIME;
/// every frame, text included, is written into the ring. `locked` must be
/// set when more than one session writes the ring (medusa).
pub async fn pump_source_to_ring<S: FrameSource>(
    ring: Arc<RingBuffer>,
    session: Arc<Session>,
    channel: Arc<Channel>,
    track: Arc<Track>,
    mut source: S,
    locked: bool,
) -> Result<()> {
    let result = recv_loop(&ring, &session, &channel, &track, &mut source, locked).await;
    session.close();
    result
}

async fn recv_loop<S: FrameSource>(
    ring: &RingBuffer,
    session: &Session,
    channel: &Channel,
    track: &Track,
    source: &mut S,
    locked: bool,
) -> Result<()> {
    while session.using() && channel.using() {
        let frame = source.recv_frame(session.time_over()).await?;
        let slot = Slot::from_frame(session.id(), frame.mark, frame.data);

        if slot.mark.is_text() {
            if is_ext_message(&slot.data) {
                match ExtMessage::parse(&slot.data) {
                    Ok(ExtMessage::Mime(mime)) => track.set_mime(mime),
                    Ok(ExtMessage::Card(card)) => track.set_card(session.id(), card),
                    Ok(_) => {} // XCMD/XACK/XERR reserved
                    Err(e) => tracing::warn!(session = %session.id(), error = %e, "extended message"),
                }
            } else if slot.mark == Mark::Rtxt {
                let mime = String::from_utf8_lossy(&slot.data).into_owned();
                tracing::debug!(session = %session.id(), track = %track.label(), mime = %mime, "track mime");
                track.set_mime(mime);
            }
        }

        let len = slot.len;
        ring.write_slot(slot, locked);

        session.metric.add_in(len);
        track.metric.add_in(len);
        channel.metric.add_in(len);
    }
    Ok(())
}

/// Echo loop: read a frame, wait one time unit to simulate the buffering
/// delay, write it back. No ring is involved.
pub async fn pump_echo<R: FrameSource, W: FrameSink>(
    session: Arc<Session>,
    mut source: R,
    mut sink: W,
    deadline: std::time::Duration,
) -> Result<()> {
    let result = async {
        while session.using() {
            let frame = source.recv_frame(deadline).await?;
            session.metric.add_in(frame.data.len());

            idle_tick(session.time_unit()).await;

            sink.send_frame(&frame, deadline).await?;
            session.metric.add_out(frame.data.len());
        }
        Ok(())
    }
    .await;
    session.close();
    result
}

/// Peer-direct copy loop: frames read from this session's socket are
/// written to the partner's sink. No ring is involved.
pub async fn pump_peer<R: FrameSource>(
    session: Arc<Session>,
    mut source: R,
    partner: SharedSink,
) -> Result<()> {
    let result = async {
        while session.using() {
            let frame = source.recv_frame(session.time_over()).await?;
            let mut sink = partner.lock().await;
            sink.send_frame(&frame, session.time_over()).await?;
        }
        Ok(())
    }
    .await;
    session.close();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ChannelStyle, State};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Feeds a scripted frame list, then reports the peer as closed.
    struct ScriptSource(VecDeque<Frame>);

    #[async_trait]
    impl FrameSource for ScriptSource {
        async fn recv_frame(&mut self, _deadline: Duration) -> Result<Frame> {
            self.0.pop_front().ok_or(crate::error::Error::Closed)
        }
    }

    /// Collects sent frames.
    #[derive(Clone, Default)]
    struct CollectSink(Arc<Mutex<Vec<Frame>>>);

    #[async_trait]
    impl FrameSink for CollectSink {
        async fn send_frame(&mut self, frame: &Frame, _deadline: Duration) -> Result<()> {
            self.0.lock().unwrap().push(frame.clone());
            Ok(())
        }
    }

    fn live_parts() -> (Arc<Session>, Arc<Channel>, Arc<Track>) {
        let mut session = Session::new("/pang/ws/pub");
        session.set_timeout(1, "milli");
        let channel = Channel::new("t", ChannelStyle::Instant);
        channel.set_state(State::Using);
        let (_, track) = channel.add_source_track("base", "video");
        (Arc::new(session), Arc::new(channel), track)
    }

    #[tokio::test]
    async fn test_recv_loop_fills_ring_and_counters() {
        let (session, channel, track) = live_parts();
        let ring = Arc::clone(track.fore());

        let frames = VecDeque::from(vec![
            Frame::text("video/jpeg"),
            Frame::binary(Bytes::from_static(&[1u8; 64])),
            Frame::binary(Bytes::from_static(&[2u8; 64])),
        ]);
        let result = pump_source_to_ring(
            Arc::clone(&ring),
            Arc::clone(&session),
            Arc::clone(&channel),
            Arc::clone(&track),
            ScriptSource(frames),
            false,
        )
        .await;

        // loop ends when the scripted source closes
        assert!(matches!(result, Err(crate::error::Error::Closed)));
        assert_eq!(track.mime(), "video/jpeg");
        assert_eq!(ring.pos_write(), 3);
        assert_eq!(session.metric.in_bytes(), 10 + 64 + 64);
        assert_eq!(channel.metric.in_bytes(), 138);
        assert!(!session.using()); // closed on exit
    }

    #[tokio::test]
    async fn test_recv_loop_applies_ext_messages() {
        let (session, channel, track) = live_parts();
        let frames = VecDeque::from(vec![
            Frame::text("REXTMIMEaudio/opus"),
            Frame::text("REXTCARDcamera-7"),
        ]);
        let _ = pump_source_to_ring(
            Arc::clone(track.fore()),
            Arc::clone(&session),
            Arc::clone(&channel),
            Arc::clone(&track),
            ScriptSource(frames),
            false,
        )
        .await;

        assert_eq!(track.mime(), "audio/opus");
        assert_eq!(track.cards().get(session.id()).map(String::as_str), Some("camera-7"));
    }

    #[tokio::test]
    async fn test_send_loop_announces_mime_then_times_out() {
        let (session, channel, track) = live_parts();
        track.set_mime("video/jpeg");
        let sink = CollectSink::default();
        let sent = Arc::clone(&sink.0);

        pump_ring_to_sink(
            Arc::clone(track.fore()),
            Arc::clone(&session),
            Arc::clone(&channel),
            Arc::clone(&track),
            sink,
            true,
        )
        .await
        .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].mark, Mark::Rtxt);
        assert_eq!(&sent[0].data[..], b"video/jpeg");
    }

    #[tokio::test]
    async fn test_send_loop_skips_self_echo() {
        let (session, channel, track) = live_parts();
        let ring = Arc::clone(track.fore());

        // publisher cursor starts at the current write position
        let mut own = Slot::from_frame(session.id(), Mark::Rbin, Bytes::from_static(b"own"));
        own.stamp();
        let other = Slot::from_frame("someone-else", Mark::Rbin, Bytes::from_static(b"other"));

        let sink = CollectSink::default();
        let sent = Arc::clone(&sink.0);

        let pump = tokio::spawn(pump_ring_to_sink(
            Arc::clone(&ring),
            Arc::clone(&session),
            Arc::clone(&channel),
            Arc::clone(&track),
            sink,
            false,
        ));
        // let the pump take its starting cursor before anything is written
        tokio::time::sleep(Duration::from_millis(10)).await;

        ring.write_slot(own, false);
        ring.write_slot(other, false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.close();
        pump.await.unwrap().unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0].data[..], b"other");
    }

    #[tokio::test]
    async fn test_echo_pump() {
        let mut session = Session::new("/pang/ws/eco");
        session.set_timeout(1, "zero");
        let session = Arc::new(session);
        let frames = VecDeque::from(vec![Frame::binary(Bytes::from_static(b"ping-1"))]);
        let sink = CollectSink::default();
        let sent = Arc::clone(&sink.0);

        let result = pump_echo(
            Arc::clone(&session),
            ScriptSource(frames),
            sink,
            Duration::from_secs(3),
        )
        .await;
        assert!(matches!(result, Err(crate::error::Error::Closed)));
        assert_eq!(&sent.lock().unwrap()[0].data[..], b"ping-1");
        assert_eq!(session.metric.in_bytes(), 6);
        assert_eq!(session.metric.out_bytes(), 6);
    }
}
