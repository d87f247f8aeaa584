//! Slot, ring buffer, track and source: the per-stream data plane.

mod ring;
mod slot;
mod track;

pub use ring::{
    RingBuffer, RING_BACK, RING_CAP_SLOTS, RING_FORE, RING_GAP_SLOTS, RING_LEN_SLOTS,
    RING_MAX_SLOTS, RING_MIN_SLOTS,
};
pub use slot::{FrameKind, Slot};
pub use track::{Source, Track, TrackMode, TrackStyle};
