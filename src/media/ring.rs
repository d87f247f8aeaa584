//! Fixed-capacity circular slot buffer
//!
//! One writer (or serialized writers for medusa rings) appends slots; any
//! number of readers follow with private cursors. The ring is lossy by
//! design: a reader that falls more than `gap` slots behind the writer
//! jumps forward to the write position, trading completeness for
//! freshness. Appropriate for live media and telemetry, not for reliable
//! byte streams.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::id::new_id;
use crate::media::slot::Slot;

/// Minimum number of slots in a ring
pub const RING_MIN_SLOTS: usize = 2;
/// Maximum number of slots in a ring
pub const RING_MAX_SLOTS: usize = 30;
/// Default active length
pub const RING_LEN_SLOTS: usize = 20;
/// Default allocated capacity (30 fps, one second)
pub const RING_CAP_SLOTS: usize = 30;
/// Default lossy gap between a reader and the writer
pub const RING_GAP_SLOTS: usize = 2;

/// Forward ring index within a track
pub const RING_FORE: usize = 0;
/// Backward ring index within a track
pub const RING_BACK: usize = 1;

/// A circular buffer of framed slots with single-writer, multi-reader
/// fan-out semantics.
pub struct RingBuffer {
    id: String,
    label: String,
    cap: usize,
    len: AtomicUsize,
    gap: AtomicUsize,
    pos_read: AtomicUsize,
    pos_write: AtomicUsize,
    slots: RwLock<Vec<Slot>>,
    // serializes writers when a ring has more than one (medusa)
    write_gate: Mutex<()>,
}

impl RingBuffer {
    /// Create a ring with `cap` allocated slots and `len` active slots.
    ///
    /// Both are clamped to the 2..=30 ring bounds; `len` never exceeds
    /// `cap`.
    pub fn new(label: impl Into<String>, cap: usize, len: usize) -> Self {
        let cap = cap.clamp(RING_MIN_SLOTS, RING_MAX_SLOTS);
        let len = len.clamp(RING_MIN_SLOTS, cap);
        Self {
            id: new_id(),
            label: label.into(),
            cap,
            len: AtomicUsize::new(len),
            gap: AtomicUsize::new(RING_GAP_SLOTS),
            pos_read: AtomicUsize::new(0),
            pos_write: AtomicUsize::new(0),
            slots: RwLock::new(vec![Slot::default(); cap]),
            write_gate: Mutex::new(()),
        }
    }

    /// Ring id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ring label (`fore`, `back`).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Allocated capacity.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Active length.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Current write cursor.
    pub fn pos_write(&self) -> usize {
        self.pos_write.load(Ordering::Acquire)
    }

    /// Position of the most recent write, kept as a hint for readers.
    pub fn pos_read(&self) -> usize {
        self.pos_read.load(Ordering::Acquire)
    }

    /// Set the active length. Permitted only while the ring is not in
    /// active use; values outside 2..=cap are ignored.
    pub fn set_len(&self, n: usize) {
        if (RING_MIN_SLOTS..=self.cap).contains(&n) {
            self.len.store(n, Ordering::Relaxed);
        }
    }

    /// Set the lossy gap; clamped to 1..len.
    pub fn set_gap(&self, n: usize) {
        let len = self.len();
        self.gap.store(n.clamp(1, len.saturating_sub(1).max(1)), Ordering::Relaxed);
    }

    /// Current lossy gap.
    pub fn gap(&self) -> usize {
        self.gap.load(Ordering::Relaxed)
    }

    /// Append a slot at the write position and advance the cursor.
    ///
    /// With `locked` (medusa rings, multiple publishers) the ring's writer
    /// gate serializes the whole append; otherwise the caller guarantees a
    /// single writer.
    pub fn write_slot(&self, slot: Slot, locked: bool) {
        let _gate = if locked { Some(self.write_gate.lock()) } else { None };

        let len = self.len();
        let pos = self.pos_write.load(Ordering::Acquire) % len;
        {
            let mut slots = self.slots.write();
            slots[pos] = slot;
        }
        self.pos_read.store(pos, Ordering::Release);
        self.pos_write.store((pos + 1) % len, Ordering::Release);
    }

    /// Snapshot the slot at `pos`.
    pub fn read_slot(&self, pos: usize) -> Slot {
        let slots = self.slots.read();
        slots[pos % self.cap].clone()
    }

    /// Advance a reader cursor under the lossy policy: if the writer's
    /// lead over `last` exceeds the gap, jump to the write position and
    /// drop the intermediate slots; otherwise step by one.
    pub fn next_read_pos(&self, last: usize) -> usize {
        let wpos = self.pos_write();
        if wpos.abs_diff(last) > self.gap() {
            wpos
        } else {
            (last + 1) % self.len()
        }
    }
}

impl std::fmt::Display for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} num: {}/{}, pos: {},{}",
            self.label,
            self.len(),
            self.cap,
            self.pos_read(),
            self.pos_write()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn slot(head: &str, byte: u8) -> Slot {
        let mut s = Slot::new(head);
        s.data = Bytes::copy_from_slice(&[byte]);
        s.stamp();
        s
    }

    #[test]
    fn test_write_advances_cursors() {
        let ring = RingBuffer::new("fore", 30, 20);
        assert_eq!(ring.pos_write(), 0);

        ring.write_slot(slot("a", 1), false);
        assert_eq!(ring.pos_read(), 0);
        assert_eq!(ring.pos_write(), 1);

        ring.write_slot(slot("a", 2), false);
        assert_eq!(ring.pos_read(), 1);
        assert_eq!(ring.pos_write(), 2);
    }

    #[test]
    fn test_write_wraps_at_len() {
        let ring = RingBuffer::new("fore", 30, 3);
        for i in 0..3 {
            ring.write_slot(slot("a", i), false);
        }
        assert_eq!(ring.pos_write(), 0);
        ring.write_slot(slot("a", 9), false);
        assert_eq!(ring.read_slot(0).data[0], 9);
    }

    #[test]
    fn test_reader_steps_within_gap() {
        let ring = RingBuffer::new("fore", 30, 20);
        ring.write_slot(slot("a", 1), false);
        ring.write_slot(slot("a", 2), false);
        // reader at 0, writer at 2: lead == gap, no jump
        assert_eq!(ring.next_read_pos(0), 1);
    }

    #[test]
    fn test_reader_jumps_past_gap() {
        let ring = RingBuffer::new("fore", 30, 20);
        for i in 0..5 {
            ring.write_slot(slot("a", i), false);
        }
        // reader at 0, writer at 5: lead 5 > gap 2, jump to writer
        assert_eq!(ring.next_read_pos(0), 5);
    }

    #[test]
    fn test_gap_is_configurable() {
        let ring = RingBuffer::new("fore", 30, 20);
        ring.set_gap(4);
        for i in 0..5 {
            ring.write_slot(slot("a", i), false);
        }
        // lead 5 > gap 4: still jumps
        assert_eq!(ring.next_read_pos(0), 5);
        ring.set_gap(6);
        assert_eq!(ring.next_read_pos(0), 1);
    }

    #[test]
    fn test_len_bounds() {
        let ring = RingBuffer::new("fore", 30, 20);
        ring.set_len(1); // below minimum, ignored
        assert_eq!(ring.len(), 20);
        ring.set_len(31); // above capacity, ignored
        assert_eq!(ring.len(), 20);
        ring.set_len(2);
        assert_eq!(ring.len(), 2);
        ring.set_len(30);
        assert_eq!(ring.len(), 30);
    }

    #[test]
    fn test_cap_clamped() {
        let ring = RingBuffer::new("fore", 100, 50);
        assert_eq!(ring.cap(), 30);
        assert_eq!(ring.len(), 30);
        let ring = RingBuffer::new("fore", 0, 0);
        assert_eq!(ring.cap(), 2);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_locked_writes_interleave() {
        use std::sync::Arc;
        let ring = Arc::new(RingBuffer::new("fore", 30, 20));
        let mut handles = Vec::new();
        for t in 0..4u8 {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                for i in 0..50u8 {
                    ring.write_slot(slot(&format!("w{t}"), i), true);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        // 200 locked writes, cursor position must be consistent
        assert_eq!(ring.pos_write(), 200 % 20);
    }
}
