//! Frame type and the producer/consumer hand-off slot.
//!
//! The acquisition worker writes into a [`FrameSlot`] as fast as frames
//! arrive; the publishing worker drains it at its own rate. The slot
//! retains only the single latest frame: a fast producer silently
//! overwrites anything the consumer has not picked up yet, so no queue can
//! build up between the two workers.

use std::sync::Mutex;

/// One captured image plus the metadata the publish side needs.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Capture time, seconds since the Unix epoch.
    pub captured_epoch_s: f64,
    /// Monotonically increasing per-device counter.
    pub sequence: u64,
}

impl Frame {
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Buffer size implied by the dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * usize::from(self.channels)
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    fresh: bool,
}

/// Mutex-guarded latest-frame cell shared between an acquisition worker
/// and a publishing worker.
///
/// The producer holds the lock only while swapping the frame in and
/// raising the "new data" flag; the consumer holds it only while copying
/// the frame out and clearing the flag. At most one frame is ever
/// pending.
pub struct FrameSlot {
    inner: Mutex<Slot>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Slot::default()),
        }
    }

    /// Replace the slot content with `frame` and mark it fresh. An
    /// unconsumed previous frame is dropped.
    pub fn store(&self, frame: Frame) {
        let mut slot = self.inner.lock().unwrap();
        slot.frame = Some(frame);
        slot.fresh = true;
    }

    /// Copy out the latest frame if it has not been consumed yet, clearing
    /// the fresh flag. Returns `None` when nothing new has arrived since
    /// the last call.
    pub fn take_fresh(&self) -> Option<Frame> {
        let mut slot = self.inner.lock().unwrap();
        if !slot.fresh {
            return None;
        }
        slot.fresh = false;
        slot.frame.clone()
    }

    pub fn has_fresh(&self) -> bool {
        self.inner.lock().unwrap().fresh
    }

    /// Sequence number of whatever frame is in the slot, fresh or not.
    pub fn latest_sequence(&self) -> Option<u64> {
        self.inner.lock().unwrap().frame.as_ref().map(|f| f.sequence)
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> Frame {
        Frame {
            pixels: vec![0u8; 12],
            width: 2,
            height: 2,
            channels: 3,
            captured_epoch_s: 0.0,
            sequence,
        }
    }

    #[test]
    fn consumer_sees_only_the_latest_frame() {
        let slot = FrameSlot::new();
        slot.store(frame(1));
        slot.store(frame(2));

        let taken = slot.take_fresh().expect("fresh frame");
        assert_eq!(taken.sequence, 2);
    }

    #[test]
    fn consume_clears_the_fresh_flag() {
        let slot = FrameSlot::new();
        slot.store(frame(7));

        assert!(slot.has_fresh());
        assert!(slot.take_fresh().is_some());
        assert!(!slot.has_fresh());
        assert!(slot.take_fresh().is_none());
    }

    #[test]
    fn stale_frame_remains_visible_by_sequence() {
        let slot = FrameSlot::new();
        assert_eq!(slot.latest_sequence(), None);

        slot.store(frame(3));
        let _ = slot.take_fresh();

        // Consumed, but still the latest known frame.
        assert_eq!(slot.latest_sequence(), Some(3));
    }

    #[test]
    fn expected_len_matches_dimensions() {
        let f = frame(1);
        assert_eq!(f.expected_len(), 12);
        assert_eq!(f.byte_len(), 12);
    }
}
