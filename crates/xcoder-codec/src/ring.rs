//! The bitstream ring (C6): a fixed-capacity mapping from write index to
//! `(pts, flags, cumulative byte-offset interval, optional custom-SEI
//! payload)`, used to recover a decoded frame's PTS from the accelerator-
//! reported `frame_offset` of the packet it came from (§4.6, §4.5.1 step 8).

use std::collections::VecDeque;

/// Ring capacity. Must be a power of two (§4.6).
pub const CAPACITY: usize = 1024;

const _: () = assert!(CAPACITY.is_power_of_two());

/// One entry recorded for a written packet.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    pts: i64,
    flags: u32,
    min_offset: u32,
    offset: u32,
    custom_sei: Option<Vec<u8>>,
}

/// The fixed-capacity bitstream ring.
///
/// Internally this stores the last [`CAPACITY`] inserted packets in a
/// `VecDeque`, evicting the oldest on overwrite — which is also where a
/// displaced entry's owned custom-SEI buffer is freed (§3 invariants: "the
/// ring itself is responsible for freeing the overwritten slot").
#[derive(Debug, Default)]
pub struct BitstreamRing {
    slots: VecDeque<Slot>,
    cumulative_offset: u32,
}

/// A hit returned by [`BitstreamRing::find_by_frame_offset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingHit {
    /// PTS recorded for the packet whose interval contains the queried
    /// offset.
    pub pts: i64,
    /// Flags recorded alongside that packet.
    pub flags: u32,
    /// The packet's owned custom-SEI payload, taken out of the ring
    /// (ownership transfers to the caller, §4.5.1 step 8).
    pub custom_sei: Option<Vec<u8>>,
}

impl BitstreamRing {
    /// Construct an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: VecDeque::with_capacity(CAPACITY), cumulative_offset: 0 }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the ring currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Record a written packet, advancing the cumulative byte offset by
    /// `packet_len` with explicit 32-bit wrap (§4.6, property 4).
    ///
    /// Returns the cumulative offset after this packet (the new `offset[i]`).
    pub fn insert(&mut self, pts: i64, flags: u32, packet_len: u32, custom_sei: Option<Vec<u8>>) -> u32 {
        let min_offset = self.cumulative_offset;
        let offset = min_offset.wrapping_add(packet_len);
        self.cumulative_offset = offset;

        if self.slots.len() == CAPACITY {
            self.slots.pop_front();
        }
        self.slots.push_back(Slot { pts, flags, min_offset, offset, custom_sei });
        offset
    }

    /// Binary-search the ring for the entry whose `[min_offset, offset)`
    /// interval contains `frame_offset`.
    ///
    /// The ring is conceptually a rotated sorted array (physically a
    /// circular buffer; logically increasing from oldest to newest). We
    /// un-rotate it implicitly by comparing every offset relative to the
    /// oldest entry's `min_offset`, which collapses the 32-bit wrap into a
    /// plain signed comparison for any window narrower than 2^31 bytes —
    /// true for any realistic ring of `CAPACITY` packets.
    ///
    /// Returns `None` if `frame_offset` falls outside every interval
    /// currently held.
    #[must_use]
    pub fn find_by_frame_offset(&self, frame_offset: u32) -> Option<RingHit> {
        if self.slots.is_empty() {
            return None;
        }
        let anchor = self.slots[0].min_offset;
        let rel = |x: u32| -> i64 { i64::from(x.wrapping_sub(anchor) as i32) };
        let target = rel(frame_offset);

        let mut lo = 0i64;
        let mut hi = self.slots.len() as i64 - 1;
        while lo <= hi {
            let mid = (lo + hi) / 2;
            let slot = &self.slots[mid as usize];
            let min_rel = rel(slot.min_offset);
            let max_rel = rel(slot.offset);

            if target >= min_rel && target < max_rel {
                return Some(RingHit { pts: slot.pts, flags: slot.flags, custom_sei: slot.custom_sei.clone() });
            }
            if target < min_rel {
                hi = mid - 1;
            } else {
                lo = mid + 1;
            }
        }
        None
    }

    /// Take ownership of the custom-SEI payload belonging to the entry
    /// whose interval contains `frame_offset`, removing it from the ring
    /// entry in place (§4.5.1 step 8: "transfer the custom-SEI ownership
    /// out of the ring").
    pub fn take_custom_sei(&mut self, frame_offset: u32) -> Option<Vec<u8>> {
        if self.slots.is_empty() {
            return None;
        }
        let anchor = self.slots[0].min_offset;
        let rel = |x: u32| -> i64 { i64::from(x.wrapping_sub(anchor) as i32) };
        let target = rel(frame_offset);

        self.slots
            .iter_mut()
            .find(|slot| {
                let min_rel = rel(slot.min_offset);
                let max_rel = rel(slot.offset);
                target >= min_rel && target < max_rel
            })
            .and_then(|slot| slot.custom_sei.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_the_interval_containing_an_offset() {
        let mut ring = BitstreamRing::new();
        ring.insert(100, 0, 1000, None);
        ring.insert(200, 0, 2000, None);
        ring.insert(300, 0, 1500, None);

        let hit = ring.find_by_frame_offset(1500).unwrap();
        assert_eq!(hit.pts, 200);

        let hit = ring.find_by_frame_offset(500).unwrap();
        assert_eq!(hit.pts, 100);

        assert!(ring.find_by_frame_offset(10_000).is_none());
    }

    #[test]
    fn offsets_track_cumulative_packet_length() {
        let mut ring = BitstreamRing::new();
        let o1 = ring.insert(1, 0, 100, None);
        let o2 = ring.insert(2, 0, 200, None);
        assert_eq!(o1, 100);
        assert_eq!(o2.wrapping_sub(o1), 200);
    }

    #[test]
    fn overwriting_a_slot_frees_its_custom_sei() {
        let mut ring = BitstreamRing::new();
        for i in 0..CAPACITY {
            ring.insert(i as i64, 0, 10, Some(vec![0xAA; 4]));
        }
        assert_eq!(ring.len(), CAPACITY);
        // This insert evicts the oldest slot; its custom SEI buffer drops
        // with it rather than accumulating unboundedly.
        ring.insert(CAPACITY as i64, 0, 10, None);
        assert_eq!(ring.len(), CAPACITY);
    }

    #[test]
    fn take_custom_sei_transfers_ownership_once() {
        let mut ring = BitstreamRing::new();
        ring.insert(1, 0, 100, Some(vec![1, 2, 3]));
        let taken = ring.take_custom_sei(50);
        assert_eq!(taken, Some(vec![1, 2, 3]));
        assert_eq!(ring.take_custom_sei(50), None);
    }

    #[test]
    fn wraps_cumulative_offset_at_2_32() {
        let mut ring = BitstreamRing::new();
        ring.insert(1, 0, u32::MAX - 10, None);
        let wrapped = ring.insert(2, 0, 20, None);
        // The new cumulative offset wrapped past 2^32.
        assert!(wrapped < 20);
        let hit = ring.find_by_frame_offset(wrapped.wrapping_sub(1));
        assert_eq!(hit.unwrap().pts, 2);
    }
}
