//! DTS FIFO and PTS recovery (C7): decode timestamps are supplied in
//! presentation order by the caller but must be handed back in decode
//! order, delayed by the stream's reorder depth; presentation timestamps
//! are recovered separately by matching a decoded frame's `frame_offset`
//! against the [`crate::ring::BitstreamRing`] (§3, §4.6).

use std::collections::VecDeque;

/// A bounded, ordered queue of decode timestamps awaiting emission.
///
/// Frames are pushed in submission order (which is presentation order for
/// the caller) and popped only once at least `reorder_delay` entries sit
/// ahead of them, padding the output with the oldest available entry when
/// the stream hasn't reordered as deeply as configured (§4.5.1 step 9,
/// "reorder-delay padding").
#[derive(Debug)]
pub struct DtsFifo {
    queue: VecDeque<i64>,
    reorder_delay: usize,
    capacity: usize,
}

impl DtsFifo {
    /// Construct a FIFO with the given reorder delay (number of frames of
    /// look-ahead before the oldest entry may be emitted) and maximum
    /// capacity.
    #[must_use]
    pub fn new(reorder_delay: usize, capacity: usize) -> Self {
        Self { queue: VecDeque::with_capacity(capacity), reorder_delay, capacity }
    }

    /// Push a new timestamp. Returns `false` (and drops nothing) if the
    /// FIFO is already at capacity — callers must drain before pushing
    /// further, matching the bounded-queue invariant (§3).
    #[must_use]
    pub fn push(&mut self, dts: i64) -> bool {
        if self.queue.len() >= self.capacity {
            return false;
        }
        self.queue.push_back(dts);
        true
    }

    /// Number of entries currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the FIFO holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pop the oldest entry if the queue has accumulated at least
    /// `threshold` entries beyond it, or if `pop_if_within` frames of the
    /// stream's end remain (reorder-delay padding at drain time).
    ///
    /// `threshold` is normally the configured reorder delay; callers pass
    /// a smaller value (down to zero) once draining so the tail of the
    /// stream still empties in order (§4.5.1 step 9).
    pub fn get_with_threshold(&mut self, threshold: usize, pop_if_within: Option<usize>) -> Option<i64> {
        let have_enough_lookahead = self.queue.len() > threshold;
        let draining_within_tail = pop_if_within.is_some_and(|remaining| remaining <= self.reorder_delay);
        if have_enough_lookahead || draining_within_tail {
            self.queue.pop_front()
        } else {
            None
        }
    }

    /// Pop every remaining entry in order, used once the caller knows no
    /// further frames will arrive (end of stream / drain).
    pub fn drain_all(&mut self) -> Vec<i64> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_back_until_reorder_delay_satisfied() {
        let mut fifo = DtsFifo::new(2, 16);
        fifo.push(0);
        fifo.push(1);
        assert_eq!(fifo.get_with_threshold(2, None), None);
        fifo.push(2);
        assert_eq!(fifo.get_with_threshold(2, None), Some(0));
    }

    #[test]
    fn pads_out_the_tail_of_the_stream() {
        let mut fifo = DtsFifo::new(2, 16);
        fifo.push(10);
        fifo.push(11);
        // Not enough look-ahead yet, but we're at the very end of the
        // stream: pop_if_within advertises zero frames remaining.
        assert_eq!(fifo.get_with_threshold(2, Some(0)), Some(10));
        assert_eq!(fifo.get_with_threshold(2, Some(0)), Some(11));
        assert_eq!(fifo.get_with_threshold(2, Some(0)), None);
    }

    #[test]
    fn push_rejects_once_at_capacity() {
        let mut fifo = DtsFifo::new(0, 2);
        assert!(fifo.push(1));
        assert!(fifo.push(2));
        assert!(!fifo.push(3));
        assert_eq!(fifo.len(), 2);
    }

    #[test]
    fn emission_order_matches_push_order() {
        let mut fifo = DtsFifo::new(1, 8);
        for dts in [5, 3, 9, 1] {
            fifo.push(dts);
        }
        let mut out = Vec::new();
        while let Some(dts) = fifo.get_with_threshold(1, None) {
            out.push(dts);
        }
        out.extend(fifo.drain_all());
        assert_eq!(out, vec![5, 3, 9, 1]);
    }
}
