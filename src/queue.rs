//! Sequence-ordered segment buffer backing the send window and the
//! out-of-order receive window.
//!
//! Segments are kept sorted by wrap-safe sequence number. Insertions come in
//! mostly ordered, so the ordered insert scans from the back.

use std::collections::VecDeque;

use crate::segment::{seq_diff, Segment};

#[derive(Debug, Default)]
pub struct SegmentBuf {
    segs: VecDeque<Segment>,
}

impl SegmentBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.segs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segs.is_empty()
    }

    /// Appends a segment whose sequence number is known to be the highest so
    /// far (send-window promotion assigns sequence numbers monotonically).
    pub fn push_back(&mut self, seg: Segment) {
        debug_assert!(self
            .segs
            .back()
            .map_or(true, |last| seq_diff(seg.sn, last.sn) > 0));
        self.segs.push_back(seg);
    }

    /// Ordered insert. Returns `false` without inserting when a segment with
    /// the same sequence number is already present.
    pub fn insert(&mut self, seg: Segment) -> bool {
        let mut idx = self.segs.len();
        for (i, existing) in self.segs.iter().enumerate().rev() {
            let d = seq_diff(seg.sn, existing.sn);
            if d == 0 {
                return false;
            }
            if d > 0 {
                break;
            }
            idx = i;
        }
        self.segs.insert(idx, seg);
        true
    }

    pub fn front(&self) -> Option<&Segment> {
        self.segs.front()
    }

    pub fn pop_front(&mut self) -> Option<Segment> {
        self.segs.pop_front()
    }

    /// Removes the segment with exactly this sequence number, if present.
    /// The buffer is ordered, so the scan stops early once past `sn`.
    pub fn remove(&mut self, sn: u32) -> Option<Segment> {
        for (i, seg) in self.segs.iter().enumerate() {
            let d = seq_diff(sn, seg.sn);
            if d == 0 {
                return self.segs.remove(i);
            }
            if d < 0 {
                break;
            }
        }
        None
    }

    /// Drops every segment with `sn < watermark`, returning how many were
    /// removed. Used for cumulative acknowledgment.
    pub fn drop_before(&mut self, watermark: u32) -> usize {
        let mut dropped = 0;
        while let Some(front) = self.segs.front() {
            if seq_diff(front.sn, watermark) >= 0 {
                break;
            }
            self.segs.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Lowest sequence number currently held.
    pub fn first_sn(&self) -> Option<u32> {
        self.segs.front().map(|s| s.sn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.segs.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Command;

    fn seg(sn: u32) -> Segment {
        let mut s = Segment::new(1, Command::Data);
        s.sn = sn;
        s
    }

    fn sns(buf: &SegmentBuf) -> Vec<u32> {
        buf.iter().map(|s| s.sn).collect()
    }

    #[test]
    fn insert_keeps_sequence_order() {
        let mut buf = SegmentBuf::new();
        for sn in [5, 2, 9, 3] {
            assert!(buf.insert(seg(sn)));
        }
        assert_eq!(sns(&buf), vec![2, 3, 5, 9]);
    }

    #[test]
    fn insert_drops_duplicates() {
        let mut buf = SegmentBuf::new();
        assert!(buf.insert(seg(7)));
        assert!(!buf.insert(seg(7)));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn remove_only_matches_exact_sn() {
        let mut buf = SegmentBuf::new();
        buf.insert(seg(1));
        buf.insert(seg(3));
        assert!(buf.remove(2).is_none());
        assert_eq!(buf.remove(3).map(|s| s.sn), Some(3));
        assert_eq!(sns(&buf), vec![1]);
    }

    #[test]
    fn drop_before_removes_acked_prefix() {
        let mut buf = SegmentBuf::new();
        for sn in 0..5 {
            buf.push_back(seg(sn));
        }
        assert_eq!(buf.drop_before(3), 3);
        assert_eq!(sns(&buf), vec![3, 4]);
        // idempotent
        assert_eq!(buf.drop_before(3), 0);
    }

    #[test]
    fn ordering_is_wrap_safe() {
        let mut buf = SegmentBuf::new();
        buf.insert(seg(u32::MAX - 1));
        buf.insert(seg(1));
        buf.insert(seg(u32::MAX));
        assert_eq!(sns(&buf), vec![u32::MAX - 1, u32::MAX, 1]);
        assert_eq!(buf.drop_before(0), 2);
        assert_eq!(sns(&buf), vec![1]);
    }
}
