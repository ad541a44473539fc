//! Window-based congestion control: slow start, byte-counting congestion
//! avoidance, multiplicative decrease on timeout loss and fast recovery on
//! out-of-order acks.

use crate::constants::{SSTHRESH_INIT, SSTHRESH_MIN};

#[derive(Debug, Clone)]
pub struct Congestion {
    /// Congestion window, in segments.
    cwnd: u32,
    /// Slow-start threshold, in segments.
    ssthresh: u32,
    /// Byte credit used for sub-segment additive increase above `ssthresh`.
    incr: u32,
    /// When set, `window()` reports no limit (flow control only).
    disabled: bool,
}

impl Default for Congestion {
    fn default() -> Self {
        Self {
            cwnd: 1,
            ssthresh: SSTHRESH_INIT,
            incr: 0,
            disabled: false,
        }
    }
}

impl Congestion {
    /// Current congestion window in segments, or `None` when disabled.
    pub fn window(&self) -> Option<u32> {
        if self.disabled {
            None
        } else {
            Some(self.cwnd.max(1))
        }
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Called when the cumulative-ack watermark advanced. `mss` is the
    /// current segment payload capacity, `rmt_wnd` the peer's advertised
    /// window, which caps growth.
    pub fn on_advance(&mut self, mss: u32, rmt_wnd: u32) {
        if self.cwnd >= rmt_wnd {
            return;
        }
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr += mss;
        } else {
            self.incr = self.incr.max(mss);
            self.incr += (mss * mss) / self.incr + (mss / 16);
            if (self.cwnd + 1) * mss <= self.incr {
                self.cwnd = if mss > 0 {
                    (self.incr + mss - 1) / mss
                } else {
                    self.cwnd + 1
                };
            }
        }
        if self.cwnd > rmt_wnd {
            self.cwnd = rmt_wnd;
            self.incr = rmt_wnd * mss;
        }
    }

    /// Timeout loss: collapse to one segment and halve the threshold.
    pub fn on_loss(&mut self, mss: u32) {
        self.ssthresh = (self.cwnd / 2).max(SSTHRESH_MIN);
        self.cwnd = 1;
        self.incr = mss;
    }

    /// Fast retransmission triggered: enter fast recovery sized to half the
    /// data currently in flight.
    pub fn on_fast_resend(&mut self, inflight: u32, resend_threshold: u32, mss: u32) {
        self.ssthresh = (inflight / 2).max(SSTHRESH_MIN);
        self.cwnd = self.ssthresh + resend_threshold;
        self.incr = self.cwnd * mss;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u32 = 1376;

    #[test]
    fn slow_start_grows_one_segment_per_ack() {
        let mut cc = Congestion::default();
        assert_eq!(cc.window(), Some(1));
        cc.on_advance(MSS, 128);
        assert_eq!(cc.window(), Some(2));
    }

    #[test]
    fn growth_is_capped_by_remote_window() {
        let mut cc = Congestion::default();
        for _ in 0..100 {
            cc.on_advance(MSS, 4);
        }
        assert_eq!(cc.window(), Some(4));
    }

    #[test]
    fn congestion_avoidance_grows_slower_than_slow_start() {
        let mut cc = Congestion::default();
        // past ssthresh (2) growth needs roughly a window of acks per +1
        for _ in 0..10 {
            cc.on_advance(MSS, 1024);
        }
        let w = cc.window().unwrap();
        assert!(w > 2 && w < 12, "window was {w}");
    }

    #[test]
    fn loss_collapses_window() {
        let mut cc = Congestion::default();
        for _ in 0..20 {
            cc.on_advance(MSS, 1024);
        }
        let before = cc.window().unwrap();
        cc.on_loss(MSS);
        assert_eq!(cc.window(), Some(1));
        // threshold remembers half the lost window
        cc.on_advance(MSS, 1024);
        assert_eq!(cc.window(), Some(2));
        assert!(before > 1);
    }

    #[test]
    fn fast_resend_enters_fast_recovery() {
        let mut cc = Congestion::default();
        cc.on_fast_resend(16, 2, MSS);
        assert_eq!(cc.window(), Some(10));
    }

    #[test]
    fn disabled_reports_no_limit() {
        let mut cc = Congestion::default();
        cc.set_disabled(true);
        assert_eq!(cc.window(), None);
    }
}
