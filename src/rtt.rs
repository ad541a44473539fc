//! Adaptive retransmission timeout from smoothed RTT samples
//! (Jacobson/Karels estimator, millisecond granularity).

use crate::constants::{RTO_DEFAULT, RTO_MAX, RTO_MIN};

#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed round-trip time, ms. 0 until the first sample.
    srtt: u32,
    /// Mean deviation of the RTT, ms.
    rttvar: u32,
    /// Current retransmission timeout, ms.
    rto: u32,
    /// Lower clamp for the RTO; tunable per session.
    min_rto: u32,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self {
            srtt: 0,
            rttvar: 0,
            rto: RTO_DEFAULT,
            min_rto: RTO_MIN,
        }
    }
}

impl RttEstimator {
    /// Feeds one RTT sample (ms) and recomputes the RTO.
    pub fn sample(&mut self, rtt: u32) {
        if self.srtt == 0 {
            self.srtt = rtt;
            self.rttvar = rtt / 2;
        } else {
            let delta = rtt.abs_diff(self.srtt);
            self.rttvar = (3 * self.rttvar + delta) / 4;
            self.srtt = ((7 * self.srtt + rtt) / 8).max(1);
        }
        let rto = self.srtt + self.min_rto.max(4 * self.rttvar);
        self.rto = rto.clamp(self.min_rto, RTO_MAX);
    }

    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    pub fn min_rto(&self) -> u32 {
        self.min_rto
    }

    /// Adjusts the RTO floor. The current RTO is re-clamped so a lowered
    /// floor takes effect before the next sample.
    pub fn set_min_rto(&mut self, min_rto: u32) {
        self.min_rto = min_rto;
        self.rto = self.rto.clamp(min_rto, RTO_MAX);
    }
}
