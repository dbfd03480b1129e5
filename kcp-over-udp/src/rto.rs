//! Round-trip time estimation and retransmission timeout.
//!
//! Every ACK whose echoed timestamp is not in the future yields one RTT
//! sample.  The estimator follows Jacobson's algorithm with integer
//! millisecond arithmetic:
//!
//! On the first sample:  SRTT = R,  RTTVAL = R/2.
//! Subsequent samples:   RTTVAL = (3·RTTVAL + |R − SRTT|) / 4
//!                       SRTT   = (7·SRTT + R) / 8   (never below 1)
//!
//! and then `RTO = clamp(SRTT + max(interval, 4·RTTVAL), minrto, RTO_MAX)`.

/// Minimum RTO when nodelay is enabled.
pub const RTO_NDL: u32 = 30;
/// Minimum RTO in normal mode.
pub const RTO_MIN: u32 = 100;
/// RTO before any sample is available.
pub const RTO_DEF: u32 = 200;
/// Upper bound for the RTO.
pub const RTO_MAX: u32 = 60_000;

/// Smoothed RTT / RTO state for one control block.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    srtt: u32,
    rttval: u32,
    rto: u32,
    minrto: u32,
}

impl Default for RtoEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RtoEstimator {
    pub fn new() -> Self {
        Self {
            srtt: 0,
            rttval: 0,
            rto: RTO_DEF,
            minrto: RTO_MIN,
        }
    }

    /// Record an RTT sample of `rtt` milliseconds.
    ///
    /// `interval` is the flush interval; the RTO never drops below one tick
    /// plus the smoothed RTT.
    pub fn sample(&mut self, rtt: u32, interval: u32) {
        if self.srtt == 0 {
            self.srtt = rtt;
            self.rttval = rtt / 2;
        } else {
            let delta = rtt.abs_diff(self.srtt);
            self.rttval = ((3 * u64::from(self.rttval) + u64::from(delta)) / 4) as u32;
            self.srtt = ((7 * u64::from(self.srtt) + u64::from(rtt)) / 8) as u32;
            self.srtt = self.srtt.max(1);
        }

        let rto = self
            .srtt
            .saturating_add(interval.max(self.rttval.saturating_mul(4)));
        self.rto = rto.clamp(self.minrto, RTO_MAX);
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    pub fn rttval(&self) -> u32 {
        self.rttval
    }

    pub fn minrto(&self) -> u32 {
        self.minrto
    }

    /// Set the lower RTO bound, clamped to `[1, RTO_MAX]`.
    ///
    /// Takes effect from the next sample.
    pub fn set_minrto(&mut self, minrto: u32) {
        self.minrto = minrto.clamp(1, RTO_MAX);
    }
}
