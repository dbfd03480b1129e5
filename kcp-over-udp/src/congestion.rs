//! Congestion window governor.
//!
//! [`Congestion`] owns `cwnd`, `ssthresh` and `incr` (the byte-granular
//! accumulator behind additive increase).  It reacts to three events:
//!
//! | Event                         | Reaction                                   |
//! |-------------------------------|--------------------------------------------|
//! | cumulative ack advanced       | slow start below `ssthresh`, else AIMD     |
//! | fast retransmit this flush    | `ssthresh = inflight/2`, `cwnd = ssthresh + resend` |
//! | timeout retransmit this flush | `ssthresh = window/2`, `cwnd = 1`          |
//!
//! After every reaction `cwnd` is clamped to `[1, limit]` where `limit` is
//! `min(snd_wnd, rmt_wnd)`.

/// Initial slow-start threshold.
pub const THRESH_INIT: u32 = 2;
/// Lower bound for `ssthresh` after a reduction.
pub const THRESH_MIN: u32 = 2;

#[derive(Debug, Clone)]
pub struct Congestion {
    cwnd: u32,
    ssthresh: u32,
    incr: u32,
}

impl Congestion {
    pub fn new(mss: u32) -> Self {
        Self {
            cwnd: 1,
            ssthresh: THRESH_INIT,
            incr: mss,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn incr(&self) -> u32 {
        self.incr
    }

    /// Number of segments that may be in flight.
    ///
    /// `limit` is `min(snd_wnd, rmt_wnd)`; with `enabled == false` the
    /// congestion window is ignored and only the flow-control limit applies.
    pub fn effective_window(&self, limit: u32, enabled: bool) -> u32 {
        if enabled {
            self.cwnd.min(limit)
        } else {
            limit
        }
    }

    /// Window growth after `snd_una` advanced.
    pub fn on_ack_advance(&mut self, mss: u32, limit: u32) {
        if self.cwnd < limit {
            if self.cwnd < self.ssthresh {
                self.cwnd += 1;
                self.incr = self.incr.saturating_add(mss);
            } else {
                if self.incr < mss {
                    self.incr = mss;
                }
                let step = (u64::from(mss) * u64::from(mss) / u64::from(self.incr.max(1))) as u32;
                self.incr = self.incr.saturating_add(step + mss / 16);
                if u64::from(self.cwnd + 1) * u64::from(mss) <= u64::from(self.incr) {
                    self.cwnd = (self.incr + mss - 1) / mss.max(1);
                }
            }
        }
        self.clamp(mss, limit);
    }

    /// Fast recovery after at least one fast retransmit.
    ///
    /// `inflight` is `snd_nxt - snd_una`, `resend` the fast-ack threshold.
    pub fn on_fast_retransmit(&mut self, inflight: u32, resend: u32, mss: u32, limit: u32) {
        self.ssthresh = (inflight / 2).max(THRESH_MIN);
        self.cwnd = self.ssthresh.saturating_add(resend);
        self.incr = self.cwnd.saturating_mul(mss);
        self.clamp(mss, limit);
    }

    /// Collapse after at least one timeout retransmit.
    ///
    /// `window` is the effective window that was in force for the flush.
    pub fn on_timeout(&mut self, window: u32, mss: u32, limit: u32) {
        self.ssthresh = (window / 2).max(THRESH_MIN);
        self.cwnd = 1;
        self.incr = mss;
        self.clamp(mss, limit);
    }

    /// Keep `cwnd` within `[1, limit]`.
    pub fn clamp(&mut self, mss: u32, limit: u32) {
        if self.cwnd > limit {
            self.cwnd = limit;
            self.incr = limit.saturating_mul(mss);
        }
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = mss;
        }
    }
}
