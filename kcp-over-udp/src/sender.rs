//! Send-side segment pipeline.
//!
//! [`Sender`] owns two containers and moves segments through them by value:
//!
//! ```text
//!   send(bytes)          flush (window permits)          ack / una
//!  ─────────────▶ queue ───────────────────────▶ buf ──────────────▶ dropped
//!                 (unsent, no sn)                (in flight, sn assigned)
//! ```
//!
//! A segment is in exactly one container at a time.  Sequence numbers are
//! assigned when a segment leaves the queue, so `buf` is always sorted by
//! `sn` and its front is the oldest unacknowledged segment.
//!
//! This module only manages state; serialisation and the output sink are
//! the caller's responsibility.

use std::collections::VecDeque;

use crate::kcp::KcpError;
use crate::segment::{Command, Segment};
use crate::seq::{seq_lt, time_diff};

/// Largest fragment count a single message may use outside stream mode.
pub const MAX_FRAGMENTS: usize = 255;

/// Retransmission settings consulted for each in-flight segment.
#[derive(Debug, Clone, Copy)]
pub struct RetransmitPolicy {
    /// Control block RTO at flush time.
    pub rx_rto: u32,
    /// Nodelay level: 0 off, 1 on, 2 aggressive.
    pub nodelay: u32,
    /// Fast-ack count that triggers fast retransmit; 0 disables it.
    pub fast_resend: u32,
    /// Maximum `xmit` for which fast retransmit still applies; 0 is unlimited.
    pub fast_limit: u32,
}

/// Why a segment is transmitted in this flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transmit {
    /// Not due.
    Idle,
    /// First transmission.
    Initial,
    /// Retransmission after `resendts` passed.
    Timeout,
    /// Retransmission because later segments were acknowledged.
    Fast,
}

/// Decide whether `seg` goes out at `now`, updating its timers and counters.
pub fn poll_transmit(seg: &mut Segment, now: u32, policy: &RetransmitPolicy) -> Transmit {
    if seg.xmit == 0 {
        let rtomin = if policy.nodelay == 0 { policy.rx_rto >> 3 } else { 0 };
        seg.xmit += 1;
        seg.rto = policy.rx_rto;
        seg.resendts = now.wrapping_add(seg.rto).wrapping_add(rtomin);
        return Transmit::Initial;
    }

    if time_diff(now, seg.resendts) >= 0 {
        seg.xmit += 1;
        let grow = match policy.nodelay {
            0 => seg.rto.max(policy.rx_rto),
            1 => seg.rto / 2,
            _ => policy.rx_rto / 2,
        };
        seg.rto = seg.rto.saturating_add(grow);
        seg.resendts = now.wrapping_add(seg.rto);
        return Transmit::Timeout;
    }

    if policy.fast_resend > 0
        && seg.fastack >= policy.fast_resend
        && (policy.fast_limit == 0 || seg.xmit <= policy.fast_limit)
    {
        seg.xmit += 1;
        seg.fastack = 0;
        seg.resendts = now.wrapping_add(seg.rto);
        return Transmit::Fast;
    }

    Transmit::Idle
}

/// Send-side state for one control block.
#[derive(Debug)]
pub struct Sender {
    /// Oldest unacknowledged sequence number.
    pub snd_una: u32,
    /// Sequence number for the next segment entering `buf`.
    pub snd_nxt: u32,
    /// Merge small writes into the trailing queued segment.
    pub stream: bool,
    queue: VecDeque<Segment>,
    buf: VecDeque<Segment>,
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

impl Sender {
    pub fn new() -> Self {
        Self {
            snd_una: 0,
            snd_nxt: 0,
            stream: false,
            queue: VecDeque::new(),
            buf: VecDeque::new(),
        }
    }

    /// Split `data` into segments of at most `mss` bytes and queue them.
    ///
    /// Returns the number of bytes consumed.  Fails without queueing
    /// anything when the message needs more than [`MAX_FRAGMENTS`] fragments
    /// (message mode) or at least `rcv_wnd` fragments.  In stream mode the
    /// trailing queued segment is topped up first; if that already consumed
    /// some bytes, a later window failure reports the partial count instead.
    pub fn push(&mut self, conv: u32, data: &[u8], mss: usize, rcv_wnd: u32) -> Result<usize, KcpError> {
        let mut rest = data;
        let mut sent = 0usize;

        if self.stream {
            if let Some(last) = self.queue.back_mut() {
                if last.data.len() < mss {
                    let extend = rest.len().min(mss - last.data.len());
                    last.data.extend_from_slice(&rest[..extend]);
                    last.header.frg = 0;
                    rest = &rest[extend..];
                    sent = extend;
                }
            }
            if rest.is_empty() {
                return Ok(sent);
            }
        }

        let count = if rest.len() <= mss {
            1
        } else {
            rest.len().div_ceil(mss)
        };

        if !self.stream && count > MAX_FRAGMENTS {
            return Err(KcpError::TooManyFragments(count));
        }
        if count >= rcv_wnd as usize {
            if self.stream && sent > 0 {
                return Ok(sent);
            }
            return Err(KcpError::WindowExceeded {
                fragments: count,
                rcv_wnd,
            });
        }

        for i in 0..count {
            let size = rest.len().min(mss);
            let mut seg = Segment::new(conv, Command::Push, rest[..size].to_vec());
            seg.header.frg = if self.stream { 0 } else { (count - i - 1) as u8 };
            self.queue.push_back(seg);
            rest = &rest[size..];
            sent += size;
        }
        Ok(sent)
    }

    /// Move queued segments into the send buffer while fewer than `window`
    /// segments are in flight.  Returns how many were moved.
    pub fn admit(&mut self, window: u32, now: u32, rcv_nxt: u32, wnd: u16, rto: u32) -> usize {
        let mut moved = 0;
        while time_diff(self.snd_nxt, self.snd_una.wrapping_add(window)) < 0 {
            let Some(mut seg) = self.queue.pop_front() else {
                break;
            };
            seg.header.cmd = Command::Push;
            seg.header.wnd = wnd;
            seg.header.ts = now;
            seg.header.sn = self.snd_nxt;
            seg.header.una = rcv_nxt;
            seg.resendts = now;
            seg.rto = rto;
            seg.fastack = 0;
            seg.xmit = 0;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.buf.push_back(seg);
            moved += 1;
        }
        moved
    }

    /// Drop every in-flight segment with `sn < una`.
    pub fn on_una(&mut self, una: u32) {
        while let Some(front) = self.buf.front() {
            if seq_lt(front.header.sn, una) {
                self.buf.pop_front();
            } else {
                break;
            }
        }
        self.shrink();
    }

    /// Drop the in-flight segment acknowledged by `sn`, if any.
    ///
    /// Returns `true` when a segment was removed.
    pub fn on_ack(&mut self, sn: u32) -> bool {
        if !self.in_flight_range(sn) {
            return false;
        }
        let mut removed = false;
        for i in 0..self.buf.len() {
            let seg_sn = self.buf[i].header.sn;
            if seg_sn == sn {
                self.buf.remove(i);
                removed = true;
                break;
            }
            if seq_lt(sn, seg_sn) {
                break;
            }
        }
        self.shrink();
        removed
    }

    /// Count one skip for every in-flight segment older than `max_sn`.
    pub fn on_fastack(&mut self, max_sn: u32) {
        if !self.in_flight_range(max_sn) {
            return;
        }
        for seg in self.buf.iter_mut() {
            if seq_lt(max_sn, seg.header.sn) {
                break;
            }
            if seg.header.sn != max_sn {
                seg.fastack += 1;
            }
        }
    }

    fn in_flight_range(&self, sn: u32) -> bool {
        !seq_lt(sn, self.snd_una) && seq_lt(sn, self.snd_nxt)
    }

    /// Recompute `snd_una` from the send buffer.
    fn shrink(&mut self) {
        self.snd_una = match self.buf.front() {
            Some(seg) => seg.header.sn,
            None => self.snd_nxt,
        };
    }

    /// In-flight segments, oldest first.
    pub fn in_flight(&self) -> impl Iterator<Item = &Segment> {
        self.buf.iter()
    }

    pub fn in_flight_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.buf.iter_mut()
    }

    /// Segments sent but not yet acknowledged (`snd_nxt - snd_una`).
    pub fn inflight(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn buf_len(&self) -> usize {
        self.buf.len()
    }

    /// Segments queued or in flight.
    pub fn waiting(&self) -> usize {
        self.queue.len() + self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: usize = 1376;

    fn sender_with_in_flight(n: usize) -> Sender {
        let mut s = Sender::new();
        for _ in 0..n {
            s.push(1, b"x", MSS, 128).unwrap();
        }
        s.admit(n as u32, 0, 0, 128, 200);
        s
    }

    fn policy() -> RetransmitPolicy {
        RetransmitPolicy {
            rx_rto: 200,
            nodelay: 0,
            fast_resend: 2,
            fast_limit: 5,
        }
    }

    #[test]
    fn push_fragments_message() {
        let mut s = Sender::new();
        let sent = s.push(1, &[7u8; 4096], MSS, 128).unwrap();
        assert_eq!(sent, 4096);
        assert_eq!(s.queue_len(), 3);
        let frgs: Vec<u8> = s.queue.iter().map(|seg| seg.header.frg).collect();
        assert_eq!(frgs, vec![2, 1, 0]);
        let lens: Vec<usize> = s.queue.iter().map(|seg| seg.data.len()).collect();
        assert_eq!(lens, vec![MSS, MSS, 4096 - 2 * MSS]);
    }

    #[test]
    fn push_rejects_too_many_fragments_atomically() {
        let mut s = Sender::new();
        let err = s.push(1, &vec![0u8; 256 * 10], 10, 1024).unwrap_err();
        assert_eq!(err, KcpError::TooManyFragments(256));
        assert_eq!(s.queue_len(), 0);
    }

    #[test]
    fn push_rejects_message_larger_than_receive_window() {
        let mut s = Sender::new();
        let err = s.push(1, &vec![0u8; 40], 10, 4).unwrap_err();
        assert_eq!(
            err,
            KcpError::WindowExceeded {
                fragments: 4,
                rcv_wnd: 4
            }
        );
        assert_eq!(s.queue_len(), 0);
    }

    #[test]
    fn stream_mode_tops_up_last_segment() {
        let mut s = Sender::new();
        s.stream = true;
        s.push(1, b"abc", 8, 128).unwrap();
        s.push(1, b"defghijk", 8, 128).unwrap();
        assert_eq!(s.queue_len(), 2);
        assert_eq!(s.queue[0].data, b"abcdefgh");
        assert_eq!(s.queue[1].data, b"ijk");
        assert!(s.queue.iter().all(|seg| seg.header.frg == 0));
    }

    #[test]
    fn stream_mode_reports_partial_top_up() {
        let mut s = Sender::new();
        s.stream = true;
        s.push(1, b"ab", 4, 3).unwrap();
        // Two bytes top up the first segment; the remainder needs 3 >= rcv_wnd.
        let sent = s.push(1, &[0u8; 14], 4, 3).unwrap();
        assert_eq!(sent, 2);
        assert_eq!(s.queue_len(), 1);
    }

    #[test]
    fn admit_respects_window_and_stamps_segments() {
        let mut s = Sender::new();
        for _ in 0..5 {
            s.push(1, b"x", MSS, 128).unwrap();
        }
        let moved = s.admit(3, 500, 9, 100, 200);
        assert_eq!(moved, 3);
        assert_eq!(s.buf_len(), 3);
        assert_eq!(s.queue_len(), 2);
        assert_eq!(s.snd_nxt, 3);
        let seg = s.in_flight().next().unwrap();
        assert_eq!(seg.header.sn, 0);
        assert_eq!(seg.header.una, 9);
        assert_eq!(seg.header.ts, 500);
        assert_eq!(seg.rto, 200);
        assert_eq!(s.waiting(), 5);
    }

    #[test]
    fn una_prunes_cumulatively() {
        let mut s = sender_with_in_flight(4);
        s.on_una(3);
        assert_eq!(s.buf_len(), 1);
        assert_eq!(s.snd_una, 3);
    }

    #[test]
    fn ack_removes_exact_match_only() {
        let mut s = sender_with_in_flight(4);
        assert!(s.on_ack(2));
        let sns: Vec<u32> = s.in_flight().map(|seg| seg.header.sn).collect();
        assert_eq!(sns, vec![0, 1, 3]);
        assert_eq!(s.snd_una, 0);
        // Out of range
        assert!(!s.on_ack(10));
        assert!(!s.on_ack(2));
    }

    #[test]
    fn ack_of_front_advances_una() {
        let mut s = sender_with_in_flight(2);
        s.on_ack(0);
        assert_eq!(s.snd_una, 1);
        s.on_ack(1);
        assert_eq!(s.snd_una, 2);
        assert_eq!(s.inflight(), 0);
    }

    #[test]
    fn fastack_counts_older_segments() {
        let mut s = sender_with_in_flight(4);
        s.on_fastack(2);
        let counts: Vec<u32> = s.in_flight().map(|seg| seg.fastack).collect();
        assert_eq!(counts, vec![1, 1, 0, 0]);
    }

    #[test]
    fn initial_transmit_schedules_resend() {
        let mut seg = Segment::new(1, Command::Push, vec![]);
        assert_eq!(poll_transmit(&mut seg, 1000, &policy()), Transmit::Initial);
        assert_eq!(seg.xmit, 1);
        // rto + rto/8
        assert_eq!(seg.resendts, 1000 + 200 + 25);
        assert_eq!(poll_transmit(&mut seg, 1100, &policy()), Transmit::Idle);
    }

    #[test]
    fn timeout_doubles_rto_without_nodelay() {
        let mut seg = Segment::new(1, Command::Push, vec![]);
        poll_transmit(&mut seg, 0, &policy());
        assert_eq!(poll_transmit(&mut seg, 225, &policy()), Transmit::Timeout);
        assert_eq!(seg.rto, 400);
        assert_eq!(seg.resendts, 625);
    }

    #[test]
    fn timeout_grows_by_half_with_nodelay() {
        let p = RetransmitPolicy {
            nodelay: 1,
            ..policy()
        };
        let mut seg = Segment::new(1, Command::Push, vec![]);
        poll_transmit(&mut seg, 0, &p);
        assert_eq!(seg.resendts, 200);
        assert_eq!(poll_transmit(&mut seg, 200, &p), Transmit::Timeout);
        assert_eq!(seg.rto, 300);
    }

    #[test]
    fn fast_retransmit_after_threshold() {
        let mut seg = Segment::new(1, Command::Push, vec![]);
        poll_transmit(&mut seg, 0, &policy());
        seg.fastack = 2;
        assert_eq!(poll_transmit(&mut seg, 10, &policy()), Transmit::Fast);
        assert_eq!(seg.fastack, 0);
        assert_eq!(seg.xmit, 2);
    }

    #[test]
    fn fast_retransmit_respects_limit() {
        let p = RetransmitPolicy {
            fast_limit: 1,
            ..policy()
        };
        let mut seg = Segment::new(1, Command::Push, vec![]);
        poll_transmit(&mut seg, 0, &p);
        seg.xmit = 2;
        seg.fastack = 5;
        assert_eq!(poll_transmit(&mut seg, 10, &p), Transmit::Idle);
    }

    #[test]
    fn seq_wrap_around() {
        let mut s = Sender::new();
        s.snd_una = u32::MAX - 1;
        s.snd_nxt = u32::MAX - 1;
        for _ in 0..4 {
            s.push(1, b"x", MSS, 128).unwrap();
        }
        s.admit(4, 0, 0, 128, 200);
        assert_eq!(s.snd_nxt, 2);
        s.on_una(1);
        let sns: Vec<u32> = s.in_flight().map(|seg| seg.header.sn).collect();
        assert_eq!(sns, vec![1]);
        assert_eq!(s.snd_una, 1);
    }
}
