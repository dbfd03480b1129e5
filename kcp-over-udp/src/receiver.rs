//! Receive-side segment pipeline.
//!
//! [`Receiver`] accepts PUSH segments in any order and hands out complete
//! messages in order:
//!
//! ```text
//!   input (any order)        sn == rcv_nxt            recv
//!  ──────────────────▶ buf ────────────────▶ queue ─────────▶ application
//!                      (sorted by sn,        (contiguous,
//!                       no duplicates)        bounded by rcv_wnd)
//! ```
//!
//! - Segments outside `[rcv_nxt, rcv_nxt + rcv_wnd)` are discarded.
//! - Duplicates of a segment already in `buf` are discarded.
//! - `rcv_nxt` advances by exactly one for every segment moved into `queue`.
//! - A message is complete once `queue` holds its every fragment up to the
//!   one with `frg == 0`.

use std::collections::VecDeque;

use crate::kcp::RecvError;
use crate::segment::Segment;
use crate::seq::{seq_lt, time_diff};

/// Default (and minimum) receive window, in segments.
pub const WND_RCV: u32 = 128;

#[derive(Debug)]
pub struct Receiver {
    /// Next sequence number expected in order.
    pub rcv_nxt: u32,
    /// Receive window in segments.
    pub rcv_wnd: u32,
    buf: VecDeque<Segment>,
    queue: VecDeque<Segment>,
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver {
    pub fn new() -> Self {
        Self {
            rcv_nxt: 0,
            rcv_wnd: WND_RCV,
            buf: VecDeque::new(),
            queue: VecDeque::new(),
        }
    }

    /// `true` when `sn` is below the upper edge of the receive window.
    ///
    /// Such segments are acknowledged even if they were already delivered,
    /// so a sender whose ACK was lost stops retransmitting.
    pub fn acceptable(&self, sn: u32) -> bool {
        time_diff(sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) < 0
    }

    /// Buffer a PUSH segment and move any newly contiguous data to the
    /// receive queue.
    ///
    /// Returns `true` if the segment was new, `false` if it was a duplicate
    /// or fell outside the window.
    pub fn insert(&mut self, seg: Segment) -> bool {
        let sn = seg.header.sn;
        if !self.acceptable(sn) || seq_lt(sn, self.rcv_nxt) {
            return false;
        }

        // New arrivals are usually near the tail; scan backwards.
        let mut pos = self.buf.len();
        let mut duplicate = false;
        for existing in self.buf.iter().rev() {
            if existing.header.sn == sn {
                duplicate = true;
                break;
            }
            if seq_lt(existing.header.sn, sn) {
                break;
            }
            pos -= 1;
        }

        if !duplicate {
            self.buf.insert(pos, seg);
        }
        self.drain_ready();
        !duplicate
    }

    /// Move contiguous segments from `buf` into `queue` while it has room.
    pub fn drain_ready(&mut self) {
        while let Some(front) = self.buf.front() {
            if front.header.sn != self.rcv_nxt || self.queue_full() {
                break;
            }
            if let Some(seg) = self.buf.pop_front() {
                self.queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    /// `true` when the receive queue holds `rcv_wnd` or more segments.
    pub fn queue_full(&self) -> bool {
        self.queue.len() >= self.rcv_wnd as usize
    }

    /// Size in bytes of the next complete message.
    pub fn peek_size(&self) -> Result<usize, RecvError> {
        let front = self.queue.front().ok_or(RecvError::Empty)?;
        if front.header.frg == 0 {
            return Ok(front.data.len());
        }
        if self.queue.len() < usize::from(front.header.frg) + 1 {
            return Err(RecvError::Incomplete);
        }

        let mut len = 0;
        for seg in &self.queue {
            len += seg.data.len();
            if seg.header.frg == 0 {
                return Ok(len);
            }
        }
        Err(RecvError::Incomplete)
    }

    /// Copy the next complete message into `out`.
    ///
    /// With `peek == false` the message's segments are dequeued and any
    /// buffered successors are drained into the queue.
    pub fn recv(&mut self, out: &mut [u8], peek: bool) -> Result<usize, RecvError> {
        let size = self.peek_size()?;
        if size > out.len() {
            return Err(RecvError::BufferTooSmall { needed: size });
        }

        let mut len = 0;
        let mut consumed = 0;
        for seg in &self.queue {
            out[len..len + seg.data.len()].copy_from_slice(&seg.data);
            len += seg.data.len();
            consumed += 1;
            if seg.header.frg == 0 {
                break;
            }
        }
        debug_assert_eq!(len, size);

        if !peek {
            self.queue.drain(..consumed);
        }
        self.drain_ready();
        Ok(len)
    }

    /// Free slots in the receive queue, as advertised to the peer.
    pub fn wnd_unused(&self) -> u16 {
        let free = (self.rcv_wnd as usize).saturating_sub(self.queue.len());
        free.min(usize::from(u16::MAX)) as u16
    }

    pub fn buf_len(&self) -> usize {
        self.buf.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Segments buffered or queued.
    pub fn waiting(&self) -> usize {
        self.buf.len() + self.queue.len()
    }
}
