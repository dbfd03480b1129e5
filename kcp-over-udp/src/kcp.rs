//! The per-connection control block.
//!
//! [`Kcp`] ties the pipelines together and exposes the five driving
//! operations:
//!
//! ```text
//!  send(bytes) ──▶ Sender.queue            Receiver.queue ──▶ recv(buf)
//!                       │                        ▲
//!          update(now) ─┤ flush                  │ input(datagram)
//!                       ▼                        │
//!                  Sender.buf ──▶ Output   datagram from the owner
//! ```
//!
//! Everything is single-threaded and non-blocking.  The owner feeds datagrams
//! into [`Kcp::input`] and drives [`Kcp::update`] with a millisecond clock;
//! [`Kcp::check`] says when the next call is due.  Outbound datagrams reach
//! the owner through the [`Output`] sink.
//!
//! Timestamps are `u32` milliseconds and may wrap; all comparisons go
//! through [`crate::seq`].

use thiserror::Error;

use crate::ack::AckList;
use crate::config::{KcpConfig, DEADLINK, FASTACK_LIMIT, INTERVAL, MTU_DEF, WND_SND};
use crate::congestion::Congestion;
use crate::output::Output;
use crate::receiver::{Receiver, WND_RCV};
use crate::rto::{RtoEstimator, RTO_MAX, RTO_MIN, RTO_NDL};
use crate::segment::{Command, FramingError, Header, Segment, Segments, HEADER_LEN};
use crate::sender::{poll_transmit, RetransmitPolicy, Sender, Transmit};
use crate::seq::{seq_le, seq_lt, time_diff};
use crate::state::LinkState;

/// Initial window-probe delay.
pub const PROBE_INIT: u32 = 7_000;
/// Upper bound for the window-probe delay.
pub const PROBE_LIMIT: u32 = 120_000;
/// Smallest MTU accepted by [`Kcp::set_mtu`].
pub const MTU_MIN: usize = 50;

/// Clock jumps at least this large reset the flush schedule.
const CLOCK_JUMP: i32 = 10_000;

/// Errors returned by [`Kcp::send`], [`Kcp::input`] and the setters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KcpError {
    /// The datagram is malformed; drop it.
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// A message would need more than 255 fragments.
    #[error("message needs {0} fragments, at most 255 allowed")]
    TooManyFragments(usize),
    /// A message would need at least as many fragments as the receive window.
    #[error("message needs {fragments} fragments, receive window is {rcv_wnd}")]
    WindowExceeded { fragments: usize, rcv_wnd: u32 },
    #[error("invalid mtu {0}")]
    InvalidMtu(usize),
}

/// Why [`Kcp::recv`] produced no message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// Nothing has been reassembled.
    #[error("receive queue is empty")]
    Empty,
    /// The head message is still missing fragments.
    #[error("next message is incomplete")]
    Incomplete,
    /// The caller's buffer cannot hold the next message; nothing consumed.
    #[error("buffer too small, next message needs {needed} bytes")]
    BufferTooSmall { needed: usize },
}

impl RecvError {
    /// `true` for the "try again later" outcomes.
    pub fn is_would_block(&self) -> bool {
        matches!(self, RecvError::Empty | RecvError::Incomplete)
    }
}

/// Pending window-probe commands for the next flush.
#[derive(Debug, Clone, Copy, Default)]
struct Probe {
    /// Send WASK: ask the peer for its window.
    ask: bool,
    /// Send WINS: tell the peer our window.
    tell: bool,
}

/// One reliable, ordered conversation.
pub struct Kcp<O: Output> {
    conv: u32,
    mtu: usize,
    mss: usize,
    reserved: usize,
    state: LinkState,

    snd_wnd: u32,
    rmt_wnd: u32,
    sender: Sender,
    receiver: Receiver,
    congestion: Congestion,
    rto: RtoEstimator,
    acks: AckList,

    current: u32,
    ts_flush: u32,
    interval: u32,

    probe: Probe,
    probe_wait: u32,
    ts_probe: u32,

    nodelay: u32,
    fast_resend: u32,
    fast_limit: u32,
    nocwnd: bool,
    xmit: u32,
    dead_link: u32,

    /// Datagram under construction; the first `reserved` bytes are zero.
    buffer: Vec<u8>,
    output: O,
}

impl<O: Output> std::fmt::Debug for Kcp<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kcp")
            .field("conv", &self.conv)
            .field("state", &self.state)
            .field("snd_una", &self.sender.snd_una)
            .field("snd_nxt", &self.sender.snd_nxt)
            .field("rcv_nxt", &self.receiver.rcv_nxt)
            .field("cwnd", &self.congestion.cwnd())
            .field("rmt_wnd", &self.rmt_wnd)
            .field("rto", &self.rto.rto())
            .finish_non_exhaustive()
    }
}

impl<O: Output> Kcp<O> {
    /// Create a control block for conversation `conv`.
    ///
    /// Every datagram passed to `output` starts with `reserved` bytes left
    /// for the owner's own framing.
    pub fn new(conv: u32, reserved: usize, output: O) -> Self {
        let mss = MTU_DEF - HEADER_LEN;
        let mut buffer = Vec::with_capacity(reserved + MTU_DEF);
        buffer.resize(reserved, 0);
        Self {
            conv,
            mtu: MTU_DEF,
            mss,
            reserved,
            state: LinkState::Created,
            snd_wnd: WND_SND,
            rmt_wnd: WND_RCV,
            sender: Sender::new(),
            receiver: Receiver::new(),
            congestion: Congestion::new(mss as u32),
            rto: RtoEstimator::new(),
            acks: AckList::new(),
            current: 0,
            ts_flush: INTERVAL,
            interval: INTERVAL,
            probe: Probe::default(),
            probe_wait: 0,
            ts_probe: 0,
            nodelay: 0,
            fast_resend: 0,
            fast_limit: FASTACK_LIMIT,
            nocwnd: false,
            xmit: 0,
            dead_link: DEADLINK,
            buffer,
            output,
        }
    }

    /// Create a control block and apply `config`.
    pub fn with_config(conv: u32, reserved: usize, output: O, config: &KcpConfig) -> Result<Self, KcpError> {
        let mut kcp = Self::new(conv, reserved, output);
        kcp.apply_config(config)?;
        Ok(kcp)
    }

    /// Apply every setting in `config` through the individual setters.
    pub fn apply_config(&mut self, config: &KcpConfig) -> Result<(), KcpError> {
        self.set_mtu(config.mtu)?;
        self.set_window_size(config.snd_wnd, config.rcv_wnd);
        self.set_nodelay(
            config.nodelay,
            config.interval,
            config.fast_resend,
            config.no_congestion_window,
        );
        if let Some(min_rto) = config.min_rto {
            self.set_min_rto(min_rto);
        }
        self.set_fast_resend_limit(config.fast_resend_limit);
        self.set_stream_mode(config.stream);
        self.set_dead_link(config.dead_link);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Application side
    // -----------------------------------------------------------------------

    /// Queue `data` for delivery.  Returns the number of bytes accepted.
    ///
    /// Nothing is transmitted until the next flush.
    pub fn send(&mut self, data: &[u8]) -> Result<usize, KcpError> {
        let sent = self
            .sender
            .push(self.conv, data, self.mss, self.receiver.rcv_wnd)?;
        log::trace!(
            "[kcp] conv={} queued {} bytes, {} waiting",
            self.conv,
            sent,
            self.sender.waiting()
        );
        Ok(sent)
    }

    /// Copy the next complete message into `out` and consume it.
    pub fn recv(&mut self, out: &mut [u8]) -> Result<usize, RecvError> {
        self.recv_inner(out, false)
    }

    /// Copy the next complete message into `out` without consuming it.
    pub fn recv_peek(&mut self, out: &mut [u8]) -> Result<usize, RecvError> {
        self.recv_inner(out, true)
    }

    /// Take the next complete message as an owned buffer.
    pub fn recv_vec(&mut self) -> Result<Vec<u8>, RecvError> {
        let size = self.receiver.peek_size()?;
        let mut out = vec![0u8; size];
        let n = self.recv_inner(&mut out, false)?;
        out.truncate(n);
        Ok(out)
    }

    /// Size of the next complete message.
    pub fn peek_size(&self) -> Result<usize, RecvError> {
        self.receiver.peek_size()
    }

    fn recv_inner(&mut self, out: &mut [u8], peek: bool) -> Result<usize, RecvError> {
        let was_full = self.receiver.queue_full();
        let n = self.receiver.recv(out, peek)?;
        if was_full && !self.receiver.queue_full() {
            // Window was advertised as closed; tell the peer it reopened.
            self.probe.tell = true;
        }
        Ok(n)
    }

    // -----------------------------------------------------------------------
    // Network side
    // -----------------------------------------------------------------------

    /// Process one datagram received from the peer.
    ///
    /// A datagram may carry several segments.  On a framing error the
    /// remaining segments are skipped and the error returned; segments
    /// before the bad one have already been applied.
    pub fn input(&mut self, datagram: &[u8]) -> Result<(), KcpError> {
        if datagram.len() < HEADER_LEN {
            return Err(FramingError::TooShort.into());
        }

        let prev_una = self.sender.snd_una;
        let mut max_ack: Option<u32> = None;
        let result = self.input_segments(datagram, &mut max_ack);

        if result.is_ok() {
            if let Some(sn) = max_ack {
                self.sender.on_fastack(sn);
            }
            if time_diff(self.sender.snd_una, prev_una) > 0 {
                let limit = self.window_limit();
                self.congestion.on_ack_advance(self.mss as u32, limit);
            }
        }
        // A WINS or any header may have shrunk rmt_wnd below cwnd.
        self.congestion.clamp(self.mss as u32, self.window_limit());
        result
    }

    fn input_segments(
        &mut self,
        datagram: &[u8],
        max_ack: &mut Option<u32>,
    ) -> Result<(), KcpError> {
        for item in Segments::new(datagram) {
            let (header, payload) = item?;
            if header.conv != self.conv {
                return Err(FramingError::ConvMismatch {
                    expected: self.conv,
                    got: header.conv,
                }
                .into());
            }

            self.rmt_wnd = u32::from(header.wnd);
            self.sender.on_una(header.una);

            match header.cmd {
                Command::Ack => {
                    let rtt = time_diff(self.current, header.ts);
                    if rtt >= 0 {
                        self.rto.sample(rtt as u32, self.interval);
                    }
                    self.sender.on_ack(header.sn);
                    *max_ack = match *max_ack {
                        Some(max) if seq_le(header.sn, max) => Some(max),
                        _ => Some(header.sn),
                    };
                    log::trace!(
                        "[kcp] conv={} ← ACK sn={} rtt={} rto={}",
                        self.conv,
                        header.sn,
                        rtt,
                        self.rto.rto()
                    );
                }
                Command::Push => {
                    if self.receiver.acceptable(header.sn) {
                        self.acks.push(header.sn, header.ts);
                        if !seq_lt(header.sn, self.receiver.rcv_nxt) {
                            let seg = Segment {
                                header,
                                data: payload.to_vec(),
                                resendts: 0,
                                rto: 0,
                                fastack: 0,
                                xmit: 0,
                            };
                            let fresh = self.receiver.insert(seg);
                            log::trace!(
                                "[kcp] conv={} ← PUSH sn={} frg={} len={} new={}",
                                self.conv,
                                header.sn,
                                header.frg,
                                payload.len(),
                                fresh
                            );
                        }
                    }
                }
                Command::WindowAsk => {
                    self.probe.tell = true;
                    log::debug!("[kcp] conv={} ← WASK", self.conv);
                }
                Command::WindowTell => {
                    log::debug!("[kcp] conv={} ← WINS wnd={}", self.conv, header.wnd);
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Advance the clock to `now` and flush if a tick is due.
    pub fn update(&mut self, now: u32) {
        self.current = now;

        if !self.state.is_updated() {
            self.state = LinkState::Active;
            self.ts_flush = now;
        }

        let mut slap = time_diff(now, self.ts_flush);
        if !(-CLOCK_JUMP..CLOCK_JUMP).contains(&slap) {
            self.ts_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if time_diff(now, self.ts_flush) >= 0 {
                self.ts_flush = now.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    /// Earliest time at which [`Kcp::update`] should be called again.
    ///
    /// Pure query; never more than one interval ahead of `now`.
    pub fn check(&self, now: u32) -> u32 {
        if !self.state.is_updated() {
            return now;
        }

        let mut ts_flush = self.ts_flush;
        let slap = time_diff(now, ts_flush);
        if !(-CLOCK_JUMP..CLOCK_JUMP).contains(&slap) {
            ts_flush = now;
        }
        if time_diff(now, ts_flush) >= 0 {
            return now;
        }

        let tm_flush = time_diff(ts_flush, now);
        let mut tm_packet = i32::MAX;
        for seg in self.sender.in_flight() {
            let diff = time_diff(seg.resendts, now);
            if diff <= 0 {
                return now;
            }
            tm_packet = tm_packet.min(diff);
        }

        let minimal = (tm_packet.min(tm_flush) as u32).min(self.interval);
        now.wrapping_add(minimal)
    }

    /// Emit pending acks, probes and due data segments through the sink.
    ///
    /// Does nothing before the first [`Kcp::update`].
    pub fn flush(&mut self) {
        if !self.state.is_updated() {
            return;
        }

        let current = self.current;
        let mtu = self.mtu;
        let reserved = self.reserved;
        let wnd = self.receiver.wnd_unused();
        let rcv_nxt = self.receiver.rcv_nxt;

        let mut ctrl = Header::new(self.conv, Command::Ack);
        ctrl.wnd = wnd;
        ctrl.una = rcv_nxt;

        // Acknowledgements first.
        let acks = self.acks.len();
        for ack in self.acks.drain() {
            make_room(&mut self.buffer, reserved, mtu, HEADER_LEN, &mut self.output);
            ctrl.sn = ack.sn;
            ctrl.ts = ack.ts;
            ctrl.encode_into(0, &mut self.buffer);
        }
        if acks > 0 {
            log::trace!("[kcp] conv={} → {} ACK(s)", self.conv, acks);
        }
        ctrl.sn = 0;
        ctrl.ts = 0;

        // Probe the peer's window while it advertises zero.
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = current.wrapping_add(self.probe_wait);
            } else if time_diff(current, self.ts_probe) >= 0 {
                self.probe_wait = self.probe_wait.max(PROBE_INIT);
                self.probe_wait += self.probe_wait / 2;
                self.probe_wait = self.probe_wait.min(PROBE_LIMIT);
                self.ts_probe = current.wrapping_add(self.probe_wait);
                self.probe.ask = true;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }

        if self.probe.ask {
            make_room(&mut self.buffer, reserved, mtu, HEADER_LEN, &mut self.output);
            ctrl.cmd = Command::WindowAsk;
            ctrl.encode_into(0, &mut self.buffer);
            log::debug!("[kcp] conv={} → WASK (next probe in {}ms)", self.conv, self.probe_wait);
        }
        if self.probe.tell {
            make_room(&mut self.buffer, reserved, mtu, HEADER_LEN, &mut self.output);
            ctrl.cmd = Command::WindowTell;
            ctrl.encode_into(0, &mut self.buffer);
            log::debug!("[kcp] conv={} → WINS wnd={}", self.conv, wnd);
        }
        self.probe = Probe::default();

        // Admit queued segments into the window.
        let limit = self.window_limit();
        let window = self.congestion.effective_window(limit, !self.nocwnd);
        self.sender
            .admit(window, current, rcv_nxt, wnd, self.rto.rto());

        let policy = RetransmitPolicy {
            rx_rto: self.rto.rto(),
            nodelay: self.nodelay,
            fast_resend: self.fast_resend,
            fast_limit: self.fast_limit,
        };
        let mut lost = false;
        let mut change = 0u32;

        for seg in self.sender.in_flight_mut() {
            match poll_transmit(seg, current, &policy) {
                Transmit::Idle => continue,
                Transmit::Initial => {}
                Transmit::Timeout => {
                    self.xmit = self.xmit.wrapping_add(1);
                    lost = true;
                    log::debug!(
                        "[kcp] conv={} timeout retransmit sn={} xmit={} rto={}",
                        self.conv,
                        seg.header.sn,
                        seg.xmit,
                        seg.rto
                    );
                }
                Transmit::Fast => {
                    change += 1;
                    log::debug!(
                        "[kcp] conv={} fast retransmit sn={} xmit={}",
                        self.conv,
                        seg.header.sn,
                        seg.xmit
                    );
                }
            }

            seg.header.ts = current;
            seg.header.wnd = wnd;
            seg.header.una = rcv_nxt;

            make_room(&mut self.buffer, reserved, mtu, seg.wire_len(), &mut self.output);
            seg.encode_into(&mut self.buffer);

            if seg.xmit >= self.dead_link && self.state != LinkState::Dead {
                self.state = LinkState::Dead;
                log::warn!(
                    "[kcp] conv={} link dead: sn={} sent {} times",
                    self.conv,
                    seg.header.sn,
                    seg.xmit
                );
            }
        }

        emit(&mut self.buffer, reserved, &mut self.output);

        let mss = self.mss as u32;
        if change > 0 {
            let inflight = self.sender.inflight();
            self.congestion
                .on_fast_retransmit(inflight, self.fast_resend, mss, limit);
        }
        if lost {
            self.congestion.on_timeout(window, mss, limit);
        }
        self.congestion.clamp(mss, limit);
    }

    fn window_limit(&self) -> u32 {
        self.snd_wnd.min(self.rmt_wnd)
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// Change the MTU (bytes per datagram, excluding the reserved prefix).
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), KcpError> {
        if mtu < MTU_MIN || mtu < HEADER_LEN {
            return Err(KcpError::InvalidMtu(mtu));
        }
        self.mtu = mtu;
        self.mss = mtu - HEADER_LEN;
        self.buffer
            .reserve((self.reserved + mtu).saturating_sub(self.buffer.len()));
        Ok(())
    }

    /// Set the send and receive windows in segments; `0` keeps the current
    /// value.  The receive window never drops below the default of 128.
    pub fn set_window_size(&mut self, snd_wnd: u32, rcv_wnd: u32) {
        if snd_wnd > 0 {
            self.snd_wnd = snd_wnd;
        }
        if rcv_wnd > 0 {
            self.receiver.rcv_wnd = rcv_wnd.max(WND_RCV);
        }
    }

    /// Configure retransmission aggressiveness in one call.
    ///
    /// `nodelay` 0 is TCP-like, 1 lowers the minimum RTO and grows the RTO
    /// by half on timeout, 2 grows it by half the smoothed RTO instead.
    /// `fast_resend` 0 disables fast retransmit.
    pub fn set_nodelay(&mut self, nodelay: u32, interval: u32, fast_resend: u32, no_congestion_window: bool) {
        self.nodelay = nodelay;
        self.rto
            .set_minrto(if nodelay != 0 { RTO_NDL } else { RTO_MIN });
        self.set_interval(interval);
        self.fast_resend = fast_resend;
        self.nocwnd = no_congestion_window;
    }

    pub fn set_interval(&mut self, interval: u32) {
        self.interval = interval.clamp(10, 5000);
    }

    pub fn set_min_rto(&mut self, min_rto: u32) {
        self.rto.set_minrto(min_rto.clamp(1, RTO_MAX));
    }

    /// Fast retransmits allowed per segment, clamped to `[0, 5]`; 0 is unlimited.
    pub fn set_fast_resend_limit(&mut self, limit: u32) {
        self.fast_limit = limit.min(FASTACK_LIMIT);
    }

    pub fn set_stream_mode(&mut self, stream: bool) {
        self.sender.stream = stream;
    }

    pub fn set_dead_link(&mut self, dead_link: u32) {
        self.dead_link = dead_link;
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn conv(&self) -> u32 {
        self.conv
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == LinkState::Dead
    }

    pub fn snd_una(&self) -> u32 {
        self.sender.snd_una
    }

    pub fn snd_nxt(&self) -> u32 {
        self.sender.snd_nxt
    }

    pub fn rcv_nxt(&self) -> u32 {
        self.receiver.rcv_nxt
    }

    pub fn snd_wnd(&self) -> u32 {
        self.snd_wnd
    }

    pub fn rcv_wnd(&self) -> u32 {
        self.receiver.rcv_wnd
    }

    pub fn rmt_wnd(&self) -> u32 {
        self.rmt_wnd
    }

    pub fn cwnd(&self) -> u32 {
        self.congestion.cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.congestion.ssthresh()
    }

    pub fn rto(&self) -> u32 {
        self.rto.rto()
    }

    pub fn srtt(&self) -> u32 {
        self.rto.srtt()
    }

    pub fn rttval(&self) -> u32 {
        self.rto.rttval()
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Timeout retransmissions across all segments.
    pub fn retransmissions(&self) -> u32 {
        self.xmit
    }

    /// Segments queued or in flight.
    pub fn waiting_to_send(&self) -> usize {
        self.sender.waiting()
    }

    /// Segments buffered out of order or awaiting `recv`.
    pub fn waiting_to_receive(&self) -> usize {
        self.receiver.waiting()
    }

    pub fn send_queue_len(&self) -> usize {
        self.sender.queue_len()
    }

    pub fn send_buf_len(&self) -> usize {
        self.sender.buf_len()
    }

    pub fn rcv_buf_len(&self) -> usize {
        self.receiver.buf_len()
    }

    pub fn rcv_queue_len(&self) -> usize {
        self.receiver.queue_len()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn into_output(self) -> O {
        self.output
    }
}

/// Send the current datagram first if `need` more bytes would exceed `mtu`.
fn make_room<O: Output>(buffer: &mut Vec<u8>, reserved: usize, mtu: usize, need: usize, output: &mut O) {
    if buffer.len() - reserved + need > mtu {
        emit(buffer, reserved, output);
    }
}

/// Hand the current datagram to the sink and start a new one.
fn emit<O: Output>(buffer: &mut Vec<u8>, reserved: usize, output: &mut O) {
    if buffer.len() > reserved {
        output.output(buffer.as_mut_slice());
        buffer.clear();
        buffer.resize(reserved, 0);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    type TestKcp = Kcp<VecDeque<Vec<u8>>>;

    const CONV: u32 = 0x0102_0304;

    fn kcp() -> TestKcp {
        Kcp::new(CONV, 0, VecDeque::new())
    }

    fn take(k: &mut TestKcp) -> Vec<Vec<u8>> {
        k.output_mut().drain(..).collect()
    }

    fn headers(datagrams: &[Vec<u8>], reserved: usize) -> Vec<Header> {
        datagrams
            .iter()
            .flat_map(|d| Segments::new(&d[reserved..]).map(|r| r.unwrap().0))
            .collect()
    }

    fn segment_bytes(cmd: Command, sn: u32, wnd: u16, payload: &[u8]) -> Vec<u8> {
        let mut seg = Segment::new(CONV, cmd, payload.to_vec());
        seg.header.sn = sn;
        seg.header.wnd = wnd;
        let mut buf = Vec::new();
        seg.encode_into(&mut buf);
        buf
    }

    #[test]
    fn initial_state() {
        let k = kcp();
        assert_eq!(k.state(), LinkState::Created);
        assert_eq!(k.mtu(), 1400);
        assert_eq!(k.mss(), 1376);
        assert_eq!(k.cwnd(), 1);
        assert_eq!(k.rto(), 200);
        assert_eq!(k.check(1234), 1234);
    }

    #[test]
    fn flush_before_update_is_noop() {
        let mut k = kcp();
        k.send(b"hello").unwrap();
        k.flush();
        assert!(take(&mut k).is_empty());
    }

    #[test]
    fn first_update_transmits_push() {
        let mut k = kcp();
        k.send(b"hello").unwrap();
        k.update(1000);
        assert_eq!(k.state(), LinkState::Active);

        let out = take(&mut k);
        assert_eq!(out.len(), 1);
        let hs = headers(&out, 0);
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].cmd, Command::Push);
        assert_eq!(hs[0].conv, CONV);
        assert_eq!(hs[0].sn, 0);
        assert_eq!(hs[0].ts, 1000);
        assert_eq!(hs[0].wnd, 128);
        assert_eq!(k.snd_nxt(), 1);
        assert_eq!(k.waiting_to_send(), 1);
    }

    #[test]
    fn reserved_prefix_is_left_for_owner() {
        let mut k: TestKcp = Kcp::new(CONV, 5, VecDeque::new());
        k.send(b"abc").unwrap();
        k.update(0);
        let out: Vec<Vec<u8>> = k.output_mut().drain(..).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..5], &[0u8; 5]);
        assert_eq!(out[0].len(), 5 + HEADER_LEN + 3);
        assert_eq!(headers(&out, 5)[0].sn, 0);
    }

    #[test]
    fn push_is_acked_on_next_flush() {
        let mut k = kcp();
        k.update(0);
        let mut push = Segment::new(CONV, Command::Push, b"x".to_vec());
        push.header.ts = 77;
        push.header.wnd = 128;
        let mut buf = Vec::new();
        push.encode_into(&mut buf);
        k.input(&buf).unwrap();
        k.flush();

        let hs = headers(&take(&mut k), 0);
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].cmd, Command::Ack);
        assert_eq!(hs[0].sn, 0);
        assert_eq!(hs[0].ts, 77);
        assert_eq!(hs[0].una, 1);
        assert_eq!(k.recv_vec().unwrap(), b"x");
    }

    #[test]
    fn acks_are_packed_up_to_mtu() {
        let mut k = kcp();
        k.set_mtu(HEADER_LEN * 3).unwrap();
        k.update(0);
        for sn in 0..7 {
            k.input(&segment_bytes(Command::Push, sn, 128, b"")).unwrap();
        }
        k.flush();
        let out = take(&mut k);
        // 7 acks, three per datagram.
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|d| d.len() <= HEADER_LEN * 3));
        assert_eq!(headers(&out, 0).len(), 7);
    }

    #[test]
    fn ack_removes_segment_and_samples_rtt() {
        let mut k = kcp();
        k.send(b"hello").unwrap();
        k.update(0);
        take(&mut k);

        k.update(100);
        let mut ack = Segment::new(CONV, Command::Ack, vec![]);
        ack.header.sn = 0;
        ack.header.ts = 40;
        ack.header.una = 1;
        ack.header.wnd = 128;
        let mut buf = Vec::new();
        ack.encode_into(&mut buf);
        k.input(&buf).unwrap();

        assert_eq!(k.waiting_to_send(), 0);
        assert_eq!(k.snd_una(), 1);
        assert_eq!(k.srtt(), 60);
        // Slow start grew the window.
        assert_eq!(k.cwnd(), 2);
    }

    #[test]
    fn window_tell_shrinks_cwnd_to_remote_window() {
        let mut k = kcp();
        k.send(b"hello").unwrap();
        k.update(0);
        take(&mut k);

        let mut ack = Segment::new(CONV, Command::Ack, vec![]);
        ack.header.una = 1;
        ack.header.wnd = 128;
        let mut buf = Vec::new();
        ack.encode_into(&mut buf);
        k.input(&buf).unwrap();
        assert_eq!(k.cwnd(), 2);

        k.input(&segment_bytes(Command::WindowTell, 0, 1, b"")).unwrap();
        assert_eq!(k.rmt_wnd(), 1);
        assert_eq!(k.cwnd(), 1);
        assert!(k.cwnd() <= k.snd_wnd().min(k.rmt_wnd()));
    }

    #[test]
    fn shrunk_window_is_applied_before_a_framing_error() {
        let mut k = kcp();
        k.send(b"hello").unwrap();
        k.update(0);
        take(&mut k);

        let mut ack = Segment::new(CONV, Command::Ack, vec![]);
        ack.header.una = 1;
        ack.header.wnd = 128;
        let mut buf = Vec::new();
        ack.encode_into(&mut buf);
        k.input(&buf).unwrap();
        assert_eq!(k.cwnd(), 2);

        // WINS followed by a segment from another conversation.
        let mut datagram = segment_bytes(Command::WindowTell, 0, 1, b"");
        let mut other = Segment::new(CONV + 1, Command::Push, vec![]);
        other.header.wnd = 128;
        other.encode_into(&mut datagram);
        assert!(k.input(&datagram).is_err());
        assert_eq!(k.rmt_wnd(), 1);
        assert_eq!(k.cwnd(), 1);
    }

    #[test]
    fn duplicate_push_is_acked_each_time_but_delivered_once() {
        let mut k = kcp();
        k.update(0);

        // sn 1 arrives twice while sn 0 is missing, then sn 0 twice.
        k.input(&segment_bytes(Command::Push, 1, 128, b"y")).unwrap();
        k.input(&segment_bytes(Command::Push, 1, 128, b"y")).unwrap();
        k.flush();
        k.input(&segment_bytes(Command::Push, 0, 128, b"x")).unwrap();
        assert_eq!(k.rcv_nxt(), 2);
        k.input(&segment_bytes(Command::Push, 0, 128, b"x")).unwrap();
        k.flush();

        let acked: Vec<u32> = headers(&take(&mut k), 0)
            .into_iter()
            .filter(|h| h.cmd == Command::Ack)
            .map(|h| h.sn)
            .collect();
        assert_eq!(acked, vec![1, 1, 0, 0]);

        assert_eq!(k.recv_vec(), Ok(b"x".to_vec()));
        assert_eq!(k.recv_vec(), Ok(b"y".to_vec()));
        assert_eq!(k.recv_vec(), Err(RecvError::Empty));
        assert_eq!(k.rcv_buf_len(), 0);
    }

    #[test]
    fn conv_mismatch_is_rejected() {
        let mut k = kcp();
        let mut seg = Segment::new(CONV + 1, Command::Push, vec![]);
        seg.header.wnd = 128;
        let mut buf = Vec::new();
        seg.encode_into(&mut buf);
        assert_eq!(
            k.input(&buf),
            Err(KcpError::Framing(FramingError::ConvMismatch {
                expected: CONV,
                got: CONV + 1
            }))
        );
        assert_eq!(k.input(&buf[..10]), Err(FramingError::TooShort.into()));
    }

    #[test]
    fn timeout_triggers_retransmit_and_collapses_cwnd() {
        let mut k = kcp();
        k.send(b"a").unwrap();
        k.update(0);
        take(&mut k);

        let mut t = 0;
        while k.retransmissions() == 0 {
            t += 100;
            k.update(t);
        }
        // rto 200 + rto/8 -> first resend on the tick at 300.
        assert_eq!(t, 300);
        let hs = headers(&take(&mut k), 0);
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].sn, 0);
        assert_eq!(hs[0].ts, 300);
        assert_eq!(k.cwnd(), 1);
    }

    #[test]
    fn fast_retransmit_after_skipped_acks() {
        let mut k = kcp();
        k.set_nodelay(1, 10, 2, true);
        for _ in 0..4 {
            k.send(b"x").unwrap();
        }
        k.update(0);
        take(&mut k);

        // Peer acks 1, 2 and 3 in separate datagrams; 0 is missing.
        for sn in 1..4 {
            let mut ack = Segment::new(CONV, Command::Ack, vec![]);
            ack.header.sn = sn;
            ack.header.wnd = 128;
            let mut buf = Vec::new();
            ack.encode_into(&mut buf);
            k.input(&buf).unwrap();
        }
        k.update(10);
        let hs = headers(&take(&mut k), 0);
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].sn, 0);
        assert_eq!(k.retransmissions(), 0);
    }

    #[test]
    fn fast_ack_uses_highest_sn_in_datagram() {
        let mut k = kcp();
        k.set_nodelay(1, 10, 1, true);
        for _ in 0..4 {
            k.send(b"x").unwrap();
        }
        k.update(0);
        take(&mut k);

        // ACK 3 then ACK 1 in one datagram; 0 and 2 were skipped.
        let mut buf = Vec::new();
        for sn in [3, 1] {
            let mut ack = Segment::new(CONV, Command::Ack, vec![]);
            ack.header.sn = sn;
            ack.header.wnd = 128;
            ack.encode_into(&mut buf);
        }
        k.input(&buf).unwrap();
        k.update(10);
        let sns: Vec<u32> = headers(&take(&mut k), 0).iter().map(|h| h.sn).collect();
        assert_eq!(sns, vec![0, 2]);
    }

    #[test]
    fn zero_window_is_probed_and_tell_restores_progress() {
        let mut k = kcp();
        k.update(0);
        k.input(&segment_bytes(Command::WindowTell, 0, 0, b"")).unwrap();
        assert_eq!(k.rmt_wnd(), 0);
        k.send(b"blocked").unwrap();

        let mut saw_wask = false;
        let mut t = 0;
        while t < 20_000 && !saw_wask {
            t += 100;
            k.update(t);
            let hs = headers(&take(&mut k), 0);
            assert!(hs.iter().all(|h| h.cmd != Command::Push));
            saw_wask = hs.iter().any(|h| h.cmd == Command::WindowAsk);
        }
        assert!(saw_wask);
        assert_eq!(t, 7100);

        k.input(&segment_bytes(Command::WindowTell, 0, 32, b"")).unwrap();
        assert_eq!(k.rmt_wnd(), 32);
        k.update(t + 100);
        let hs = headers(&take(&mut k), 0);
        assert!(hs.iter().any(|h| h.cmd == Command::Push));
    }

    #[test]
    fn window_ask_is_answered_with_tell() {
        let mut k = kcp();
        k.update(0);
        k.input(&segment_bytes(Command::WindowAsk, 0, 128, b"")).unwrap();
        k.flush();
        let hs = headers(&take(&mut k), 0);
        assert_eq!(hs.len(), 1);
        assert_eq!(hs[0].cmd, Command::WindowTell);
        assert_eq!(hs[0].wnd, 128);
    }

    #[test]
    fn draining_full_queue_announces_window() {
        let mut k = kcp();
        k.update(0);
        for sn in 0..128 {
            k.input(&segment_bytes(Command::Push, sn, 128, b"m")).unwrap();
        }
        k.flush();
        take(&mut k);
        assert_eq!(k.rcv_queue_len(), 128);

        k.recv_vec().unwrap();
        k.flush();
        let hs = headers(&take(&mut k), 0);
        assert!(hs.iter().any(|h| h.cmd == Command::WindowTell && h.wnd == 1));
    }

    #[test]
    fn check_reports_next_deadline() {
        let mut k = kcp();
        k.update(0);
        // Next tick at 100.
        assert_eq!(k.check(0), 100);
        assert_eq!(k.check(40), 100);
        assert_eq!(k.check(100), 100);

        k.set_nodelay(1, 100, 0, false);
        k.send(b"x").unwrap();
        k.update(100);
        // Resend is due at 300; the tick at 200 comes first.
        assert_eq!(k.check(100), 200);
        assert_eq!(k.check(150), 200);
        assert_eq!(k.check(300), 300);
    }

    #[test]
    fn clock_jump_resets_schedule() {
        let mut k = kcp();
        k.update(0);
        k.send(b"x").unwrap();
        k.update(50_000);
        // Flushed immediately despite the jump.
        assert_eq!(headers(&take(&mut k), 0).len(), 1);
        assert_eq!(k.check(50_000), 50_100);
    }

    #[test]
    fn dead_link_is_flagged_but_engine_keeps_running() {
        let mut k = kcp();
        k.set_dead_link(3);
        k.set_nodelay(1, 10, 0, false);
        k.send(b"x").unwrap();
        let mut t = 0;
        while !k.is_dead() && t < 60_000 {
            k.update(t);
            t += 10;
        }
        assert!(k.is_dead());
        take(&mut k);

        k.send(b"y").unwrap();
        assert_eq!(k.waiting_to_send(), 2);
        k.input(&segment_bytes(Command::Push, 0, 128, b"z")).unwrap();
        assert_eq!(k.recv_vec().unwrap(), b"z");
    }

    #[test]
    fn set_mtu_validates_and_updates_mss() {
        let mut k = kcp();
        assert_eq!(k.set_mtu(49), Err(KcpError::InvalidMtu(49)));
        k.set_mtu(500).unwrap();
        assert_eq!(k.mss(), 476);
    }

    #[test]
    fn window_size_setter_keeps_receive_minimum() {
        let mut k = kcp();
        k.set_window_size(64, 16);
        assert_eq!(k.snd_wnd(), 64);
        assert_eq!(k.rcv_wnd(), 128);
        k.set_window_size(0, 256);
        assert_eq!(k.snd_wnd(), 64);
        assert_eq!(k.rcv_wnd(), 256);
    }

    #[test]
    fn setters_clamp_their_inputs() {
        let mut k = kcp();
        k.set_interval(1);
        assert_eq!(k.interval(), 10);
        k.set_interval(100_000);
        assert_eq!(k.interval(), 5000);
        k.set_fast_resend_limit(9);
        assert_eq!(k.fast_limit, 5);
    }

    #[test]
    fn with_config_applies_fast_profile() {
        let k: TestKcp = Kcp::with_config(CONV, 0, VecDeque::new(), &KcpConfig::fast()).unwrap();
        assert_eq!(k.interval(), 10);
        assert_eq!(k.nodelay, 1);
        assert_eq!(k.fast_resend, 2);
        assert!(k.nocwnd);
        assert_eq!(k.rto.minrto(), RTO_NDL);
    }

    #[test]
    fn recv_reports_would_block() {
        let mut k = kcp();
        let mut out = [0u8; 16];
        let err = k.recv(&mut out).unwrap_err();
        assert_eq!(err, RecvError::Empty);
        assert!(err.is_would_block());
        assert!(!RecvError::BufferTooSmall { needed: 1 }.is_would_block());
    }
}
