//! Tunable control block parameters.
//!
//! [`KcpConfig::default`] reproduces the conservative TCP-like defaults.
//! [`KcpConfig::fast`] is the low-latency profile used for game traffic:
//! nodelay on, 10ms ticks, fast resend after two skips, and no congestion
//! window.

use crate::receiver::WND_RCV;

/// Default MTU, including the 24-byte segment header.
pub const MTU_DEF: usize = 1400;
/// Default send window, in segments.
pub const WND_SND: u32 = 32;
/// Default flush interval in milliseconds.
pub const INTERVAL: u32 = 100;
/// Default retransmission count after which the link is declared dead.
pub const DEADLINK: u32 = 20;
/// Default fast retransmit limit per segment.
pub const FASTACK_LIMIT: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KcpConfig {
    /// Maximum bytes per emitted datagram, excluding the reserved prefix.
    pub mtu: usize,
    pub snd_wnd: u32,
    pub rcv_wnd: u32,
    /// 0 off, 1 on, 2 aggressive RTO growth.
    pub nodelay: u32,
    /// Flush interval in milliseconds (clamped to `[10, 5000]`).
    pub interval: u32,
    /// Fast-ack threshold for fast retransmit; 0 disables it.
    pub fast_resend: u32,
    pub no_congestion_window: bool,
    /// Merge writes into a byte stream instead of preserving message bounds.
    pub stream: bool,
    /// Overrides the minimum RTO chosen by `nodelay`.
    pub min_rto: Option<u32>,
    /// Fast retransmits allowed per segment (clamped to `[0, 5]`, 0 = unlimited).
    pub fast_resend_limit: u32,
    pub dead_link: u32,
}

impl Default for KcpConfig {
    fn default() -> Self {
        Self {
            mtu: MTU_DEF,
            snd_wnd: WND_SND,
            rcv_wnd: WND_RCV,
            nodelay: 0,
            interval: INTERVAL,
            fast_resend: 0,
            no_congestion_window: false,
            stream: false,
            min_rto: None,
            fast_resend_limit: FASTACK_LIMIT,
            dead_link: DEADLINK,
        }
    }
}

impl KcpConfig {
    /// Same as [`KcpConfig::default`].
    pub fn normal() -> Self {
        Self::default()
    }

    /// Low-latency profile.
    pub fn fast() -> Self {
        Self {
            nodelay: 1,
            interval: 10,
            fast_resend: 2,
            no_congestion_window: true,
            ..Self::default()
        }
    }
}
