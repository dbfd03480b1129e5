//! Control block lifecycle.
//!
//! ```text
//!  Created ──first update()──▶ Active ──xmit ≥ dead_link──▶ Dead
//! ```
//!
//! `Dead` is advisory: the control block keeps sending and receiving on a
//! best-effort basis.  Deciding to drop the connection is the owner's call.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No `update` yet; flushing is a no-op and there is no schedule.
    #[default]
    Created,
    /// Driven by `update`; the normal operating state.
    Active,
    /// Some segment reached the dead-link retransmission threshold.
    Dead,
}

impl LinkState {
    /// `true` once the first `update` has established a flush baseline.
    pub fn is_updated(self) -> bool {
        !matches!(self, LinkState::Created)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
