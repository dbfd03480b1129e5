//! Pending acknowledgements.
//!
//! Every PUSH segment that lands inside the receive window is acknowledged
//! individually, duplicates included.  The `(sn, ts)` pairs are collected
//! during `input` and emitted as standalone ACK segments at the start of the
//! next flush, echoing `ts` so the peer can take an RTT sample.

/// One acknowledgement waiting to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRecord {
    pub sn: u32,
    pub ts: u32,
}

#[derive(Debug, Clone, Default)]
pub struct AckList {
    pending: Vec<AckRecord>,
}

impl AckList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sn: u32, ts: u32) {
        self.pending.push(AckRecord { sn, ts });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take every pending record, oldest first.
    pub fn drain(&mut self) -> std::vec::Drain<'_, AckRecord> {
        self.pending.drain(..)
    }
}
