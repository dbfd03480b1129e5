//! In-memory network simulator for deterministic testing.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] models one direction of a link on the control block's own
//! millisecond clock and applies a configurable fault model:
//!
//! | Fault        | Description                                            |
//! |--------------|--------------------------------------------------------|
//! | Latency      | Every datagram is delivered `latency` ms after send.   |
//! | Packet loss  | Drop a datagram with probability `loss_rate`.          |
//! | Reordering   | Delay a datagram by an extra `reorder_delay`, letting  |
//! |              | later datagrams overtake it.                           |
//! | Duplication  | Deliver a datagram twice.                              |
//!
//! Faults are drawn from a seeded [`StdRng`] so a failing run can be replayed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::seq::time_diff;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; times are milliseconds.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is held back by `reorder_delay`.
    pub reorder_rate: f64,
    pub reorder_delay: u32,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// One-way delay applied to every datagram.
    pub latency: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults: a transparent pass-through with a short delay.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: 0,
            duplicate_rate: 0.0,
            latency: 10,
        }
    }
}

impl SimulatorConfig {
    /// A link that loses `loss_rate` of all datagrams and does nothing else.
    pub fn lossy(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            ..Self::default()
        }
    }
}

/// Counters describing what the simulator did to the traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub sent: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub delivered: u64,
}

#[derive(Debug)]
struct InFlight {
    deliver_at: u32,
    datagram: Vec<u8>,
}

/// One direction of a simulated link.
#[derive(Debug)]
pub struct Simulator {
    pub config: SimulatorConfig,
    rng: StdRng,
    pending: Vec<InFlight>,
    stats: SimulatorStats,
}

impl Simulator {
    /// Create a simulator whose fault decisions derive from `seed`.
    pub fn new(config: SimulatorConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            pending: Vec::new(),
            stats: SimulatorStats::default(),
        }
    }

    /// Put `datagram` on the wire at time `now`.
    pub fn send(&mut self, now: u32, datagram: &[u8]) {
        self.stats.sent += 1;
        if self.chance(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::trace!("[sim] drop {} bytes", datagram.len());
            return;
        }

        let mut delay = self.config.latency;
        if self.chance(self.config.reorder_rate) {
            self.stats.reordered += 1;
            delay = delay.saturating_add(self.config.reorder_delay);
        }
        self.schedule(now.wrapping_add(delay), datagram.to_vec());

        if self.chance(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            let again = now.wrapping_add(self.config.latency).wrapping_add(1);
            self.schedule(again, datagram.to_vec());
        }
    }

    /// Remove and return every datagram due at or before `now`, in delivery
    /// order.  Datagrams due at the same time keep their send order.
    pub fn deliver(&mut self, now: u32) -> Vec<Vec<u8>> {
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if time_diff(now, self.pending[i].deliver_at) >= 0 {
                due.push(self.pending.remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|p| p.deliver_at.wrapping_sub(now) as i32);
        self.stats.delivered += due.len() as u64;
        due.into_iter().map(|p| p.datagram).collect()
    }

    /// Datagrams still on the wire.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }

    fn schedule(&mut self, deliver_at: u32, datagram: Vec<u8>) {
        self.pending.push(InFlight {
            deliver_at,
            datagram,
        });
    }

    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.random::<f64>() < p
    }
}
