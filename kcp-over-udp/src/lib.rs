//! `kcp-over-udp`: reliable, ordered, congestion-controlled message delivery
//! over an unreliable datagram transport.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   PUSH segments   ┌──────────┐
//!  │  Sender  │──────────────────▶│ Receiver │
//!  └────┬─────┘                   └─────┬────┘
//!       │      ACK / una / WINS         │
//!       │◀──────────────────────────────┘
//!       │
//!  ┌────▼──────────────────────────────┐
//!  │              Kcp                  │
//!  │ (rto, congestion, probes, flush)  │
//!  └────┬──────────────────────────────┘
//!       │ datagrams via Output sink
//!  ┌────▼──────┐
//!  │  Session  │  (tokio task owning a Socket)
//!  └───────────┘
//! ```
//!
//! The control block [`kcp::Kcp`] is transport-agnostic: it never performs
//! I/O and never reads a clock.  [`session`] is one owner that drives it over
//! a tokio UDP socket; tests drive it over [`simulator`].
//!
//! Each module has a single responsibility:
//! - [`segment`]: wire format (serialise / deserialise)
//! - [`seq`]: wrap-around-safe sequence and time comparison
//! - [`sender`]: send queue, send buffer, fragmentation, retransmit timers
//! - [`receiver`]: reorder buffer, receive queue, reassembly
//! - [`ack`]: pending acknowledgements
//! - [`rto`]: RTT estimation
//! - [`congestion`]: congestion window
//! - [`state`]: link lifecycle
//! - [`config`]: tunables and presets
//! - [`output`]: datagram sink trait
//! - [`kcp`]: the control block
//! - [`socket`]: async UDP socket abstraction
//! - [`session`]: async event loop around one control block
//! - [`simulator`]: lossy/reorder network model for testing

pub mod ack;
pub mod config;
pub mod congestion;
pub mod kcp;
pub mod output;
pub mod receiver;
pub mod rto;
pub mod segment;
pub mod sender;
pub mod seq;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;

pub use config::KcpConfig;
pub use kcp::{Kcp, KcpError, RecvError};
pub use output::Output;
pub use state::LinkState;
