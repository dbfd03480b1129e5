//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves
//! whole datagrams.  Framing, acknowledgement and retransmission all live in
//! the control block; this module owns only byte I/O.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Receive buffer size; any datagram the control block emits fits.
pub const MAX_DATAGRAM: usize = 65_535;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (after the OS assigns a port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send `datagram` to `dest` as a single UDP datagram.
    pub async fn send_to(&self, datagram: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(datagram, dest).await?;
        Ok(())
    }

    /// Receive the next datagram into `buf` and return its length and the
    /// address it came from.
    ///
    /// The caller owns `buf` and reuses it across calls.  A datagram longer
    /// than `buf` is truncated; size it to [`MAX_DATAGRAM`].
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        let (n, addr) = self.inner.recv_from(buf).await?;
        Ok((n, addr))
    }

    /// Wait for a datagram and return its source without consuming it.
    pub async fn peek_sender(&self) -> Result<SocketAddr, SocketError> {
        let mut buf = [0u8; 1];
        let (_, addr) = self.inner.peek_from(&mut buf).await?;
        Ok(addr)
    }
}
