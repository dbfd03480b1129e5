//! Async owner that drives one control block over a UDP socket.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(msg) / recv()           SessionHandle
//!      │                               ┌─────────────────────┐
//!      └────────────────────────────▶  │  send_tx (channel)  │
//!                                      │  recv_rx (channel)  │
//!                                      └──────────┬──────────┘
//!                                                 │ event_loop task
//!  Kcp<VecDeque<Vec<u8>>>  ◀── send / input / update ──┤
//!      │ collected datagrams                      │
//!      ▼                                          │
//!  Socket (tokio UdpSocket, one peer) ◀───────────┘
//! ```
//!
//! The loop `select!`s over four branches: application messages, inbound
//! datagrams, a sleep until [`Kcp::check`] says an update is due, and room
//! in the application's receive channel.  After each branch the datagrams
//! the control block produced are written to the socket.  The session clock
//! is milliseconds since spawn, as `u32`.
//!
//! The loop never waits on the application.  Messages it has not read stay
//! in the control block's receive queue, which shrinks the advertised window
//! until the peer stops sending.  Acks, retransmissions and the peer's
//! traffic keep flowing in the meantime.
//!
//! Dropping the send side of the handle lets the loop deliver what is queued
//! in both directions; it flushes once more before exiting.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::config::KcpConfig;
use crate::kcp::{Kcp, KcpError};
use crate::segment::peek_conv;
use crate::seq::time_diff;
use crate::socket::{Socket, SocketError, MAX_DATAGRAM};

/// Capacity of the application channels.
const CHANNEL_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Kcp(#[from] KcpError),
    /// A segment reached the dead-link retransmission limit.
    #[error("peer unreachable: dead link")]
    DeadLink,
    /// The event loop has terminated.
    #[error("session closed")]
    Closed,
}

type Collector = VecDeque<Vec<u8>>;

/// Spawns the event loop for one conversation with one peer.
pub struct KcpSession;

impl KcpSession {
    /// Start driving conversation `conv` with `peer` over `socket`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        socket: Socket,
        peer: SocketAddr,
        conv: u32,
        config: &KcpConfig,
    ) -> Result<SessionHandle, SessionError> {
        let kcp = Kcp::with_config(conv, 0, Collector::new(), config)?;
        let (send_tx, send_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
        let (recv_tx, recv_rx) = mpsc::channel::<Result<Vec<u8>, SessionError>>(CHANNEL_DEPTH);

        log::debug!(
            "[session] conv={} {} ↔ {}",
            conv,
            socket.local_addr,
            peer
        );
        let handle = tokio::spawn(event_loop(socket, peer, kcp, send_rx, recv_tx));

        Ok(SessionHandle {
            send_tx,
            recv_rx,
            handle,
        })
    }
}

/// Application side of a running session.
pub struct SessionHandle {
    /// Messages for the peer.
    pub send_tx: mpsc::Sender<Vec<u8>>,
    /// Messages from the peer, or the error that ended the session.
    pub recv_rx: mpsc::Receiver<Result<Vec<u8>, SessionError>>,
    handle: JoinHandle<Result<(), SessionError>>,
}

impl SessionHandle {
    /// Queue a message for reliable delivery.
    pub async fn send(&self, data: Vec<u8>) -> Result<(), SessionError> {
        self.send_tx
            .send(data)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Receive the next complete message from the peer.
    pub async fn recv(&mut self) -> Result<Vec<u8>, SessionError> {
        self.recv_rx
            .recv()
            .await
            .unwrap_or(Err(SessionError::Closed))
    }

    /// Stop accepting messages, wait until queued data is acknowledged, and
    /// return the loop's final result.
    pub async fn close(self) -> Result<(), SessionError> {
        drop(self.send_tx);
        drop(self.recv_rx);
        self.handle.await.map_err(|_| SessionError::Closed)?
    }
}

fn now_ms(start: Instant) -> u32 {
    start.elapsed().as_millis() as u32
}

type AppTx = mpsc::Sender<Result<Vec<u8>, SessionError>>;

/// Move complete messages to the application while its channel has room.
///
/// Once the application has dropped its receiver, messages are drained and
/// discarded so the receive window stays open.
fn deliver(kcp: &mut Kcp<Collector>, app_tx: &AppTx, reading: &mut bool) {
    while kcp.peek_size().is_ok() {
        if !*reading {
            let _ = kcp.recv_vec();
            continue;
        }
        match app_tx.try_reserve() {
            Ok(permit) => match kcp.recv_vec() {
                Ok(message) => permit.send(Ok(message)),
                Err(_) => break,
            },
            Err(TrySendError::Full(())) => break,
            Err(TrySendError::Closed(())) => *reading = false,
        }
    }
}

/// Report `err` to the application if its channel has room.
fn report(app_tx: &AppTx, conv: u32, err: SessionError) {
    if let Err(TrySendError::Full(err)) = app_tx.try_send(Err(err)) {
        log::debug!("[session] conv={} receive channel full, dropped {:?}", conv, err);
    }
}

async fn event_loop(
    socket: Socket,
    peer: SocketAddr,
    mut kcp: Kcp<Collector>,
    mut app_rx: mpsc::Receiver<Vec<u8>>,
    app_tx: AppTx,
) -> Result<(), SessionError> {
    let start = Instant::now();
    let conv = kcp.conv();
    let mut app_open = true;
    let mut app_reading = true;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let now = now_ms(start);
        let wait = time_diff(kcp.check(now), now).max(0) as u64;
        let sleep = tokio::time::sleep(Duration::from_millis(wait));

        tokio::select! {
            // ── Branch 1: message from the application ─────────────────────
            maybe_data = app_rx.recv(), if app_open => {
                match maybe_data {
                    None => {
                        app_open = false;
                        log::debug!(
                            "[session] conv={} app closed, {} segment(s) pending",
                            conv,
                            kcp.waiting_to_send()
                        );
                    }
                    Some(data) => {
                        if let Err(e) = kcp.send(&data) {
                            log::warn!("[session] conv={} send rejected: {}", conv, e);
                            report(&app_tx, conv, e.into());
                        }
                    }
                }
            }

            // ── Branch 2: datagram from the network ─────────────────────────
            result = socket.recv_from(&mut buf) => {
                let (n, addr) = result?;
                let datagram = &buf[..n];
                if addr != peer {
                    log::debug!("[session] conv={} drop datagram from {}", conv, addr);
                    continue;
                }
                if peek_conv(datagram) != Some(conv) {
                    log::debug!("[session] conv={} drop datagram for another conv", conv);
                    continue;
                }
                kcp.update(now_ms(start));
                if let Err(e) = kcp.input(datagram) {
                    log::debug!("[session] conv={} bad datagram: {}", conv, e);
                }
                deliver(&mut kcp, &app_tx, &mut app_reading);
            }

            // ── Branch 3: update due ────────────────────────────────────────
            _ = sleep => {
                kcp.update(now_ms(start));
            }

            // ── Branch 4: the application made room for held messages ──────
            permit = app_tx.reserve(), if app_reading && kcp.peek_size().is_ok() => {
                match permit {
                    Ok(permit) => {
                        if let Ok(message) = kcp.recv_vec() {
                            permit.send(Ok(message));
                        }
                    }
                    Err(_) => app_reading = false,
                }
                deliver(&mut kcp, &app_tx, &mut app_reading);
            }
        }

        for datagram in kcp.output_mut().drain(..) {
            socket.send_to(&datagram, peer).await?;
        }

        if kcp.is_dead() {
            log::warn!("[session] conv={} dead link to {}", conv, peer);
            report(&app_tx, conv, SessionError::DeadLink);
            return Err(SessionError::DeadLink);
        }

        let held = app_reading && kcp.peek_size().is_ok();
        if !app_open && kcp.waiting_to_send() == 0 && !held {
            // Acks for the peer's last segments may still be pending.
            kcp.flush();
            for datagram in kcp.output_mut().drain(..) {
                socket.send_to(&datagram, peer).await?;
            }
            log::debug!("[session] conv={} drained, exiting", conv);
            return Ok(());
        }
    }
}
