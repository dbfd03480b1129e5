//! Entry point for `kcp-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** (echo) or
//! **client** mode.  All protocol work is delegated to library modules;
//! `main.rs` owns only process setup (logging, argument parsing).

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use kcp_over_udp::config::KcpConfig;
use kcp_over_udp::session::KcpSession;
use kcp_over_udp::socket::Socket;

/// Reliable, ordered message delivery over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Echo every message from the first peer that talks to us.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        #[command(flatten)]
        tune: Tuning,
    },
    /// Send messages to a server and print the echoes.
    Client {
        /// Remote server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Number of messages to send.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        /// Message payload.
        #[arg(short, long, default_value = "hello")]
        message: String,
        #[command(flatten)]
        tune: Tuning,
    },
}

#[derive(Args)]
struct Tuning {
    /// Conversation id; both ends must agree.
    #[arg(long, default_value_t = 1)]
    conv: u32,
    /// Low-latency profile (nodelay, 10ms interval, fast resend, no cwnd).
    #[arg(long)]
    fast: bool,
    #[arg(long)]
    mtu: Option<usize>,
    #[arg(long)]
    snd_wnd: Option<u32>,
    #[arg(long)]
    rcv_wnd: Option<u32>,
    /// Flush interval in milliseconds.
    #[arg(long)]
    interval: Option<u32>,
}

impl Tuning {
    fn config(&self) -> KcpConfig {
        let mut config = if self.fast {
            KcpConfig::fast()
        } else {
            KcpConfig::normal()
        };
        if let Some(mtu) = self.mtu {
            config.mtu = mtu;
        }
        if let Some(snd_wnd) = self.snd_wnd {
            config.snd_wnd = snd_wnd;
        }
        if let Some(rcv_wnd) = self.rcv_wnd {
            config.rcv_wnd = rcv_wnd;
        }
        if let Some(interval) = self.interval {
            config.interval = interval;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server { bind, tune } => run_server(bind, &tune).await,
        Mode::Client {
            server,
            bind,
            count,
            message,
            tune,
        } => run_client(server, bind, count, &message, &tune).await,
    }
}

async fn run_server(bind: SocketAddr, tune: &Tuning) -> Result<()> {
    let socket = Socket::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    log::info!("Listening on {}", socket.local_addr);

    let peer = socket.peek_sender().await?;
    log::info!("Serving conv={} for {}", tune.conv, peer);

    let mut session = KcpSession::spawn(socket, peer, tune.conv, &tune.config())?;
    loop {
        let message = session.recv().await?;
        log::debug!("echo {} bytes", message.len());
        session.send(message).await?;
    }
}

async fn run_client(
    server: SocketAddr,
    bind: SocketAddr,
    count: usize,
    message: &str,
    tune: &Tuning,
) -> Result<()> {
    let socket = Socket::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    log::info!("Starting client on {}, server {}", socket.local_addr, server);

    let mut session = KcpSession::spawn(socket, server, tune.conv, &tune.config())?;
    for i in 0..count {
        session.send(format!("{message} {i}").into_bytes()).await?;
    }
    for _ in 0..count {
        let reply = session.recv().await?;
        println!("{}", String::from_utf8_lossy(&reply));
    }
    session.close().await?;
    Ok(())
}
