//! Entry point for `reliable-datagram`.
//!
//! Parses CLI arguments and dispatches into either an echo **server** or a
//! **client**.  All protocol work is delegated to the library; `main.rs` owns
//! only process setup (logging, argument parsing, task spawning).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reliable_datagram::{ConnError, Connection, ConnectionConfig, UdpTransport};

/// Reliable, connection-oriented messaging over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Per-attempt wait for a reply, in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    timeout_ms: u64,

    /// Retry budget for both sending and receiving.
    #[arg(long, global = true, default_value_t = 6)]
    max_tries: u32,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept connections and echo every message back.
    Server {
        /// Local address to listen on (a concrete IP, not 0.0.0.0).
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        bind: SocketAddr,
    },
    /// Connect, send each message, print each echo, then close.
    Client {
        /// Server address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        server: SocketAddr,

        /// Local address to bind; port 0 picks an ephemeral port.
        #[arg(short, long, default_value = "127.0.0.1:0")]
        bind: SocketAddr,

        /// Messages to send, in order.
        #[arg(required = true)]
        messages: Vec<String>,
    },
}

impl Cli {
    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_send_tries(self.max_tries)
            .with_max_receive_tries(self.max_tries)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.connection_config();

    match cli.mode {
        Mode::Server { bind } => run_server(bind, config).await,
        Mode::Client {
            server,
            bind,
            messages,
        } => run_client(server, bind, config, &messages).await,
    }
}

async fn run_server(bind: SocketAddr, config: ConnectionConfig) -> anyhow::Result<()> {
    let transport = UdpTransport::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    let mut listener = Connection::new(transport, config);
    log::info!("listening on {}", listener.local_addr());

    loop {
        match listener.accept().await {
            Ok(conn) => {
                tokio::spawn(echo(conn));
            }
            Err(ConnError::Transport(e)) => {
                return Err(e).context("listener transport failed");
            }
            Err(e) => log::warn!("accept failed: {e}"),
        }
    }
}

async fn echo(mut conn: Connection<UdpTransport>) {
    let peer = conn.remote_addr();
    loop {
        match conn.receive().await {
            Ok(message) => {
                if let Err(e) = conn.send(&message).await {
                    log::warn!("echo to {peer:?} failed: {e}");
                    break;
                }
            }
            Err(ConnError::PeerClosed) => break,
            Err(e) => {
                log::warn!("receive from {peer:?} failed: {e}");
                break;
            }
        }
    }
    if conn.state().is_closable() {
        if let Err(e) = conn.close().await {
            log::warn!("close with {peer:?} failed: {e}");
        }
    }
}

async fn run_client(
    server: SocketAddr,
    bind: SocketAddr,
    config: ConnectionConfig,
    messages: &[String],
) -> anyhow::Result<()> {
    let transport = UdpTransport::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    let mut conn = Connection::new(transport, config);
    conn.connect(server)
        .await
        .with_context(|| format!("connecting to {server}"))?;

    for message in messages {
        conn.send(message.as_bytes()).await.context("send")?;
        let echoed = conn.receive().await.context("receive echo")?;
        println!("{}", String::from_utf8_lossy(&echoed));
    }

    conn.close().await.context("close")?;
    Ok(())
}
