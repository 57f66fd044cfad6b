use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use tcp_chat::config::{self, ServerConfig};
use tcp_chat::server::Server;

const USAGE: &str = "[USAGE]: ./server $port";

#[derive(Parser)]
#[command(name = "server", about = "TCP chat server")]
struct Args {
    /// TCP port to listen on
    #[arg(default_value_t = config::DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(config::MIN_PORT as i64..))]
    port: u16,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(config::DEFAULT_HOST))]
    host: IpAddr,

    /// Append-only chat history file
    #[arg(long, default_value = config::DEFAULT_HISTORY_FILE)]
    history: PathBuf,

    /// Live connections at which accepting pauses
    #[arg(long, default_value_t = config::MAX_CONNECTIONS)]
    max_connections: usize,

    /// Seconds to pause accepting once the limit is reached
    #[arg(long, default_value_t = config::ACCEPT_COOLDOWN.as_secs())]
    cooldown_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tcp_chat=info,server=info".into()),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            println!("{}", USAGE);
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    let srv = Server::new(ServerConfig {
        addr: SocketAddr::new(args.host, args.port),
        history_path: args.history,
        max_connections: args.max_connections,
        cooldown: Duration::from_secs(args.cooldown_secs),
    });

    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutting down");
        std::process::exit(0);
    });

    let listener = match TcpListener::bind(srv.addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, "cannot bind {}", srv.addr());
            println!("{}", USAGE);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on port {}...", args.port);

    if let Err(e) = srv.serve(listener).await {
        eprintln!("[server] fatal: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
