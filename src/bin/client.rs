use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use tcp_chat::client::bus;
use tcp_chat::client::display::Display;
use tcp_chat::client::driver::Driver;
use tcp_chat::client::input::InputReader;
use tcp_chat::client::poller::poll_history;
use tcp_chat::client::terminal::{Crossterm, TerminalMode};
use tcp_chat::config::ClientConfig;
use tcp_chat::protocol::Request;

const USAGE: &str = "[USAGE]: ./client $IP $Port";

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "client", about = "TCP chat client")]
struct Args {
    /// Server IPv4 address
    ip: Ipv4Addr,
    /// Server port
    port: u16,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "off".into()))
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            println!("{}", USAGE);
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };
    let config = ClientConfig::new(args.ip, args.port);

    // Connect to server
    let stream = match tokio::time::timeout(config.dial_timeout, TcpStream::connect(config.server)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            println!("{}", e);
            std::process::exit(1);
        }
        Err(_) => {
            println!("connecting to {} timed out", config.server);
            std::process::exit(1);
        }
    };
    tracing::info!(server = %config.server, "connected");

    let (bus, bus_rx) = bus::channel(config.bus_capacity);
    let connected = Arc::new(AtomicBool::new(true));
    let display = Arc::new(Display::new(Terminal::new(CrosstermBackend::new(io::stdout()))?));

    let mut reader = InputReader::new(
        io::stdin(),
        Crossterm,
        display.clone(),
        bus.clone(),
        connected.clone(),
        config.max_line,
    );
    // The name frame goes on the bus before anything else.
    let reader = match tokio::task::spawn_blocking(move || reader.set_name().map(|()| reader)).await? {
        Ok(reader) => reader,
        Err(e) => shutdown(&display, Err(e)),
    };

    let quit_bus = bus.clone();
    tokio::spawn(poll_history(bus, connected.clone(), config.poll_interval));
    let driver = tokio::spawn(Driver::new(stream, bus_rx, display.clone(), connected).run());
    // Blocked on the terminal most of the time; exiting the process ends it.
    tokio::task::spawn_blocking(move || {
        if let Err(e) = reader.run() {
            tracing::error!(error = %e, "terminal input failed");
            quit_bus.enqueue_blocking(Request::quit()).ok();
        }
    });

    let result = driver.await?;
    shutdown(&display, result)
}

fn shutdown<B: ratatui::backend::Backend>(display: &Display<B>, result: Result<()>) -> ! {
    Crossterm.leave_raw().ok();
    display.restore().ok();
    match result {
        Ok(()) => {
            println!("Connection closed.");
            std::process::exit(0);
        }
        Err(e) => {
            println!("{:#}", e);
            std::process::exit(1);
        }
    }
}
