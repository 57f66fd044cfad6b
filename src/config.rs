use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: Ipv4Addr = Ipv4Addr::UNSPECIFIED;
pub const DEFAULT_PORT: u16 = 8989;
pub const MIN_PORT: u16 = 1000;
pub const DEFAULT_HISTORY_FILE: &str = "history.txt";
pub const MAX_CONNECTIONS: usize = 10;
pub const ACCEPT_COOLDOWN: Duration = Duration::from_secs(5);

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const BUS_CAPACITY: usize = 1024;
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_LINE: usize = 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub history_path: PathBuf,
    /// Live sessions at which the acceptor stops listening.
    pub max_connections: usize,
    /// How long the acceptor pauses before re-checking the live count.
    pub cooldown: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(DEFAULT_HOST), DEFAULT_PORT),
            history_path: PathBuf::from(DEFAULT_HISTORY_FILE),
            max_connections: MAX_CONNECTIONS,
            cooldown: ACCEPT_COOLDOWN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    pub dial_timeout: Duration,
    pub bus_capacity: usize,
    pub poll_interval: Duration,
    pub max_line: usize,
}

impl ClientConfig {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self {
            server: SocketAddr::new(IpAddr::V4(ip), port),
            dial_timeout: DIAL_TIMEOUT,
            bus_capacity: BUS_CAPACITY,
            poll_interval: POLL_INTERVAL,
            max_line: MAX_LINE,
        }
    }
}
