pub mod registry;
pub mod session;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::store::HistoryStore;
use registry::Registry;
use session::Session;

// ─── Shared state ──────────────────────────────────────────────────────────

/// Everything the sessions share. The registry and the live counter sit
/// behind one lock; the history store carries its own.
pub struct ServerState {
    pub history: HistoryStore,
    pub registry: Mutex<Registry>,
}

impl ServerState {
    pub fn new(history_path: impl AsRef<Path>) -> Self {
        Self {
            history: HistoryStore::new(history_path),
            registry: Mutex::new(Registry::new()),
        }
    }

    pub async fn live(&self) -> usize {
        self.registry.lock().await.live()
    }
}

// ─── Acceptor ──────────────────────────────────────────────────────────────

pub struct Server {
    state: Arc<ServerState>,
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(ServerState::new(&config.history_path)),
            config,
        })
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Runs the accept loop on an already bound listener.
    ///
    /// Once `max_connections` sessions are live the listener is closed, so
    /// further connection attempts are refused by the OS, and the loop sleeps
    /// for the cool-down before checking again. It rebinds the same address as
    /// soon as there is room. Returns only on accept/bind failure or when a
    /// session reports a history failure.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let addr: SocketAddr = listener.local_addr()?;
        let mut listener = Some(listener);
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<anyhow::Error>(1);

        loop {
            if self.state.live().await >= self.config.max_connections {
                if listener.take().is_some() {
                    info!(
                        max = self.config.max_connections,
                        "connection limit reached, no longer accepting"
                    );
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.cooldown) => continue,
                    Some(e) = fatal_rx.recv() => return Err(e),
                }
            }

            if listener.is_none() {
                let reopened = TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("rebinding {}", addr))?;
                info!(%addr, "accepting connections again");
                listener = Some(reopened);
            }
            let Some(active) = listener.as_ref() else {
                continue;
            };

            tokio::select! {
                accepted = active.accept() => {
                    let (conn, peer) = accepted.context("accepting connection")?;
                    let (id, live) = {
                        let mut registry = self.state.registry.lock().await;
                        let id = registry.admit();
                        (id, registry.live())
                    };
                    info!(session = id, %peer, live, "client connected");

                    let state = self.state.clone();
                    let fatal = fatal_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = Session::new(id, conn, state).run().await {
                            error!(session = id, error = %e, "history store failure");
                            fatal.send(e).await.ok();
                        }
                    });
                }
                Some(e) = fatal_rx.recv() => return Err(e),
            }
        }
    }
}
