use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use ratatui::backend::Backend;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::bus::BusReceiver;
use super::display::Display;
use crate::protocol::{read_response, FrameKind};

/// The only task that touches the connection. It sends one frame at a time
/// and waits for that frame's response before taking the next one off the bus.
pub struct Driver<S, B: Backend> {
    conn: BufReader<S>,
    bus: BusReceiver,
    display: Arc<Display<B>>,
    connected: Arc<AtomicBool>,
}

impl<S, B> Driver<S, B>
where
    S: AsyncRead + AsyncWrite + Unpin,
    B: Backend,
{
    pub fn new(
        conn: S,
        bus: BusReceiver,
        display: Arc<Display<B>>,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            conn: BufReader::new(conn),
            bus,
            display,
            connected,
        }
    }

    /// Runs until a `quit` frame has been sent, the bus closes, or the
    /// connection fails. Clears the connected flag on the way out.
    pub async fn run(mut self) -> Result<()> {
        let result = self.pump().await;
        self.connected.store(false, Ordering::SeqCst);
        self.conn.get_mut().shutdown().await.ok();
        result
    }

    async fn pump(&mut self) -> Result<()> {
        while self.connected.load(Ordering::SeqCst) {
            let Some(req) = self.bus.dequeue().await else {
                break;
            };

            let conn = self.conn.get_mut();
            conn.write_all(&req.encode())
                .await
                .context("sending to server")?;
            conn.flush().await.context("sending to server")?;

            if req.kind == FrameKind::Quit {
                break;
            }

            let response = read_response(&mut self.conn)
                .await
                .context("reading server response")?;
            // a lone zero byte is an ack; anything else is a history blob
            if !response.is_empty() {
                self.display.update_history(response)?;
            }
        }
        Ok(())
    }
}
