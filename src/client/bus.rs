use tokio::sync::mpsc;

use crate::protocol::Request;

#[derive(Debug, thiserror::Error)]
#[error("message bus closed")]
pub struct BusClosed;

/// Producer side of the outbound queue. Cloned into every task that needs to
/// send something to the server; enqueueing waits while the queue is full.
#[derive(Clone)]
pub struct MessageBus {
    tx: mpsc::Sender<Request>,
}

/// The single consumer side, owned by the network driver.
pub struct BusReceiver {
    rx: mpsc::Receiver<Request>,
}

pub fn channel(capacity: usize) -> (MessageBus, BusReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (MessageBus { tx }, BusReceiver { rx })
}

impl MessageBus {
    pub async fn enqueue(&self, req: Request) -> Result<(), BusClosed> {
        self.tx.send(req).await.map_err(|_| BusClosed)
    }

    /// For producers running on a plain thread, such as the terminal reader.
    pub fn enqueue_blocking(&self, req: Request) -> Result<(), BusClosed> {
        self.tx.blocking_send(req).map_err(|_| BusClosed)
    }
}

impl BusReceiver {
    /// Waits for the next frame. `None` once every producer is gone.
    pub async fn dequeue(&mut self) -> Option<Request> {
        self.rx.recv().await
    }
}
