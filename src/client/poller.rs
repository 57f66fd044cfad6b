use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::bus::MessageBus;
use crate::protocol::Request;

/// Queues a `hist` request every `every` while the client is connected.
/// Polling is the only way other clients' messages reach this one.
pub async fn poll_history(bus: MessageBus, connected: Arc<AtomicBool>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !connected.load(Ordering::SeqCst) {
            break;
        }
        if bus.enqueue(Request::hist()).await.is_err() {
            break;
        }
    }
}
