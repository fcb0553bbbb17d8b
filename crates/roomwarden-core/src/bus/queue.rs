//! Async event bus on a bounded `tokio::sync::mpsc` channel.

use super::types::OccupancyEvent;
use tokio::sync::mpsc;

/// Connects the platform listener (producer) to the trigger handler
/// (consumer).
pub struct EventBus {
    tx: mpsc::Sender<OccupancyEvent>,
    rx: tokio::sync::Mutex<mpsc::Receiver<OccupancyEvent>>,
}

impl EventBus {
    /// Create a new bus with the given buffer capacity.
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        EventBus {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Publish an occupancy change.
    pub async fn publish(
        &self,
        event: OccupancyEvent,
    ) -> Result<(), mpsc::error::SendError<OccupancyEvent>> {
        self.tx.send(event).await
    }

    /// Consume the next event (blocks until available).
    /// Returns None if all senders are dropped.
    pub async fn consume(&self) -> Option<OccupancyEvent> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Get a clone of the sender (for listeners to use).
    pub fn sender(&self) -> mpsc::Sender<OccupancyEvent> {
        self.tx.clone()
    }
}
