//! Standard bus subscribers: event-store persistence and websocket
//! broadcast.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::event_bus::EventSubscriber;
use super::event_store::EventStore;
use crate::domain::models::Event;

/// Persists every event it sees to the event store.
pub struct StoreSink {
    store: Arc<dyn EventStore>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventSubscriber for StoreSink {
    fn name(&self) -> &str {
        "event-store"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.store.append(event).await?;
        Ok(())
    }
}

/// Bridges bus events into a broadcast channel consumed by websocket
/// connections. Lagging or absent receivers are not an error.
pub struct BroadcastSink {
    sender: broadcast::Sender<Event>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn sender(&self) -> broadcast::Sender<Event> {
        self.sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventSubscriber for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        // send only fails when there are no receivers, which is fine.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}
