//! EventBus service: typed publish/subscribe over the fixed kind set.
//!
//! Subscribers register per kind and are invoked concurrently for each
//! emitted event. A subscriber failure is contained and logged; it
//! never reaches the publisher and never prevents other subscribers
//! from running. All subscribers complete before `emit` returns.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::models::{Event, EventKind};

/// A bus subscriber. Implementations are identified for unsubscription
/// by `Arc` pointer identity, so the same value registered twice is
/// invoked twice.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Name used in failure logs.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// In-process typed event fan-out.
///
/// No replay, no persistence, no backpressure; the event store is just
/// another subscriber (see `services::sinks`).
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventSubscriber>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for one kind. Duplicate registrations are
    /// allowed and will be invoked once per registration.
    pub async fn subscribe(&self, kind: EventKind, subscriber: Arc<dyn EventSubscriber>) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(kind).or_default().push(subscriber);
    }

    /// Register a subscriber for every kind.
    pub async fn subscribe_all(&self, subscriber: Arc<dyn EventSubscriber>) {
        for kind in EventKind::ALL {
            self.subscribe(kind, subscriber.clone()).await;
        }
    }

    /// Remove one registration of the given subscriber; succeeds
    /// silently when it was never registered.
    pub async fn unsubscribe(&self, kind: EventKind, subscriber: &Arc<dyn EventSubscriber>) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(registered) = subscribers.get_mut(&kind) {
            if let Some(pos) = registered
                .iter()
                .position(|s| Arc::ptr_eq(s, subscriber))
            {
                registered.remove(pos);
            }
        }
    }

    /// Invoke every subscriber registered for the event's kind.
    ///
    /// Subscribers run concurrently; failures are logged and swallowed.
    pub async fn emit(&self, event: &Event) {
        let targets: Vec<Arc<dyn EventSubscriber>> = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(&event.kind) {
                Some(registered) => registered.clone(),
                None => return,
            }
        };

        let results = join_all(targets.iter().map(|s| s.handle(event))).await;
        for (subscriber, result) in targets.iter().zip(results) {
            if let Err(error) = result {
                warn!(
                    subscriber = subscriber.name(),
                    kind = %event.kind,
                    %error,
                    "event subscriber failed"
                );
            }
        }
    }

    /// Number of registrations for a kind.
    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        let subscribers = self.subscribers.read().await;
        subscribers.get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber {
        name: String,
        seen: AtomicUsize,
    }

    impl CountingSubscriber {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl EventSubscriber for CountingSubscriber {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSubscriber;

    #[async_trait]
    impl EventSubscriber for FailingSubscriber {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("subscriber exploded")
        }
    }

    fn spawn_event() -> Event {
        Event::agent_spawned("mock-1", "mock", "task", "/ws", "proj")
    }

    #[tokio::test]
    async fn test_emit_reaches_matching_subscribers_only() {
        let bus = EventBus::new();
        let spawned = CountingSubscriber::new("spawned");
        let completed = CountingSubscriber::new("completed");

        bus.subscribe(EventKind::AgentSpawned, spawned.clone()).await;
        bus.subscribe(EventKind::AgentCompleted, completed.clone()).await;

        bus.emit(&spawn_event()).await;

        assert_eq!(spawned.seen.load(Ordering::SeqCst), 1);
        assert_eq!(completed.seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_invoked_twice() {
        let bus = EventBus::new();
        let subscriber = CountingSubscriber::new("dup");

        bus.subscribe(EventKind::AgentSpawned, subscriber.clone()).await;
        bus.subscribe(EventKind::AgentSpawned, subscriber.clone()).await;

        bus.emit(&spawn_event()).await;
        assert_eq!(subscriber.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_subscribers() {
        let bus = EventBus::new();
        let failing: Arc<dyn EventSubscriber> = Arc::new(FailingSubscriber);
        let counting = CountingSubscriber::new("ok");

        bus.subscribe(EventKind::AgentSpawned, failing).await;
        bus.subscribe(EventKind::AgentSpawned, counting.clone()).await;

        // Must not panic, and the healthy subscriber still runs.
        bus.emit(&spawn_event()).await;
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_silent_when_absent() {
        let bus = EventBus::new();
        let subscriber = CountingSubscriber::new("sub");
        let as_trait: Arc<dyn EventSubscriber> = subscriber.clone();

        bus.unsubscribe(EventKind::AgentSpawned, &as_trait).await;

        bus.subscribe(EventKind::AgentSpawned, subscriber.clone()).await;
        bus.unsubscribe(EventKind::AgentSpawned, &as_trait).await;
        assert_eq!(bus.subscriber_count(EventKind::AgentSpawned).await, 0);

        bus.emit(&spawn_event()).await;
        assert_eq!(subscriber.seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_subscribe_all_covers_every_kind() {
        let bus = EventBus::new();
        let subscriber = CountingSubscriber::new("all");
        bus.subscribe_all(subscriber.clone()).await;

        bus.emit(&spawn_event()).await;
        bus.emit(&Event::session_updated("ws", 1, 0.1, 1, "proj")).await;

        assert_eq!(subscriber.seen.load(Ordering::SeqCst), 2);
    }
}
