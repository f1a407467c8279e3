//! Event bus implementation
//!
//! This module bridges a raw publish/subscribe channel into typed
//! [`AuctionEvent`] streams. Every call to [`EventBus::subscribe`] opens a
//! fresh subscription on the underlying [`MessageSource`] and spawns a
//! delivery task that decodes messages and pushes them into a queue owned by
//! that subscription alone.

use crate::types::AuctionEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default pub/sub channel carrying auction updates.
pub const DEFAULT_CHANNEL: &str = "auction-updates";

/// Default per-subscription queue capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Event bus error types.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Failed to subscribe
    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The bus has been shut down
    #[error("Event bus is closed")]
    Closed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Raw payloads of one pub/sub subscription, in delivery order.
pub type RawMessageStream = BoxStream<'static, String>;

/// A publish/subscribe channel provider.
///
/// Implementations must have the subscription established by the time
/// `subscribe` returns, so that every message published afterwards is seen.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Open a new, independent subscription to `channel`.
    async fn subscribe(&self, channel: &str) -> EventBusResult<RawMessageStream>;
}

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Pub/sub channel to listen on
    pub channel: String,
    /// Events buffered per subscription before its delivery task waits
    pub subscriber_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// Event bus statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBusStats {
    /// Events pushed into subscriber queues
    pub events_delivered: u64,
    /// Raw messages skipped because they did not decode
    pub messages_dropped: u64,
    /// Subscriptions not yet released
    pub active_subscriptions: usize,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

type Registry = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Fans the auction update channel out to independent subscribers.
///
/// Each subscription owns a bounded queue. When a subscriber stops reading
/// and its queue fills up, only that subscription's delivery task waits;
/// other subscriptions and publishers are unaffected.
pub struct EventBus {
    source: Arc<dyn MessageSource>,
    config: EventBusConfig,
    registry: Registry,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("active_subscriptions", &self.registry.lock().len())
            .finish()
    }
}

impl EventBus {
    /// Create a bus on the default channel.
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self::with_config(source, EventBusConfig::default())
    }

    /// Create a bus with a custom configuration.
    pub fn with_config(source: Arc<dyn MessageSource>, config: EventBusConfig) -> Self {
        Self {
            source,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Channel this bus listens on.
    pub fn channel(&self) -> &str {
        &self.config.channel
    }

    /// Open a new subscription.
    ///
    /// The subscription sees every event published after this call returns,
    /// and nothing published before it.
    pub async fn subscribe(&self) -> EventBusResult<Subscription> {
        if self.shutdown.is_cancelled() {
            return Err(EventBusError::Closed);
        }

        let raw = self.source.subscribe(&self.config.channel).await?;
        let id = uuid::Uuid::now_v7().to_string();
        let token = self.shutdown.child_token();
        let (tx, rx) = mpsc::channel(self.config.subscriber_capacity.max(1));

        self.registry.lock().insert(id.clone(), token.clone());

        tokio::spawn(delivery_loop(
            id.clone(),
            raw,
            tx,
            token.clone(),
            self.counters.clone(),
        ));

        tracing::info!(subscription_id = %id, channel = %self.config.channel, "Subscription opened");

        Ok(Subscription {
            id,
            receiver: rx,
            token,
            registry: self.registry.clone(),
            released: false,
        })
    }

    /// Release every outstanding subscription.
    ///
    /// Their streams terminate and later calls to [`subscribe`](Self::subscribe)
    /// fail with [`EventBusError::Closed`]. Returns how many subscriptions
    /// were still open.
    pub fn close_all(&self) -> usize {
        self.shutdown.cancel();
        let drained: Vec<(String, CancellationToken)> = self.registry.lock().drain().collect();
        for (_, token) in &drained {
            token.cancel();
        }
        tracing::info!(closed = drained.len(), "Closed all subscriptions");
        drained.len()
    }

    /// Get event bus statistics.
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_delivered: self.counters.delivered.load(Ordering::Relaxed),
            messages_dropped: self.counters.dropped.load(Ordering::Relaxed),
            active_subscriptions: self.registry.lock().len(),
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Decode loop of one subscription.
async fn delivery_loop(
    id: String,
    mut raw: RawMessageStream,
    tx: mpsc::Sender<AuctionEvent>,
    token: CancellationToken,
    counters: Arc<Counters>,
) {
    loop {
        let payload = tokio::select! {
            _ = token.cancelled() => break,
            next = raw.next() => match next {
                Some(payload) => payload,
                None => {
                    tracing::warn!(subscription_id = %id, "Pub/sub stream ended");
                    break;
                }
            },
        };

        let event = match AuctionEvent::decode(&payload) {
            Ok(event) => event,
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subscription_id = %id, error = %e, payload = %payload, "Dropping undecodable message");
                continue;
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            sent = tx.send(event) => {
                if sent.is_err() {
                    // Receiver gone.
                    break;
                }
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    tracing::debug!(subscription_id = %id, "Delivery task finished");
}

/// Handle to one subscription.
///
/// Events arrive in publish order. The handle is released exactly once,
/// either by [`close`](Self::close), by dropping it, or by
/// [`EventBus::close_all`]; after release the stream ends.
pub struct Subscription {
    id: String,
    receiver: mpsc::Receiver<AuctionEvent>,
    token: CancellationToken,
    registry: Registry,
    released: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("released", &self.released)
            .finish()
    }
}

impl Subscription {
    /// Subscription ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receive the next event, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<AuctionEvent> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            event = self.receiver.recv() => event,
        }
    }

    /// Whether the subscription has been released.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Release the subscription.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.token.cancel();
        self.receiver.close();
        if self.registry.lock().remove(&self.id).is_some() {
            tracing::info!(subscription_id = %self.id, "Subscription closed");
        }
    }
}

impl Stream for Subscription {
    type Item = AuctionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::memory::MemoryPubSub;
    use std::time::Duration;

    fn bus_on(hub: &MemoryPubSub, capacity: usize) -> EventBus {
        EventBus::with_config(
            Arc::new(hub.clone()),
            EventBusConfig {
                channel: DEFAULT_CHANNEL.to_string(),
                subscriber_capacity: capacity,
            },
        )
    }

    async fn publish(hub: &MemoryPubSub, event: &AuctionEvent) {
        hub.publish(DEFAULT_CHANNEL, &event.encode().unwrap()).await;
    }

    async fn next(sub: &mut Subscription) -> Option<AuctionEvent> {
        tokio::time::timeout(Duration::from_millis(500), sub.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let hub = MemoryPubSub::new();
        let bus = bus_on(&hub, 16);
        let mut sub = bus.subscribe().await.unwrap();

        publish(&hub, &AuctionEvent::open_item("lot-1")).await;

        assert_eq!(next(&mut sub).await, Some(AuctionEvent::open_item("lot-1")));
    }

    #[tokio::test]
    async fn test_undecodable_messages_are_skipped() {
        let hub = MemoryPubSub::new();
        let bus = bus_on(&hub, 16);
        let mut sub = bus.subscribe().await.unwrap();

        hub.publish(DEFAULT_CHANNEL, "garbage").await;
        hub.publish(DEFAULT_CHANNEL, r#"{"event":"unknown"}"#).await;
        publish(&hub, &AuctionEvent::close_item("lot-1")).await;

        assert_eq!(next(&mut sub).await, Some(AuctionEvent::close_item("lot-1")));
        assert_eq!(bus.stats().messages_dropped, 2);
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let hub = MemoryPubSub::new();
        let bus = bus_on(&hub, 64);
        let mut sub = bus.subscribe().await.unwrap();

        for i in 0..20 {
            publish(&hub, &AuctionEvent::open_item(format!("lot-{}", i))).await;
        }
        for i in 0..20 {
            assert_eq!(next(&mut sub).await, Some(AuctionEvent::open_item(format!("lot-{}", i))));
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_nothing_earlier() {
        let hub = MemoryPubSub::new();
        let bus = bus_on(&hub, 16);
        let mut early = bus.subscribe().await.unwrap();

        publish(&hub, &AuctionEvent::open_item("lot-1")).await;
        let mut late = bus.subscribe().await.unwrap();
        publish(&hub, &AuctionEvent::close_item("lot-1")).await;

        assert_eq!(next(&mut early).await, Some(AuctionEvent::open_item("lot-1")));
        assert_eq!(next(&mut early).await, Some(AuctionEvent::close_item("lot-1")));
        assert_eq!(next(&mut late).await, Some(AuctionEvent::close_item("lot-1")));
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let hub = MemoryPubSub::new();
        let bus = bus_on(&hub, 1);
        let _stalled = bus.subscribe().await.unwrap();
        let mut reader = bus.subscribe().await.unwrap();

        for i in 0..10 {
            publish(&hub, &AuctionEvent::open_item(format!("lot-{}", i))).await;
            assert_eq!(next(&mut reader).await, Some(AuctionEvent::open_item(format!("lot-{}", i))));
        }
    }

    #[tokio::test]
    async fn test_close_releases_registry_entry() {
        let hub = MemoryPubSub::new();
        let bus = bus_on(&hub, 16);
        let sub = bus.subscribe().await.unwrap();
        assert_eq!(bus.stats().active_subscriptions, 1);

        sub.close();
        assert_eq!(bus.stats().active_subscriptions, 0);

        let dropped = bus.subscribe().await.unwrap();
        drop(dropped);
        assert_eq!(bus.stats().active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_close_all_terminates_streams() {
        let hub = MemoryPubSub::new();
        let bus = bus_on(&hub, 16);
        let mut first = bus.subscribe().await.unwrap();
        let mut second = bus.subscribe().await.unwrap();

        assert_eq!(bus.close_all(), 2);
        assert_eq!(bus.stats().active_subscriptions, 0);
        assert!(first.is_closed());

        assert_eq!(first.recv().await, None);
        assert_eq!(second.next().await, None);
        assert!(matches!(bus.subscribe().await, Err(EventBusError::Closed)));
    }
}
