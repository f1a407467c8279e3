//! In-process publish/subscribe hub.
//!
//! Mirrors the delivery contract of a Redis pub/sub channel for single-process
//! deployments and tests: messages go to every subscriber registered at
//! publish time, in publish order, and publishing never waits on a reader.
//!
//! Each subscriber's raw queue is bounded. A subscriber whose queue is full
//! misses the message, much as Redis cuts off a client that overruns its
//! pub/sub output buffer.

use crate::bus::{EventBusResult, MessageSource, RawMessageStream};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

/// Default number of undelivered messages held per raw subscriber.
pub const DEFAULT_RAW_CAPACITY: usize = 4096;

/// Cloneable handle to a shared in-memory pub/sub hub.
#[derive(Clone)]
pub struct MemoryPubSub {
    channels: Arc<RwLock<HashMap<String, Vec<mpsc::Sender<String>>>>>,
    capacity: usize,
    overflowed: Arc<AtomicU64>,
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RAW_CAPACITY)
    }
}

impl std::fmt::Debug for MemoryPubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPubSub").finish_non_exhaustive()
    }
}

impl MemoryPubSub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty hub holding at most `capacity` undelivered messages
    /// per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            overflowed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Messages not delivered because a subscriber's queue was full.
    pub fn overflowed(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Publish `payload` on `channel`.
    ///
    /// Returns the number of subscribers that received it. Subscribers whose
    /// stream has been dropped are pruned here; subscribers whose queue is
    /// full skip this message.
    pub async fn publish(&self, channel: &str, payload: &str) -> usize {
        let mut channels = self.channels.write().await;
        let Some(senders) = channels.get_mut(channel) else {
            return 0;
        };

        let mut delivered = 0;
        senders.retain(|tx| match tx.try_send(payload.to_string()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.overflowed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(channel = %channel, "Subscriber queue full, dropping message");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Number of live subscribers on `channel`.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageSource for MemoryPubSub {
    async fn subscribe(&self, channel: &str) -> EventBusResult<RawMessageStream> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        });
        Ok(stream.boxed())
    }
}
