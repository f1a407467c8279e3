//! Ledger and event bus wired to the same backend.

use crate::config::LedgerConfig;
use crate::ledger::AuctionLedger;
use crate::store::KeyValueStore;
use auction_events::{EventBus, EventBusResult, MessageSource, Subscription};
use std::sync::Arc;

/// A running auction: the ledger that writes state and the bus that
/// distributes its updates.
///
/// Consumers (the web feed, the chat bot) each call
/// [`subscribe`](Self::subscribe) once and get their own ordered stream.
///
/// # Example
///
/// ```rust
/// use auction_ledger::{Auction, Item, LedgerConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let auction = Auction::in_memory(LedgerConfig::default());
/// auction.ledger().save_item(&Item::new("lot-1", "Plushie")).await?;
///
/// let mut feed = auction.subscribe().await?;
/// auction.ledger().open_item("lot-1").await?;
///
/// let event = feed.recv().await;
/// assert_eq!(event.map(|e| e.kind()), Some("openItem"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Auction {
    ledger: AuctionLedger,
    events: EventBus,
}

impl Auction {
    /// Wire a ledger over `store` to a bus reading from `source`.
    ///
    /// `source` must deliver what `store` publishes.
    pub fn with_store(
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn MessageSource>,
        config: LedgerConfig,
    ) -> Self {
        let events = EventBus::with_config(source, config.event_bus_config());
        Self {
            ledger: AuctionLedger::new(store, config),
            events,
        }
    }

    /// Single-process auction backed by memory.
    #[cfg(feature = "memory")]
    pub fn in_memory(config: LedgerConfig) -> Self {
        let store = crate::store::memory::MemoryStore::new();
        let hub = store.hub().clone();
        Self::with_store(Arc::new(store), Arc::new(hub), config)
    }

    /// Connect to the Redis instance named in `config`.
    #[cfg(feature = "redis")]
    pub async fn connect(config: LedgerConfig) -> crate::error::LedgerResult<Self> {
        use crate::store::redis::RedisStore;
        use crate::store::StoreError;
        use auction_events::RedisMessageSource;

        config.validate()?;

        let store = RedisStore::connect(&config.redis_url).await?;
        let source = RedisMessageSource::new(&config.redis_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!(
            channel = %config.updates_channel,
            min_increment_cents = config.min_increment_cents,
            "Connected to auction store"
        );

        Ok(Self::with_store(Arc::new(store), Arc::new(source), config))
    }

    /// The ledger.
    pub fn ledger(&self) -> &AuctionLedger {
        &self.ledger
    }

    /// The event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Open a new update stream.
    pub async fn subscribe(&self) -> EventBusResult<Subscription> {
        self.events.subscribe().await
    }

    /// Release every update stream; returns how many were open.
    pub fn shutdown(&self) -> usize {
        self.events.close_all()
    }
}
