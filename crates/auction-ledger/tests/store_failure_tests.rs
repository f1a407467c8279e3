//! Ledger behavior when individual store commands fail.
//!
//! [`FlakyStore`] wraps the memory store and can be told to reject
//! `INCRBY` or every read, which is how a Redis outage between the steps of
//! a close looks from the ledger's side.

use async_trait::async_trait;
use auction_events::{AuctionEvent, EventBus, MessageSource};
use auction_ledger::store::{AppendOutcome, BidAppend, BidRemoval};
use auction_ledger::{
    AuctionLedger, Item, KeyValueStore, LedgerConfig, LedgerError, MemoryStore, StoreError,
    StoreResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Memory store with switchable failures.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    fail_incr: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    fn check_reads(&self) -> StoreResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_reads()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value).await
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.inner.set_add(key, member).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check_reads()?;
        self.inner.set_members(key).await
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.check_reads()?;
        self.inner.get_many(keys).await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.check_reads()?;
        self.inner.list_range(key, start, stop).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        if self.fail_incr.load(Ordering::SeqCst) {
            return Err(StoreError::Command("READONLY replica".to_string()));
        }
        self.inner.incr_by(key, delta).await
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        self.inner.publish(channel, payload).await
    }

    async fn swap_closed_flag(&self, item_key: &str, closed: bool) -> StoreResult<Option<bool>> {
        self.inner.swap_closed_flag(item_key, closed).await
    }

    async fn append_bid(&self, append: BidAppend<'_>) -> StoreResult<AppendOutcome> {
        self.inner.append_bid(append).await
    }

    async fn remove_bid(&self, removal: BidRemoval<'_>) -> StoreResult<Option<String>> {
        self.inner.remove_bid(removal).await
    }
}

async fn setup() -> (AuctionLedger, Arc<FlakyStore>, EventBus) {
    let store = Arc::new(FlakyStore::default());
    let source: Arc<dyn MessageSource> = Arc::new(store.inner.hub().clone());
    let config = LedgerConfig::default();
    let bus = EventBus::with_config(source, config.event_bus_config());
    let ledger = AuctionLedger::new(store.clone(), config);

    ledger
        .save_item(&Item::new("item-a", "Signed plushie"))
        .await
        .unwrap();
    (ledger, store, bus)
}

#[tokio::test]
async fn test_close_survives_failed_increment() {
    let (ledger, store, bus) = setup().await;
    ledger.open_item("item-a").await.unwrap();
    let bid = ledger.bid(1200, "u1", "Pip").await.unwrap();

    let mut feed = bus.subscribe().await.unwrap();
    store.fail_incr.store(true, Ordering::SeqCst);

    let closed = ledger.close_item().await.unwrap();
    assert!(!closed.total_updated);
    assert_eq!(closed.winning_bid.as_ref(), Some(&bid));

    // The item is closed and the event still goes out.
    assert!(ledger.get_item("item-a").await.unwrap().closed);
    assert!(ledger.current_item().await.is_none());
    let event = tokio::time::timeout(Duration::from_secs(2), feed.recv())
        .await
        .unwrap();
    assert_eq!(event, Some(AuctionEvent::close_item("item-a")));

    // The total lags behind the closed items.
    assert_eq!(ledger.total_raised_cents().await, 0);
    assert_eq!(ledger.top_bid("item-a").await.unwrap(), Some(bid));
}

#[tokio::test]
async fn test_reopen_survives_failed_decrement() {
    let (ledger, store, _bus) = setup().await;
    ledger.open_item("item-a").await.unwrap();
    ledger.bid(1200, "u1", "Pip").await.unwrap();
    ledger.close_item().await.unwrap();
    assert_eq!(ledger.total_raised_cents().await, 1200);

    store.fail_incr.store(true, Ordering::SeqCst);
    ledger.open_item("item-a").await.unwrap();

    assert!(!ledger.get_item("item-a").await.unwrap().closed);
    assert_eq!(ledger.total_raised_cents().await, 1200);
}

#[tokio::test]
async fn test_read_failures() {
    let (ledger, store, _bus) = setup().await;
    ledger.open_item("item-a").await.unwrap();
    store.fail_reads.store(true, Ordering::SeqCst);

    // Queries that never fail degrade to their empty answers.
    assert_eq!(ledger.total_raised_cents().await, 0);
    assert!(ledger.current_item().await.is_none());

    // Everything else surfaces the store error.
    let err = ledger.bid(1000, "u1", "Pip").await.unwrap_err();
    assert!(err.is_server_error());
    assert!(matches!(err, LedgerError::Store(StoreError::Connection(_))));
    assert_eq!(err.user_message(), "Something went wrong, please try again.");

    assert!(matches!(ledger.get_items().await, Err(LedgerError::Store(_))));
    assert!(matches!(ledger.get_top_bids("item-a", 0).await, Err(LedgerError::Store(_))));
}
