//! In-memory key-value store.
//!
//! Suitable for single-process deployments and tests. Every operation runs
//! under one lock, and compound operations publish before releasing it, so
//! they are as indivisible as the Redis scripts they stand in for.

use super::{AppendOutcome, BidAppend, BidRemoval, KeyValueStore, StoreError, StoreResult};
use async_trait::async_trait;
use auction_events::{AuctionEvent, MemoryPubSub};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    strings: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
    lists: HashMap<String, Vec<String>>,
}

/// In-memory [`KeyValueStore`] publishing on a [`MemoryPubSub`] hub.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    hub: MemoryPubSub,
}

impl MemoryStore {
    /// Create an empty store with its own hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store publishing on an existing hub.
    pub fn with_hub(hub: MemoryPubSub) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            hub,
        }
    }

    /// Hub the store publishes on; hand it to an `EventBus` to observe updates.
    pub fn hub(&self) -> &MemoryPubSub {
        &self.hub
    }
}

/// Resolve Redis-style `LRANGE` bounds against a list of `len` entries.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn top_bid_cents(raw: &str) -> StoreResult<u64> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| value.get("bid").and_then(serde_json::Value::as_u64))
        .ok_or_else(|| StoreError::Script("corrupt top bid".to_string()))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.lock().await.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .sets
            .get(key)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let state = self.state.lock().await;
        Ok(keys.iter().map(|key| state.strings.get(key).cloned()).collect())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let state = self.state.lock().await;
        let Some(list) = state.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        let current = match state.strings.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                StoreError::Command("value is not an integer or out of range".to_string())
            })?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Command("increment or decrement would overflow".to_string()))?;
        state.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        self.hub.publish(channel, payload).await;
        Ok(())
    }

    async fn swap_closed_flag(&self, item_key: &str, closed: bool) -> StoreResult<Option<bool>> {
        let mut state = self.state.lock().await;
        let Some(raw) = state.strings.get(item_key) else {
            return Ok(None);
        };

        let mut item: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| StoreError::Script(format!("item {} is not JSON: {}", item_key, e)))?;
        let object = item
            .as_object_mut()
            .ok_or_else(|| StoreError::Script(format!("item {} is not an object", item_key)))?;

        let previous = object
            .get("closed")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        object.insert("closed".to_string(), serde_json::Value::Bool(closed));

        state.strings.insert(item_key.to_string(), item.to_string());
        Ok(Some(previous))
    }

    async fn append_bid(&self, append: BidAppend<'_>) -> StoreResult<AppendOutcome> {
        let mut state = self.state.lock().await;
        let list = state.lists.entry(append.bids_key.to_string()).or_default();

        if let Some(last) = list.last() {
            let previous_cents = top_bid_cents(last)?;
            if append.amount_cents < previous_cents.saturating_add(append.min_increment_cents) {
                return Ok(AppendOutcome::TooLow { previous_cents });
            }
        }

        list.push(append.bid_json.to_string());
        self.hub.publish(append.channel, append.event_json).await;
        Ok(AppendOutcome::Appended)
    }

    async fn remove_bid(&self, removal: BidRemoval<'_>) -> StoreResult<Option<String>> {
        let mut state = self.state.lock().await;
        let Some(list) = state.lists.get_mut(removal.bids_key) else {
            return Ok(None);
        };

        let found = list.iter().enumerate().find_map(|(index, raw)| {
            serde_json::from_str::<serde_json::Value>(raw)
                .ok()
                .filter(|info| {
                    info.get("id").and_then(serde_json::Value::as_str) == Some(removal.bid_id)
                })
                .map(|info| (index, info))
        });
        let Some((index, info)) = found else {
            return Ok(None);
        };

        let raw = list.remove(index);
        let text = |field: &str| {
            info.get(field)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let event = AuctionEvent::DeleteBid {
            item_id: removal.item_id.to_string(),
            bid_id: removal.bid_id.to_string(),
            bid_cents: info.get("bid").and_then(serde_json::Value::as_u64).unwrap_or(0),
            bidder_id: text("bidder"),
            bidder_display_name: text("bidderDisplayName"),
        }
        .encode()
        .map_err(|e| StoreError::Script(e.to_string()))?;
        self.hub.publish(removal.channel, &event).await;
        Ok(Some(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bid;
    use auction_events::MessageSource;
    use futures::StreamExt;

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, -1, -1), Some((4, 4)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 4)));
        assert_eq!(resolve_range(5, -10, -1), Some((0, 4)));
        assert_eq!(resolve_range(5, 1, 100), Some((1, 4)));
        assert_eq!(resolve_range(0, 0, -1), None);
        assert_eq!(resolve_range(3, 2, 1), None);
    }

    #[tokio::test]
    async fn test_string_and_set_commands() {
        let store = MemoryStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.set_add("s", "b").await.unwrap();
        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["a", "b"]);

        let values = store
            .get_many(&["k".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("v".to_string()), None]);
    }

    #[tokio::test]
    async fn test_incr_by() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("total", 500).await.unwrap(), 500);
        assert_eq!(store.incr_by("total", -200).await.unwrap(), 300);

        store.set("text", "abc").await.unwrap();
        assert!(matches!(
            store.incr_by("text", 1).await,
            Err(StoreError::Command(_))
        ));
    }

    #[tokio::test]
    async fn test_swap_closed_flag() {
        let store = MemoryStore::new();
        assert_eq!(store.swap_closed_flag("lot-1", true).await.unwrap(), None);

        store
            .set("lot-1", r#"{"title":"Plushie","closed":false}"#)
            .await
            .unwrap();
        assert_eq!(store.swap_closed_flag("lot-1", true).await.unwrap(), Some(false));
        assert_eq!(store.swap_closed_flag("lot-1", true).await.unwrap(), Some(true));

        let raw = store.get("lot-1").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["closed"], true);
        assert_eq!(value["title"], "Plushie");
    }

    #[tokio::test]
    async fn test_append_bid_enforces_increment() {
        let store = MemoryStore::new();
        let mut updates = store.hub().subscribe("updates").await.unwrap();

        let append = |amount: u64, json: &'static str| BidAppend {
            bids_key: "bids-lot-1",
            channel: "updates",
            amount_cents: amount,
            min_increment_cents: 100,
            bid_json: json,
            event_json: "event",
        };

        assert_eq!(
            store.append_bid(append(1, r#"{"bid":1,"id":"a"}"#)).await.unwrap(),
            AppendOutcome::Appended
        );
        assert_eq!(
            store.append_bid(append(100, r#"{"bid":100,"id":"b"}"#)).await.unwrap(),
            AppendOutcome::TooLow { previous_cents: 1 }
        );
        assert_eq!(
            store.append_bid(append(101, r#"{"bid":101,"id":"c"}"#)).await.unwrap(),
            AppendOutcome::Appended
        );

        assert_eq!(store.list_range("bids-lot-1", 0, -1).await.unwrap().len(), 2);
        assert_eq!(updates.next().await.as_deref(), Some("event"));
        assert_eq!(updates.next().await.as_deref(), Some("event"));
    }

    #[tokio::test]
    async fn test_remove_bid() {
        let store = MemoryStore::new();
        let first = Bid::new("lot-1", 1000, "u1", "A");
        let second = Bid::new("lot-1", 1200, "u2", "B");
        for bid in [&first, &second] {
            let json = serde_json::to_string(bid).unwrap();
            store
                .append_bid(BidAppend {
                    bids_key: "bids-lot-1",
                    channel: "updates",
                    amount_cents: bid.bid_cents,
                    min_increment_cents: 100,
                    bid_json: &json,
                    event_json: "event",
                })
                .await
                .unwrap();
        }

        let removal = BidRemoval {
            bids_key: "bids-lot-1",
            channel: "updates",
            item_id: "lot-1",
            bid_id: &first.id,
        };
        assert!(store.remove_bid(removal).await.unwrap().is_some());
        assert!(store.remove_bid(removal).await.unwrap().is_none());

        let remaining = store.list_range("bids-lot-1", 0, -1).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].contains(&second.id));
    }

    #[tokio::test]
    async fn test_remove_bid_matches_partial_entries_by_id() {
        let store = MemoryStore::new();
        let mut updates = store.hub().subscribe("updates").await.unwrap();
        store
            .append_bid(BidAppend {
                bids_key: "bids-lot-1",
                channel: "updates",
                amount_cents: 700,
                min_increment_cents: 100,
                bid_json: r#"{"bid":700,"id":"legacy-1"}"#,
                event_json: "event",
            })
            .await
            .unwrap();
        assert_eq!(updates.next().await.as_deref(), Some("event"));

        let removal = BidRemoval {
            bids_key: "bids-lot-1",
            channel: "updates",
            item_id: "lot-1",
            bid_id: "legacy-1",
        };
        assert!(store.remove_bid(removal).await.unwrap().is_some());
        assert!(store.list_range("bids-lot-1", 0, -1).await.unwrap().is_empty());

        let published = updates.next().await.unwrap();
        match AuctionEvent::decode(&published).unwrap() {
            AuctionEvent::DeleteBid { bid_id, bid_cents, bidder_id, .. } => {
                assert_eq!(bid_id, "legacy-1");
                assert_eq!(bid_cents, 700);
                assert_eq!(bidder_id, "");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
