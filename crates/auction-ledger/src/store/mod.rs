//! Key-value store seam.
//!
//! The ledger talks to its backing store only through [`KeyValueStore`]. Plain
//! commands map one-to-one onto Redis commands; the three compound operations
//! (`swap_closed_flag`, `append_bid`, `remove_bid`) must each execute as one
//! indivisible unit, which the Redis backend does with Lua scripts and the
//! in-memory backend does under a single lock.
//!
//! ## Key layout
//!
//! | Key | Type | Meaning |
//! |---|---|---|
//! | `current-item` | string | id of the open item, or empty |
//! | `all-items` | set | ids of every known item |
//! | `<itemId>` | string | item JSON |
//! | `bids-<itemId>` | list | bid JSON, oldest first |
//! | `total-raised` | string | running total in cents |

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

/// Id of the currently open item.
pub const CURRENT_ITEM_KEY: &str = "current-item";

/// Set of every known item id.
pub const ALL_ITEMS_KEY: &str = "all-items";

/// Running total of closed items' winning bids.
pub const TOTAL_RAISED_KEY: &str = "total-raised";

/// List key holding an item's bids.
pub fn bids_key(item_id: &str) -> String {
    format!("bids-{}", item_id)
}

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the store
    #[error("Connection error: {0}")]
    Connection(String),

    /// A command was rejected
    #[error("Command failed: {0}")]
    Command(String),

    /// An atomic script failed
    #[error("Script failed: {0}")]
    Script(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Arguments of [`KeyValueStore::append_bid`].
#[derive(Debug, Clone, Copy)]
pub struct BidAppend<'a> {
    /// Bid list to append to
    pub bids_key: &'a str,
    /// Channel the event is published on
    pub channel: &'a str,
    /// Amount being bid
    pub amount_cents: u64,
    /// Required gap over the current top bid
    pub min_increment_cents: u64,
    /// Serialized bid to append
    pub bid_json: &'a str,
    /// Serialized event to publish on success
    pub event_json: &'a str,
}

/// Result of [`KeyValueStore::append_bid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The bid was stored and its event published
    Appended,
    /// The bid did not clear the current top bid by the minimum increment
    TooLow {
        /// Amount of the current top bid
        previous_cents: u64,
    },
}

/// Arguments of [`KeyValueStore::remove_bid`].
#[derive(Debug, Clone, Copy)]
pub struct BidRemoval<'a> {
    /// Bid list to search
    pub bids_key: &'a str,
    /// Channel the event is published on
    pub channel: &'a str,
    /// Item the bids belong to
    pub item_id: &'a str,
    /// Bid to remove
    pub bid_id: &'a str,
}

/// Shared key-value store with atomic compound operations and pub/sub.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// `GET`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SET`
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// `SADD` of a single member
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    /// `SMEMBERS`
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// `MGET`; one entry per key, `None` where the key is missing.
    async fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// `LRANGE` with Redis index semantics (negative indexes count from the end).
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    /// `INCRBY`; returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// `PUBLISH`; fire-and-forget from the caller's point of view.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;

    /// Atomically set the `closed` field of the JSON object at `item_key`.
    ///
    /// Returns the previous value, or `None` if the key does not exist.
    async fn swap_closed_flag(&self, item_key: &str, closed: bool) -> StoreResult<Option<bool>>;

    /// Atomically compare against the top bid, append, and publish.
    ///
    /// If the list is non-empty and `amount < top + increment` nothing is
    /// written or published.
    async fn append_bid(&self, append: BidAppend<'_>) -> StoreResult<AppendOutcome>;

    /// Atomically remove the first bid whose `id` matches and publish a
    /// `deleteBid` event built from it.
    ///
    /// Returns the removed entry, or `None` (and publishes nothing) if no bid
    /// matched.
    async fn remove_bid(&self, removal: BidRemoval<'_>) -> StoreResult<Option<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bids_key() {
        assert_eq!(bids_key("lot-7"), "bids-lot-7");
    }
}
