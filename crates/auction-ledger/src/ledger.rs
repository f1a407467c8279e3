//! Auction state transitions
//!
//! [`AuctionLedger`] is the only writer of auction state. Every transition is
//! composed from [`KeyValueStore`] calls; the bid check-and-append and the
//! bid removal are single atomic store operations that also publish their
//! event, so an event is never seen for a write that did not happen.
//!
//! Opening and closing are deliberately *not* single transactions. Closing
//! runs three independent steps (mark closed, clear `current-item`, add the
//! winning bid to `total-raised`); a failure in the last step is logged and
//! the close still succeeds. A crash between steps can leave the total out of
//! step with the closed items.

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::model::{Bid, Item};
use crate::store::{
    bids_key, AppendOutcome, BidAppend, BidRemoval, KeyValueStore, ALL_ITEMS_KEY,
    CURRENT_ITEM_KEY, TOTAL_RAISED_KEY,
};
use auction_events::AuctionEvent;
use std::sync::Arc;

/// Result of [`AuctionLedger::close_item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedItem {
    /// Item that was closed
    pub item_id: String,
    /// Top bid at closing time, if any
    pub winning_bid: Option<Bid>,
    /// Whether the winning bid is accounted for in `total-raised`
    pub total_updated: bool,
}

/// Authoritative auction state, kept in a shared key-value store.
#[derive(Clone)]
pub struct AuctionLedger {
    store: Arc<dyn KeyValueStore>,
    config: LedgerConfig,
}

impl std::fmt::Debug for AuctionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuctionLedger")
            .field("config", &self.config)
            .finish()
    }
}

impl AuctionLedger {
    /// Create a ledger over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    /// Ledger configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Store an item and register it in `all-items`.
    ///
    /// Used to seed and edit the catalogue. Overwrites any existing record,
    /// including its `closed` flag.
    pub async fn save_item(&self, item: &Item) -> LedgerResult<()> {
        if item.id.trim().is_empty() {
            return Err(LedgerError::InvalidItem("item id must not be empty".to_string()));
        }
        if is_reserved_key(&item.id) {
            return Err(LedgerError::InvalidItem(format!(
                "item id {:?} collides with a ledger key",
                item.id
            )));
        }

        let json =
            serde_json::to_string(item).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.store.set(&item.id, &json).await?;
        self.store.set_add(ALL_ITEMS_KEY, &item.id).await?;

        tracing::debug!(item_id = %item.id, "Item saved");
        Ok(())
    }

    /// Make `item_id` the current item.
    ///
    /// Reopening a closed item takes its winning bid back out of
    /// `total-raised`, so closing it again does not count it twice.
    pub async fn open_item(&self, item_id: &str) -> LedgerResult<()> {
        self.get_item(item_id).await?;

        if self.current_item_id().await?.as_deref() == Some(item_id) {
            return Err(LedgerError::AlreadyOpen(item_id.to_string()));
        }

        let was_closed = self
            .store
            .swap_closed_flag(item_id, false)
            .await?
            .ok_or_else(|| LedgerError::ItemNotFound(item_id.to_string()))?;

        if was_closed {
            self.adjust_total(item_id, -1).await;
        }

        self.store.set(CURRENT_ITEM_KEY, item_id).await?;
        self.publish(&AuctionEvent::open_item(item_id)).await?;

        tracing::info!(item_id = %item_id, reopened = was_closed, "Item opened");
        Ok(())
    }

    /// Close the current item.
    ///
    /// Fails with [`LedgerError::AlreadyClosed`] if the item was already
    /// closed; the total and the event stream are left untouched.
    pub async fn close_item(&self) -> LedgerResult<ClosedItem> {
        let item_id = self
            .current_item_id()
            .await?
            .ok_or(LedgerError::NoCurrentItem)?;

        let was_closed = self
            .store
            .swap_closed_flag(&item_id, true)
            .await?
            .ok_or_else(|| LedgerError::ItemNotFound(item_id.clone()))?;

        if was_closed {
            // Someone else closed it, or an earlier close stopped before
            // clearing `current-item`. The total already holds its bid.
            if self.current_item_id().await?.as_deref() == Some(item_id.as_str()) {
                self.store.set(CURRENT_ITEM_KEY, "").await?;
            }
            tracing::warn!(item_id = %item_id, "Close of an already closed item ignored");
            return Err(LedgerError::AlreadyClosed(item_id));
        }

        self.store.set(CURRENT_ITEM_KEY, "").await?;

        let (winning_bid, total_updated) = self.adjust_total(&item_id, 1).await;

        self.publish(&AuctionEvent::close_item(item_id.as_str())).await?;

        tracing::info!(
            item_id = %item_id,
            winning_cents = winning_bid.as_ref().map(|bid| bid.bid_cents).unwrap_or(0),
            total_updated = total_updated,
            "Item closed"
        );

        Ok(ClosedItem {
            item_id,
            winning_bid,
            total_updated,
        })
    }

    /// Place a bid on the current item.
    ///
    /// The top-bid check, the append and the `bid` event happen as one atomic
    /// store operation, so concurrent bidders are serialized by the store.
    pub async fn bid(
        &self,
        amount_cents: u64,
        bidder_id: &str,
        display_name: &str,
    ) -> LedgerResult<Bid> {
        let item_id = self
            .current_item_id()
            .await?
            .ok_or(LedgerError::NoCurrentItem)?;

        let bid = Bid::new(item_id.as_str(), amount_cents, bidder_id, display_name);
        let bid_json =
            serde_json::to_string(&bid).map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let event_json = bid
            .placed_event()
            .encode()
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        let key = bids_key(&item_id);

        let outcome = self
            .store
            .append_bid(BidAppend {
                bids_key: &key,
                channel: &self.config.updates_channel,
                amount_cents,
                min_increment_cents: self.config.min_increment_cents,
                bid_json: &bid_json,
                event_json: &event_json,
            })
            .await?;

        match outcome {
            AppendOutcome::Appended => {
                tracing::info!(
                    item_id = %item_id,
                    bid_id = %bid.id,
                    bid_cents = amount_cents,
                    bidder_id = %bidder_id,
                    "Bid accepted"
                );
                Ok(bid)
            }
            AppendOutcome::TooLow { previous_cents } => {
                let minimum_cents = previous_cents.saturating_add(self.config.min_increment_cents);
                tracing::debug!(
                    item_id = %item_id,
                    bid_cents = amount_cents,
                    minimum_cents = minimum_cents,
                    "Bid rejected"
                );
                Err(LedgerError::BidTooLow {
                    previous_cents,
                    minimum_cents,
                })
            }
        }
    }

    /// Remove a bid.
    ///
    /// `total-raised` is left alone even when the removed bid was the winning
    /// bid of a closed item.
    pub async fn delete_bid(&self, item_id: &str, bid_id: &str) -> LedgerResult<()> {
        let key = bids_key(item_id);
        let removed = self
            .store
            .remove_bid(BidRemoval {
                bids_key: &key,
                channel: &self.config.updates_channel,
                item_id,
                bid_id,
            })
            .await?;

        let Some(raw) = removed else {
            return Err(LedgerError::BidNotFound {
                item_id: item_id.to_string(),
                bid_id: bid_id.to_string(),
            });
        };

        let bid_cents = serde_json::from_str::<Bid>(&raw)
            .map(|bid| bid.bid_cents)
            .unwrap_or_default();
        tracing::info!(item_id = %item_id, bid_id = %bid_id, bid_cents = bid_cents, "Bid deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Load one item.
    pub async fn get_item(&self, item_id: &str) -> LedgerResult<Item> {
        let raw = self
            .store
            .get(item_id)
            .await?
            .ok_or_else(|| LedgerError::ItemNotFound(item_id.to_string()))?;

        let mut item: Item = serde_json::from_str(&raw).map_err(|e| {
            tracing::debug!(item_id = %item_id, error = %e, "Stored item does not decode");
            LedgerError::ItemNotFound(item_id.to_string())
        })?;
        item.id = item_id.to_string();
        Ok(item)
    }

    /// Load every known item.
    ///
    /// Records that are missing or do not decode are skipped.
    pub async fn get_items(&self) -> LedgerResult<Vec<Item>> {
        let ids = self.store.set_members(ALL_ITEMS_KEY).await?;
        let blobs = self.store.get_many(&ids).await?;

        Ok(ids
            .into_iter()
            .zip(blobs)
            .filter_map(|(id, blob)| {
                let mut item: Item = match serde_json::from_str(blob.as_deref()?) {
                    Ok(item) => item,
                    Err(e) => {
                        tracing::debug!(item_id = %id, error = %e, "Skipping undecodable item");
                        return None;
                    }
                };
                item.id = id;
                Some(item)
            })
            .collect())
    }

    /// The `count` most recent bids on an item, oldest first; `0` means all.
    ///
    /// The last element, when present, is the top bid. Entries that do not
    /// decode are skipped.
    pub async fn get_top_bids(&self, item_id: &str, count: usize) -> LedgerResult<Vec<Bid>> {
        let start = if count == 0 {
            0
        } else {
            -(isize::try_from(count).unwrap_or(isize::MAX))
        };
        let raw = self.store.list_range(&bids_key(item_id), start, -1).await?;

        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str::<Bid>(entry) {
                Ok(bid) => Some(bid),
                Err(e) => {
                    tracing::debug!(item_id = %item_id, error = %e, "Skipping undecodable bid");
                    None
                }
            })
            .collect())
    }

    /// The current top bid on an item.
    pub async fn top_bid(&self, item_id: &str) -> LedgerResult<Option<Bid>> {
        Ok(self.get_top_bids(item_id, 1).await?.pop())
    }

    /// Running total of closed items' winning bids; `0` if unset or unreadable.
    pub async fn total_raised_cents(&self) -> i64 {
        match self.store.get(TOTAL_RAISED_KEY).await {
            Ok(Some(raw)) => raw.trim().parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read total raised");
                0
            }
        }
    }

    /// The item currently open for bidding.
    ///
    /// `None` both when nothing is open and when the open item cannot be
    /// loaded.
    pub async fn current_item(&self) -> Option<Item> {
        let item_id = match self.current_item_id().await {
            Ok(Some(item_id)) => item_id,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read current item");
                return None;
            }
        };
        self.get_item(&item_id).await.ok()
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn current_item_id(&self) -> LedgerResult<Option<String>> {
        Ok(self
            .store
            .get(CURRENT_ITEM_KEY)
            .await?
            .filter(|item_id| !item_id.is_empty()))
    }

    async fn publish(&self, event: &AuctionEvent) -> LedgerResult<()> {
        let payload = event
            .encode()
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        self.store
            .publish(&self.config.updates_channel, &payload)
            .await?;
        Ok(())
    }

    /// Add (`sign = 1`) or remove (`sign = -1`) the item's top bid from
    /// `total-raised`.
    ///
    /// Returns the top bid, if it could be read, and whether the total now
    /// reflects it. Failures are logged; the surrounding open or close goes
    /// ahead regardless.
    async fn adjust_total(&self, item_id: &str, sign: i64) -> (Option<Bid>, bool) {
        let top = match self.top_bid(item_id).await {
            Ok(top) => top,
            Err(e) => {
                tracing::warn!(item_id = %item_id, error = %e, "Could not read top bid for total");
                return (None, false);
            }
        };

        let Some(bid) = top else {
            return (None, true);
        };

        let delta = i64::try_from(bid.bid_cents).unwrap_or(i64::MAX).saturating_mul(sign);
        match self.store.incr_by(TOTAL_RAISED_KEY, delta).await {
            Ok(total) => {
                tracing::debug!(item_id = %item_id, delta = delta, total = total, "Total raised adjusted");
                (Some(bid), true)
            }
            Err(e) => {
                tracing::warn!(item_id = %item_id, delta = delta, error = %e, "Could not adjust total raised");
                (Some(bid), false)
            }
        }
    }
}

fn is_reserved_key(item_id: &str) -> bool {
    item_id == CURRENT_ITEM_KEY
        || item_id == ALL_ITEMS_KEY
        || item_id == TOTAL_RAISED_KEY
        || item_id.starts_with("bids-")
}
