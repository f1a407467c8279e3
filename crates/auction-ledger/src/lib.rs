//! # Auction Ledger
//!
//! Authoritative state of the live charity auction: which item is open, the
//! bids on every item, and the running total raised.
//!
//! ## Overview
//!
//! - **Model**: [`Item`] and [`Bid`], stored as JSON in a shared key-value store
//! - **Store**: the [`KeyValueStore`] seam, with compound operations that run
//!   atomically on the backend (Lua scripts on Redis, one lock in memory)
//! - **Ledger**: [`AuctionLedger`] opens and closes items, accepts and
//!   deletes bids, and answers state queries
//! - **Wiring**: [`Auction`] pairs a ledger with an [`auction_events::EventBus`]
//!   reading the same backend
//!
//! ## Rules
//!
//! - A bid is accepted only if it beats the current top bid by at least the
//!   configured increment; the first bid on an item always wins
//! - At most one item is open at a time
//! - Closing an item adds its top bid to the total; reopening it takes the
//!   bid back out
//!
//! ## Features
//!
//! - `memory` (default): in-process store and pub/sub hub
//! - `redis`: Redis store and pub/sub source
//!
//! ## Usage
//!
//! ```rust,no_run
//! use auction_ledger::{Auction, Item, LedgerConfig};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let auction = Auction::in_memory(LedgerConfig::from_env());
//!     let ledger = auction.ledger();
//!
//!     ledger.save_item(&Item::new("lot-1", "Signed print").with_start_bid(2500)).await?;
//!     ledger.open_item("lot-1").await?;
//!
//!     match ledger.bid(3000, "user-1", "Pip").await {
//!         Ok(bid) => println!("accepted {}", bid.id),
//!         Err(e) => println!("{}", e.user_message()),
//!     }
//!
//!     let closed = ledger.close_item().await?;
//!     println!("{:?} won, total {}", closed.winning_bid, ledger.total_raised_cents().await);
//!     Ok(())
//! }
//! ```

pub mod auction;
pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod store;

// Re-export main types
pub use auction::Auction;
pub use config::{ConfigError, LedgerConfig, DEFAULT_MIN_INCREMENT_CENTS};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{AuctionLedger, ClosedItem};
pub use model::{format_cents, Bid, Item};
pub use store::{KeyValueStore, StoreError, StoreResult};

#[cfg(feature = "memory")]
pub use store::memory::MemoryStore;

#[cfg(feature = "redis")]
pub use store::redis::RedisStore;
