//! # Auction Events
//!
//! This crate turns the auction's raw update channel into typed event
//! streams for any number of independent consumers (the live web feed, the
//! chat bot, tests).
//!
//! ## Overview
//!
//! - **Event Types**: [`AuctionEvent`], one variant per state change, with
//!   the flat JSON wire codec used on the `auction-updates` channel
//! - **Event Bus**: [`EventBus`] opens one subscription per consumer and
//!   decodes messages in a dedicated delivery task
//! - **Subscription Registry**: every [`Subscription`] is released exactly
//!   once, and [`EventBus::close_all`] sweeps whatever is left on shutdown
//!
//! ## Features
//!
//! - `memory` (default): in-process pub/sub hub for single-process use and tests
//! - `redis`: Redis pub/sub message source
//!
//! ## Usage
//!
//! ```rust,no_run
//! use auction_events::{AuctionEvent, EventBus, MemoryPubSub};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let hub = MemoryPubSub::new();
//!     let bus = EventBus::new(Arc::new(hub.clone()));
//!
//!     let mut sub = bus.subscribe().await.unwrap();
//!     hub.publish("auction-updates", &AuctionEvent::open_item("lot-1").encode().unwrap())
//!         .await;
//!
//!     while let Some(event) = sub.recv().await {
//!         println!("{}: {}", event.kind(), event.item_id());
//!     }
//! }
//! ```
//!
//! ## Delivery Guarantees
//!
//! At-most-once, FIFO per subscription, no replay. Messages that fail to
//! decode are logged and skipped.

pub mod bus;
pub mod types;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

// Re-export main types
pub use bus::{
    EventBus, EventBusConfig, EventBusError, EventBusResult, EventBusStats, MessageSource,
    RawMessageStream, Subscription, DEFAULT_CHANNEL, DEFAULT_SUBSCRIBER_CAPACITY,
};
pub use types::{AuctionEvent, DecodeError, EVENT_KINDS};

#[cfg(feature = "memory")]
pub use memory::{MemoryPubSub, DEFAULT_RAW_CAPACITY};

#[cfg(feature = "redis")]
pub use redis::RedisMessageSource;
