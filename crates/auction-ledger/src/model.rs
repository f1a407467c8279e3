//! Auction lots and bids
//!
//! Both types are stored as JSON strings in the key-value store, so their
//! serde field names are part of the storage format:
//!
//! ```text
//! <itemId>       {"id":"lot-7","title":"…","description":"…","images":["…"],"startBid":2500,
//!                 "closed":false,"donator":"…","country":"…"}
//! bids-<itemId>  [{"bid":1000,"bidder":"u1","bidderDisplayName":"Pip","id":"…","itemId":"lot-7"}, …]
//! ```

use auction_events::AuctionEvent;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// An auctionable lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Externally assigned unique id; also the item's storage key
    #[serde(default)]
    pub id: String,

    /// Display title
    #[serde(default)]
    pub title: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Image URLs, first one is the cover
    #[serde(default, deserialize_with = "images_from_json")]
    pub images: Vec<String>,

    /// Suggested opening bid in cents
    #[serde(rename = "startBid", default)]
    pub start_bid_cents: u64,

    /// Whether bidding on this item has been closed
    #[serde(default)]
    pub closed: bool,

    /// Who donated the item
    #[serde(default)]
    pub donator: String,

    /// Donator's country
    #[serde(default)]
    pub country: String,
}

impl Item {
    /// Create an open item with the given id and title.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            images: Vec::new(),
            start_bid_cents: 0,
            closed: false,
            donator: String::new(),
            country: String::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append an image URL.
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.images.push(url.into());
        self
    }

    /// Set the opening bid.
    pub fn with_start_bid(mut self, cents: u64) -> Self {
        self.start_bid_cents = cents;
        self
    }

    /// Set the donator and their country.
    pub fn with_donator(mut self, donator: impl Into<String>, country: impl Into<String>) -> Self {
        self.donator = donator.into();
        self.country = country.into();
        self
    }

    /// First image, if any.
    pub fn cover_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}

// The closed-flag script re-encodes items with Lua's cjson, which writes an
// empty array as `{}`.
fn images_from_json<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Images {
        List(Vec<String>),
        Object(serde::de::IgnoredAny),
    }

    Ok(match Option::<Images>::deserialize(deserializer)? {
        Some(Images::List(images)) => images,
        Some(Images::Object(_)) | None => Vec::new(),
    })
}

/// An accepted offer on an item. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    /// Amount in cents
    #[serde(rename = "bid")]
    pub bid_cents: u64,

    /// Opaque bidder id (e.g. a chat user id)
    #[serde(rename = "bidder")]
    pub bidder_id: String,

    /// Name shown to other bidders
    #[serde(rename = "bidderDisplayName")]
    pub bidder_display_name: String,

    /// Unique bid id
    pub id: String,

    /// Item the bid was placed on
    #[serde(rename = "itemId")]
    pub item_id: String,
}

impl Bid {
    /// Create a bid with a fresh id.
    pub fn new(
        item_id: impl Into<String>,
        bid_cents: u64,
        bidder_id: impl Into<String>,
        bidder_display_name: impl Into<String>,
    ) -> Self {
        Self {
            bid_cents,
            bidder_id: bidder_id.into(),
            bidder_display_name: bidder_display_name.into(),
            id: Uuid::now_v7().to_string(),
            item_id: item_id.into(),
        }
    }

    /// Event announcing this bid.
    pub fn placed_event(&self) -> AuctionEvent {
        AuctionEvent::Bid {
            item_id: self.item_id.clone(),
            bid_id: self.id.clone(),
            bid_cents: self.bid_cents,
            bidder_id: self.bidder_id.clone(),
            bidder_display_name: self.bidder_display_name.clone(),
        }
    }

    /// Event announcing this bid's removal.
    pub fn deleted_event(&self) -> AuctionEvent {
        AuctionEvent::DeleteBid {
            item_id: self.item_id.clone(),
            bid_id: self.id.clone(),
            bid_cents: self.bid_cents,
            bidder_id: self.bidder_id.clone(),
            bidder_display_name: self.bidder_display_name.clone(),
        }
    }
}

/// Render cents as dollars, e.g. `1205` → `$12.05`.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}${}.{:02}", sign, abs / 100, abs % 100)
}
