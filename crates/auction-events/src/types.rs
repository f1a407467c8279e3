//! Auction event types and their wire codec
//!
//! Every state change of the auction is announced on the store's pub/sub
//! channel as a flat JSON object. The `event` field names the kind and the
//! remaining fields belong to the variant:
//!
//! ```text
//! {"event":"openItem","itemId":"lot-7"}
//! {"event":"bid","itemId":"lot-7","id":"…","bid":1200,"bidder":"u2","bidderDisplayName":"Pip"}
//! {"event":"deleteBid","itemId":"lot-7","bidId":"…","bid":1200,"bidder":"u2","bidderDisplayName":"Pip"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the discriminator field in the wire format.
pub const EVENT_FIELD: &str = "event";

/// Discriminator values understood by [`AuctionEvent::decode`].
pub const EVENT_KINDS: [&str; 4] = ["openItem", "closeItem", "bid", "deleteBid"];

/// Why a raw message could not be turned into an [`AuctionEvent`].
///
/// These never reach subscribers: the delivery loop logs and skips the
/// offending message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not a JSON object
    #[error("payload is not a JSON object: {0}")]
    NotAnObject(String),

    /// The `event` field is missing or not a string
    #[error("missing event discriminator")]
    MissingKind,

    /// The discriminator names a kind this build does not know
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    /// The discriminator is known but the variant fields do not match
    #[error("malformed {kind} event: {message}")]
    Malformed {
        /// Event kind that failed to decode
        kind: String,
        /// Underlying serde message
        message: String,
    },
}

/// A state change of the auction.
///
/// Events are transient: they are published once, delivered to the
/// subscribers that exist at that moment, and never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum AuctionEvent {
    /// An item became the current item
    #[serde(rename = "openItem", rename_all = "camelCase")]
    OpenItem {
        /// Item that was opened
        item_id: String,
    },

    /// The current item was closed
    #[serde(rename = "closeItem", rename_all = "camelCase")]
    CloseItem {
        /// Item that was closed
        item_id: String,
    },

    /// A bid was accepted
    #[serde(rename = "bid", rename_all = "camelCase")]
    Bid {
        /// Item the bid was placed on
        item_id: String,
        /// Unique bid id
        #[serde(rename = "id")]
        bid_id: String,
        /// Amount in cents
        #[serde(rename = "bid")]
        bid_cents: u64,
        /// Opaque bidder id
        #[serde(rename = "bidder")]
        bidder_id: String,
        /// Name shown to other bidders
        bidder_display_name: String,
    },

    /// A bid was removed by a moderator
    #[serde(rename = "deleteBid", rename_all = "camelCase")]
    DeleteBid {
        /// Item the bid belonged to
        item_id: String,
        /// Id of the removed bid
        bid_id: String,
        /// Amount of the removed bid in cents
        #[serde(rename = "bid")]
        bid_cents: u64,
        /// Bidder of the removed bid
        #[serde(rename = "bidder")]
        bidder_id: String,
        /// Display name of the removed bid's bidder
        bidder_display_name: String,
    },
}

impl AuctionEvent {
    /// Create an `openItem` event.
    pub fn open_item(item_id: impl Into<String>) -> Self {
        Self::OpenItem {
            item_id: item_id.into(),
        }
    }

    /// Create a `closeItem` event.
    pub fn close_item(item_id: impl Into<String>) -> Self {
        Self::CloseItem {
            item_id: item_id.into(),
        }
    }

    /// Discriminator value written to the `event` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OpenItem { .. } => "openItem",
            Self::CloseItem { .. } => "closeItem",
            Self::Bid { .. } => "bid",
            Self::DeleteBid { .. } => "deleteBid",
        }
    }

    /// Item the event refers to.
    pub fn item_id(&self) -> &str {
        match self {
            Self::OpenItem { item_id }
            | Self::CloseItem { item_id }
            | Self::Bid { item_id, .. }
            | Self::DeleteBid { item_id, .. } => item_id,
        }
    }

    /// Serialize to the flat wire format.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a raw pub/sub payload.
    ///
    /// The discriminator is read first so that unknown kinds can be told
    /// apart from malformed payloads of a known kind.
    pub fn decode(payload: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| DecodeError::NotAnObject(e.to_string()))?;

        let kind = value
            .as_object()
            .ok_or_else(|| DecodeError::NotAnObject("expected an object".to_string()))?
            .get(EVENT_FIELD)
            .and_then(serde_json::Value::as_str)
            .ok_or(DecodeError::MissingKind)?
            .to_string();

        if !EVENT_KINDS.contains(&kind.as_str()) {
            return Err(DecodeError::UnknownKind(kind));
        }

        serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
            kind,
            message: e.to_string(),
        })
    }

    /// Wrap the event the way the server-sent-event feed writes it:
    /// `{"type": <kind>, "event": {...}}`.
    pub fn envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.kind(),
            "event": self,
        })
    }
}
