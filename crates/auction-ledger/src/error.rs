//! Error types for auction ledger operations
//!
//! Domain rule violations carry enough detail to render a message for the
//! bidder; store failures are wrapped as-is. Malformed stored records never
//! show up here: read paths skip them.

use crate::config::ConfigError;
use crate::model::format_cents;
use crate::store::StoreError;
use thiserror::Error;

/// Auction ledger error types.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No item is stored under this id
    #[error("No item with ID {0:?}")]
    ItemNotFound(String),

    /// The item has no bid with this id
    #[error("No bid {bid_id:?} on item {item_id:?}")]
    BidNotFound {
        /// Item that was searched
        item_id: String,
        /// Bid that was not found
        bid_id: String,
    },

    /// Nothing is up for auction right now
    #[error("No item is currently open")]
    NoCurrentItem,

    /// The bid does not clear the current top bid by the minimum increment
    #[error("Bid too low: minimum acceptable bid is {minimum_cents} cents")]
    BidTooLow {
        /// Current top bid
        previous_cents: u64,
        /// Smallest amount that would have been accepted
        minimum_cents: u64,
    },

    /// The item is already the current item
    #[error("Item {0:?} is already open")]
    AlreadyOpen(String),

    /// The item had already been closed
    #[error("Item {0:?} is already closed")]
    AlreadyClosed(String),

    /// The item cannot be stored as given
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    /// Encoding a record or event failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backing store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for auction ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Whether the error means an item or bid does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::ItemNotFound(_) | LedgerError::BidNotFound { .. })
    }

    /// Whether the operation was simply a no-op (nothing to act on).
    ///
    /// Callers usually answer these with a friendly message rather than
    /// treating them as failures.
    pub fn is_no_op(&self) -> bool {
        matches!(self, LedgerError::NoCurrentItem)
    }

    /// Check if this error should be logged at error level.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            LedgerError::Store(_) | LedgerError::Serialization(_) | LedgerError::Config(_)
        )
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::ItemNotFound(_) | LedgerError::BidNotFound { .. } => 404,
            LedgerError::NoCurrentItem
            | LedgerError::AlreadyOpen(_)
            | LedgerError::AlreadyClosed(_) => 409,
            LedgerError::BidTooLow { .. } | LedgerError::InvalidItem(_) => 400,
            LedgerError::Serialization(_) | LedgerError::Store(_) | LedgerError::Config(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::ItemNotFound(_) => "ITEM_NOT_FOUND",
            LedgerError::BidNotFound { .. } => "BID_NOT_FOUND",
            LedgerError::NoCurrentItem => "NO_CURRENT_ITEM",
            LedgerError::BidTooLow { .. } => "BID_TOO_LOW",
            LedgerError::AlreadyOpen(_) => "ALREADY_OPEN",
            LedgerError::AlreadyClosed(_) => "ALREADY_CLOSED",
            LedgerError::InvalidItem(_) => "INVALID_ITEM",
            LedgerError::Serialization(_) => "SERIALIZATION_ERROR",
            LedgerError::Store(_) => "STORE_ERROR",
            LedgerError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Message suitable for showing to a bidder or moderator.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::BidTooLow {
                previous_cents,
                minimum_cents,
            } => format!(
                "you must bid at least {} (the current high bid is {})",
                format_cents(i64::try_from(*minimum_cents).unwrap_or(i64::MAX)),
                format_cents(i64::try_from(*previous_cents).unwrap_or(i64::MAX)),
            ),
            LedgerError::NoCurrentItem => "Nothing's up for auction right now.".to_string(),
            LedgerError::Store(_) | LedgerError::Serialization(_) | LedgerError::Config(_) => {
                "Something went wrong, please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}
