// region:    --- Imports
use crate::error::AuctionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// endregion: --- Imports

// region:    --- Listing

/// Lifecycle of a listing. Transitions are one-way: ACTIVE is the only
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    Active,
    Completed,
    Cancelled,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "ACTIVE",
            ListingStatus::Completed => "COMPLETED",
            ListingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl TryFrom<String> for ListingStatus {
    type Error = AuctionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "ACTIVE" => Ok(ListingStatus::Active),
            "COMPLETED" => Ok(ListingStatus::Completed),
            "CANCELLED" => Ok(ListingStatus::Cancelled),
            other => Err(AuctionError::Internal(format!(
                "unknown listing status: {other}"
            ))),
        }
    }
}

/// A single item offered for sale within a time window. Never deleted; kept
/// as the historical record after settlement.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Listing {
    pub id: i64,
    pub item_id: i64,
    pub seller_id: i64,
    pub starting_price: i64,
    pub current_bid: Option<i64>,
    pub current_bidder_id: Option<i64>,
    pub buyout_price: Option<i64>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: ListingStatus,
    pub is_featured: bool,
    /// Category copied from the item registry at create time, so the active
    /// listing filter can serve category queries without a registry call.
    pub item_category: Option<String>,
    pub final_price: Option<i64>,
    pub winner_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped by exactly 1 on every successful mutation; all writes are
    /// guarded by a compare-and-swap against the version the caller read.
    pub version: i64,
}

impl Listing {
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }

    /// The price a new bid competes against.
    pub fn bid_base(&self) -> i64 {
        self.current_bid.unwrap_or(self.starting_price)
    }
}

// endregion: --- Listing

// region:    --- Bid

/// An accepted bid. Immutable once written; the newest bid's amount always
/// equals the owning listing's `current_bid`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bid {
    pub id: i64,
    pub listing_id: i64,
    pub bidder_id: i64,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
    /// Set when the bid landed inside the auto-extension window.
    /// Informational only.
    pub was_last_second: bool,
}

// endregion: --- Bid

// region:    --- Commands

/// Create-listing command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuctionCommand {
    pub seller_id: i64,
    pub item_id: i64,
    pub starting_price: i64,
    pub buyout_price: Option<i64>,
    pub duration_minutes: i64,
    #[serde(default)]
    pub is_featured: bool,
}

/// Bid command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBidCommand {
    pub bidder_id: i64,
    pub amount: i64,
}

/// Instant-buyout command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyoutCommand {
    pub buyer_id: i64,
}

/// Seller cancellation command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelCommand {
    pub seller_id: i64,
}

/// Filter for the active-listing query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveFilter {
    pub featured: Option<bool>,
    pub ending_before_minutes: Option<i64>,
    pub category: Option<String>,
}

// endregion: --- Commands

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            ListingStatus::Active,
            ListingStatus::Completed,
            ListingStatus::Cancelled,
        ] {
            let parsed = ListingStatus::try_from(status.as_str().to_string()).unwrap();
            assert_eq!(parsed, status);
        }
        assert!(ListingStatus::try_from("SOLD".to_string()).is_err());
    }
}

// endregion: --- Tests
