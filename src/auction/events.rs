use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auction::model::ListingStatus;

/// Events fanned out to subscribers. Best-effort: publishing never gates an
/// operation's success. Subscribers key on `listing_id`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuctionEvent {
    BidPlaced {
        listing_id: i64,
        bidder_id: i64,
        amount: i64,
        new_ends_at: DateTime<Utc>,
    },
    ListingExtended {
        listing_id: i64,
        new_ends_at: DateTime<Utc>,
    },
    ListingSettled {
        listing_id: i64,
        status: ListingStatus,
        winner_id: Option<i64>,
        final_price: Option<i64>,
    },
}

impl AuctionEvent {
    pub fn listing_id(&self) -> i64 {
        match self {
            AuctionEvent::BidPlaced { listing_id, .. }
            | AuctionEvent::ListingExtended { listing_id, .. }
            | AuctionEvent::ListingSettled { listing_id, .. } => *listing_id,
        }
    }
}
