/// In-memory AuctionStore with the same compare-and-swap semantics as the
/// Postgres store. Backs the service-level tests.
// region:    --- Imports
use crate::auction::model::{ActiveFilter, Bid, Listing, ListingStatus};
use crate::error::AuctionError;
use crate::store::AuctionStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

// endregion: --- Imports

// region:    --- Memory Store

#[derive(Default)]
struct StoreState {
    next_listing_id: i64,
    next_bid_id: i64,
    listings: HashMap<i64, Listing>,
    bids: Vec<Bid>,
    // Terminal listings whose settlement side effects are still pending.
    unfinalized: HashSet<i64>,
}

#[derive(Default)]
pub struct MemoryAuctionStore {
    state: Mutex<StoreState>,
}

impl MemoryAuctionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test support: move a listing's expiry without going through a bid.
    pub fn force_ends_at(&self, listing_id: i64, ends_at: DateTime<Utc>) {
        if let Some(listing) = self.state.lock().unwrap().listings.get_mut(&listing_id) {
            listing.ends_at = ends_at;
        }
    }
}

#[async_trait]
impl AuctionStore for MemoryAuctionStore {
    async fn next_listing_id(&self) -> Result<i64, AuctionError> {
        let mut state = self.state.lock().unwrap();
        state.next_listing_id += 1;
        Ok(state.next_listing_id)
    }

    async fn insert_listing(&self, listing: &Listing) -> Result<(), AuctionError> {
        let mut state = self.state.lock().unwrap();
        if state.listings.contains_key(&listing.id) {
            return Err(AuctionError::Internal(format!(
                "listing {} already exists",
                listing.id
            )));
        }
        state.listings.insert(listing.id, listing.clone());
        Ok(())
    }

    async fn get_listing(&self, listing_id: i64) -> Result<Listing, AuctionError> {
        self.state
            .lock()
            .unwrap()
            .listings
            .get(&listing_id)
            .cloned()
            .ok_or_else(|| AuctionError::NotFound(format!("listing {listing_id} not found")))
    }

    async fn list_active(
        &self,
        filter: &ActiveFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Listing>, AuctionError> {
        let ending_before = filter
            .ending_before_minutes
            .map(|m| now + Duration::minutes(m));
        let mut listings: Vec<Listing> = self
            .state
            .lock()
            .unwrap()
            .listings
            .values()
            .filter(|l| l.status == ListingStatus::Active && l.ends_at > now)
            .filter(|l| filter.featured.map_or(true, |f| l.is_featured == f))
            .filter(|l| ending_before.map_or(true, |t| l.ends_at <= t))
            .filter(|l| {
                filter
                    .category
                    .as_ref()
                    .map_or(true, |c| l.item_category.as_deref() == Some(c.as_str()))
            })
            .cloned()
            .collect();
        listings.sort_by_key(|l| l.ends_at);
        Ok(listings)
    }

    async fn bid_history(&self, listing_id: i64) -> Result<Vec<Bid>, AuctionError> {
        let mut bids: Vec<Bid> = self
            .state
            .lock()
            .unwrap()
            .bids
            .iter()
            .filter(|b| b.listing_id == listing_id)
            .cloned()
            .collect();
        bids.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(bids)
    }

    async fn bid_count(&self, listing_id: i64) -> Result<i64, AuctionError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .bids
            .iter()
            .filter(|b| b.listing_id == listing_id)
            .count() as i64)
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Listing>, AuctionError> {
        let mut expired: Vec<Listing> = self
            .state
            .lock()
            .unwrap()
            .listings
            .values()
            .filter(|l| l.status == ListingStatus::Active && l.ends_at <= now)
            .cloned()
            .collect();
        expired.sort_by_key(|l| l.ends_at);
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn find_unfinalized(&self, limit: i64) -> Result<Vec<Listing>, AuctionError> {
        let state = self.state.lock().unwrap();
        let mut pending: Vec<Listing> = state
            .unfinalized
            .iter()
            .filter_map(|id| state.listings.get(id))
            .cloned()
            .collect();
        pending.sort_by_key(|l| l.completed_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_finalized(&self, listing_id: i64) -> Result<(), AuctionError> {
        self.state.lock().unwrap().unfinalized.remove(&listing_id);
        Ok(())
    }

    async fn record_bid(
        &self,
        listing_id: i64,
        expected_version: i64,
        bidder_id: i64,
        amount: i64,
        new_ends_at: DateTime<Utc>,
        placed_at: DateTime<Utc>,
        was_last_second: bool,
    ) -> Result<Listing, AuctionError> {
        let mut state = self.state.lock().unwrap();
        state.next_bid_id += 1;
        let bid_id = state.next_bid_id;

        let listing = state
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| AuctionError::NotFound(format!("listing {listing_id} not found")))?;
        if listing.version != expected_version || listing.status != ListingStatus::Active {
            return Err(AuctionError::Conflict);
        }
        listing.current_bid = Some(amount);
        listing.current_bidder_id = Some(bidder_id);
        listing.ends_at = new_ends_at;
        listing.version += 1;
        let updated = listing.clone();

        state.bids.push(Bid {
            id: bid_id,
            listing_id,
            bidder_id,
            amount,
            timestamp: placed_at,
            was_last_second,
        });
        Ok(updated)
    }

    async fn settle(
        &self,
        listing_id: i64,
        expected_version: i64,
        final_price: i64,
        winner_id: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<Listing, AuctionError> {
        let mut state = self.state.lock().unwrap();
        let listing = state
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| AuctionError::NotFound(format!("listing {listing_id} not found")))?;
        if listing.version != expected_version || listing.status != ListingStatus::Active {
            return Err(AuctionError::Conflict);
        }
        listing.status = ListingStatus::Completed;
        listing.final_price = Some(final_price);
        listing.winner_id = Some(winner_id);
        listing.completed_at = Some(completed_at);
        listing.version += 1;
        let updated = listing.clone();
        state.unfinalized.insert(listing_id);
        Ok(updated)
    }

    async fn cancel(
        &self,
        listing_id: i64,
        expected_version: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<Listing, AuctionError> {
        let mut state = self.state.lock().unwrap();
        let listing = state
            .listings
            .get_mut(&listing_id)
            .ok_or_else(|| AuctionError::NotFound(format!("listing {listing_id} not found")))?;
        if listing.version != expected_version || listing.status != ListingStatus::Active {
            return Err(AuctionError::Conflict);
        }
        listing.status = ListingStatus::Cancelled;
        listing.completed_at = Some(completed_at);
        listing.version += 1;
        let updated = listing.clone();
        state.unfinalized.insert(listing_id);
        Ok(updated)
    }
}

// endregion: --- Memory Store

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: i64, version: i64) -> Listing {
        let now = Utc::now();
        Listing {
            id,
            item_id: id * 10,
            seller_id: 1,
            starting_price: 100,
            current_bid: None,
            current_bidder_id: None,
            buyout_price: None,
            starts_at: now,
            ends_at: now + Duration::minutes(60),
            status: ListingStatus::Active,
            is_featured: false,
            item_category: None,
            final_price: None,
            winner_id: None,
            created_at: now,
            completed_at: None,
            version,
        }
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = MemoryAuctionStore::new();
        store.insert_listing(&listing(1, 1)).await.unwrap();

        let now = Utc::now();
        let ends = now + Duration::minutes(60);
        let updated = store
            .record_bid(1, 1, 7, 110, ends, now, false)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        // Second writer read version 1; its CAS must lose.
        let err = store
            .record_bid(1, 1, 8, 120, ends, now, false)
            .await
            .unwrap_err();
        assert_eq!(err, AuctionError::Conflict);
    }

    #[tokio::test]
    async fn terminal_listing_rejects_all_cas() {
        let store = MemoryAuctionStore::new();
        store.insert_listing(&listing(1, 1)).await.unwrap();
        let now = Utc::now();
        store.settle(1, 1, 500, 7, now).await.unwrap();

        assert_eq!(
            store.settle(1, 2, 500, 7, now).await.unwrap_err(),
            AuctionError::Conflict
        );
        assert_eq!(
            store.cancel(1, 2, now).await.unwrap_err(),
            AuctionError::Conflict
        );
        assert_eq!(
            store
                .record_bid(1, 2, 9, 600, now, now, false)
                .await
                .unwrap_err(),
            AuctionError::Conflict
        );
    }

    #[tokio::test]
    async fn settlement_marks_listing_pending_until_finalized() {
        let store = MemoryAuctionStore::new();
        store.insert_listing(&listing(1, 1)).await.unwrap();
        let now = Utc::now();
        store.settle(1, 1, 500, 7, now).await.unwrap();

        let pending = store.find_unfinalized(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 1);

        store.mark_finalized(1).await.unwrap();
        assert!(store.find_unfinalized(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_expired_is_bounded_and_ordered() {
        let store = MemoryAuctionStore::new();
        let now = Utc::now();
        for i in 1..=5 {
            let mut l = listing(i, 1);
            l.ends_at = now - Duration::minutes(i);
            store.insert_listing(&l).await.unwrap();
        }
        let batch = store.find_expired(now, 3).await.unwrap();
        assert_eq!(batch.len(), 3);
        // Oldest expiry first.
        assert_eq!(batch[0].id, 5);
    }
}

// endregion: --- Tests
