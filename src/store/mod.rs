/// Durable storage for Listing and Bid records. All invariants are enforced
/// here through conditional updates: every mutation is a compare-and-swap on
/// `(id, version, status = 'ACTIVE')`, so concurrent writers racing on one
/// listing get exactly one winner per attempt.
// region:    --- Imports
use crate::auction::model::{ActiveFilter, Bid, Listing};
use crate::error::AuctionError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;

pub mod memory;

// endregion: --- Imports

// region:    --- Store Trait

#[async_trait]
pub trait AuctionStore: Send + Sync {
    /// Allocate a listing id before insert, so create-time collaborator
    /// calls can carry idempotency keys that reference it.
    async fn next_listing_id(&self) -> Result<i64, AuctionError>;

    async fn insert_listing(&self, listing: &Listing) -> Result<(), AuctionError>;

    async fn get_listing(&self, listing_id: i64) -> Result<Listing, AuctionError>;

    async fn list_active(
        &self,
        filter: &ActiveFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Listing>, AuctionError>;

    async fn bid_history(&self, listing_id: i64) -> Result<Vec<Bid>, AuctionError>;

    async fn bid_count(&self, listing_id: i64) -> Result<i64, AuctionError>;

    /// Active listings whose window has elapsed, oldest first, bounded.
    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Listing>, AuctionError>;

    /// Terminal listings whose settlement side effects have not all been
    /// applied yet, oldest first, bounded.
    async fn find_unfinalized(&self, limit: i64) -> Result<Vec<Listing>, AuctionError>;

    /// Record that a terminal listing's settlement side effects are done.
    async fn mark_finalized(&self, listing_id: i64) -> Result<(), AuctionError>;

    /// CAS: apply an accepted bid. Updates the bid fields and `ends_at`,
    /// bumps the version and inserts the Bid row in one transaction.
    /// Fails with Conflict when `expected_version` is stale.
    #[allow(clippy::too_many_arguments)]
    async fn record_bid(
        &self,
        listing_id: i64,
        expected_version: i64,
        bidder_id: i64,
        amount: i64,
        new_ends_at: DateTime<Utc>,
        placed_at: DateTime<Utc>,
        was_last_second: bool,
    ) -> Result<Listing, AuctionError>;

    /// CAS: ACTIVE -> COMPLETED with final price and winner.
    async fn settle(
        &self,
        listing_id: i64,
        expected_version: i64,
        final_price: i64,
        winner_id: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<Listing, AuctionError>;

    /// CAS: ACTIVE -> CANCELLED.
    async fn cancel(
        &self,
        listing_id: i64,
        expected_version: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<Listing, AuctionError>;
}

// endregion: --- Store Trait

// region:    --- Queries

const LISTING_COLUMNS: &str = "id, item_id, seller_id, starting_price, current_bid, \
    current_bidder_id, buyout_price, starts_at, ends_at, status, is_featured, \
    item_category, final_price, winner_id, created_at, completed_at, version";

const GET_LISTING: &str = "SELECT * FROM listings WHERE id = $1";

const LIST_ACTIVE: &str = "SELECT * FROM listings
    WHERE status = 'ACTIVE' AND ends_at > $1
      AND ($2::boolean IS NULL OR is_featured = $2)
      AND ($3::timestamptz IS NULL OR ends_at <= $3)
      AND ($4::text IS NULL OR item_category = $4)
    ORDER BY ends_at ASC";

const FIND_EXPIRED: &str = "SELECT * FROM listings
    WHERE status = 'ACTIVE' AND ends_at <= $1
    ORDER BY ends_at ASC
    LIMIT $2";

const FIND_UNFINALIZED: &str = "SELECT * FROM listings
    WHERE status <> 'ACTIVE' AND finalized = FALSE
    ORDER BY completed_at ASC
    LIMIT $1";

const MARK_FINALIZED: &str = "UPDATE listings SET finalized = TRUE WHERE id = $1";

const GET_BID_HISTORY: &str = "SELECT id, listing_id, bidder_id, amount, timestamp, \
    was_last_second FROM bids WHERE listing_id = $1 ORDER BY timestamp DESC";

const COUNT_BIDS: &str = "SELECT COUNT(*) FROM bids WHERE listing_id = $1";

const APPLY_BID: &str = "UPDATE listings
    SET current_bid = $3, current_bidder_id = $4, ends_at = $5, version = version + 1
    WHERE id = $1 AND version = $2 AND status = 'ACTIVE'
    RETURNING *";

const INSERT_BID: &str = "INSERT INTO bids (listing_id, bidder_id, amount, timestamp, was_last_second)
    VALUES ($1, $2, $3, $4, $5)";

const SETTLE: &str = "UPDATE listings
    SET status = 'COMPLETED', final_price = $3, winner_id = $4, completed_at = $5,
        version = version + 1
    WHERE id = $1 AND version = $2 AND status = 'ACTIVE'
    RETURNING *";

const CANCEL: &str = "UPDATE listings
    SET status = 'CANCELLED', completed_at = $3, version = version + 1
    WHERE id = $1 AND version = $2 AND status = 'ACTIVE'
    RETURNING *";

// endregion: --- Queries

// region:    --- Pg Store

pub struct PgAuctionStore {
    pool: Arc<PgPool>,
}

impl PgAuctionStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuctionStore for PgAuctionStore {
    async fn next_listing_id(&self) -> Result<i64, AuctionError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT nextval('listing_id_seq')")
            .fetch_one(&*self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_listing(&self, listing: &Listing) -> Result<(), AuctionError> {
        sqlx::query(&format!(
            "INSERT INTO listings ({LISTING_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(listing.id)
        .bind(listing.item_id)
        .bind(listing.seller_id)
        .bind(listing.starting_price)
        .bind(listing.current_bid)
        .bind(listing.current_bidder_id)
        .bind(listing.buyout_price)
        .bind(listing.starts_at)
        .bind(listing.ends_at)
        .bind(listing.status.as_str())
        .bind(listing.is_featured)
        .bind(&listing.item_category)
        .bind(listing.final_price)
        .bind(listing.winner_id)
        .bind(listing.created_at)
        .bind(listing.completed_at)
        .bind(listing.version)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn get_listing(&self, listing_id: i64) -> Result<Listing, AuctionError> {
        sqlx::query_as::<_, Listing>(GET_LISTING)
            .bind(listing_id)
            .fetch_optional(&*self.pool)
            .await?
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
        let listings = sqlx::query_as::<_, Listing>(LIST_ACTIVE)
            .bind(now)
            .bind(filter.featured)
            .bind(ending_before)
            .bind(&filter.category)
            .fetch_all(&*self.pool)
            .await?;
        Ok(listings)
    }

    async fn bid_history(&self, listing_id: i64) -> Result<Vec<Bid>, AuctionError> {
        let bids = sqlx::query_as::<_, Bid>(GET_BID_HISTORY)
            .bind(listing_id)
            .fetch_all(&*self.pool)
            .await?;
        Ok(bids)
    }

    async fn bid_count(&self, listing_id: i64) -> Result<i64, AuctionError> {
        let count = sqlx::query_scalar::<_, i64>(COUNT_BIDS)
            .bind(listing_id)
            .fetch_one(&*self.pool)
            .await?;
        Ok(count)
    }

    async fn find_expired(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Listing>, AuctionError> {
        let listings = sqlx::query_as::<_, Listing>(FIND_EXPIRED)
            .bind(now)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await?;
        Ok(listings)
    }

    async fn find_unfinalized(&self, limit: i64) -> Result<Vec<Listing>, AuctionError> {
        let listings = sqlx::query_as::<_, Listing>(FIND_UNFINALIZED)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await?;
        Ok(listings)
    }

    async fn mark_finalized(&self, listing_id: i64) -> Result<(), AuctionError> {
        sqlx::query(MARK_FINALIZED)
            .bind(listing_id)
            .execute(&*self.pool)
            .await?;
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
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query_as::<_, Listing>(APPLY_BID)
            .bind(listing_id)
            .bind(expected_version)
            .bind(amount)
            .bind(bidder_id)
            .bind(new_ends_at)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AuctionError::Conflict)?;

        sqlx::query(INSERT_BID)
            .bind(listing_id)
            .bind(bidder_id)
            .bind(amount)
            .bind(placed_at)
            .bind(was_last_second)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
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
        sqlx::query_as::<_, Listing>(SETTLE)
            .bind(listing_id)
            .bind(expected_version)
            .bind(final_price)
            .bind(winner_id)
            .bind(completed_at)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(AuctionError::Conflict)
    }

    async fn cancel(
        &self,
        listing_id: i64,
        expected_version: i64,
        completed_at: DateTime<Utc>,
    ) -> Result<Listing, AuctionError> {
        sqlx::query_as::<_, Listing>(CANCEL)
            .bind(listing_id)
            .bind(expected_version)
            .bind(completed_at)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(AuctionError::Conflict)
    }
}

// endregion: --- Pg Store
