/// Contracts for the two external collaborators the engine moves value
/// through: the fungible credit ledger and the unique-item registry. The
/// engine only ever calls these with deterministic idempotency keys, so a
/// crash-and-retry (by the service or the sweeper) can never double-charge
/// or double-transfer.
// region:    --- Imports
use crate::error::AuctionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod memory;
pub mod pg;

// endregion: --- Imports

// region:    --- Idempotency Keys

/// Deterministic key derived from the listing id and the transition being
/// applied. Collaborators treat a repeated key as an already-applied no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Create-time listing fee charge.
    pub fn listing_fee(listing_id: i64) -> Self {
        Self(format!("listing-fee:{listing_id}"))
    }

    /// Bid reservation. Accepted amounts strictly increase per listing, so
    /// the (listing, bidder, amount) tuple is unique per accepted bid.
    pub fn bid(listing_id: i64, bidder_id: i64, amount: i64) -> Self {
        Self(format!("bid:{listing_id}:{bidder_id}:{amount}"))
    }

    /// Buyout reservation.
    pub fn buyout(listing_id: i64, buyer_id: i64) -> Self {
        Self(format!("buyout:{listing_id}:{buyer_id}"))
    }

    /// Settlement fund transfer. Shared by buyout and sweep settlement: at
    /// most one transfer can ever apply per listing.
    pub fn settle(listing_id: i64) -> Self {
        Self(format!("settle:{listing_id}"))
    }

    /// Partial listing-fee refund, for seller cancel and zero-bid expiry.
    pub fn cancel_refund(listing_id: i64) -> Self {
        Self(format!("cancel-refund:{listing_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// endregion: --- Idempotency Keys

// region:    --- Credit Ledger

/// Handle to funds held against an account. The key doubles as the
/// reservation identity in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRef {
    pub key: IdempotencyKey,
    pub account_id: i64,
    pub amount: i64,
}

/// Per-account balance ledger. Reserve holds funds without moving them;
/// transfer consumes a reservation, routing the fee portion to the
/// marketplace account. All operations are atomic and idempotent per key.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Hold `amount` against the account's available (non-reserved) balance.
    async fn reserve(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<ReservationRef, AuctionError>;

    /// Return reserved funds to the account. Releasing an already-released
    /// or already-consumed reservation is a no-op.
    async fn release(&self, reservation: &ReservationRef) -> Result<(), AuctionError>;

    /// Consume a reservation: `amount - fee` goes to `to_account`, `fee`
    /// goes to the marketplace account.
    async fn transfer(
        &self,
        reservation: &ReservationRef,
        to_account: i64,
        fee: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError>;

    /// Debit an account directly (listing fee).
    async fn charge(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError>;

    /// Credit an account directly (fee refund).
    async fn credit(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError>;
}

// endregion: --- Credit Ledger

// region:    --- Item Registry

/// Unique-ownership catalog. A locked item cannot be transferred or listed
/// again until unlocked.
#[async_trait]
pub trait ItemRegistry: Send + Sync {
    async fn owner_of(&self, item_id: i64) -> Result<Option<i64>, AuctionError>;

    async fn item_category(&self, item_id: i64) -> Result<Option<String>, AuctionError>;

    /// Lock the item to a listing. Fails with a Validation error when the
    /// item is already locked by another listing.
    async fn lock_item(&self, item_id: i64, listing_id: i64) -> Result<(), AuctionError>;

    /// Idempotent: unlocking an unlocked item is a no-op.
    async fn unlock_item(&self, item_id: i64) -> Result<(), AuctionError>;

    async fn transfer_ownership(&self, item_id: i64, to_account: i64)
        -> Result<(), AuctionError>;
}

// endregion: --- Item Registry

// region:    --- Tests


// endregion: --- Tests
