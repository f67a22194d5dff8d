/// The synchronous request path: create, bid, buyout, cancel, plus the
/// settlement entry points the sweeper shares. Every mutation funnels through
/// a version compare-and-swap in the store; collaborator calls carry
/// deterministic idempotency keys so retries never double-apply.
// region:    --- Imports
use crate::auction::events::AuctionEvent;
use crate::auction::model::{
    ActiveFilter, Bid, BuyoutCommand, CancelCommand, CreateAuctionCommand, Listing,
    ListingStatus, PlaceBidCommand,
};
use crate::config::{EngineConfig, ALLOWED_DURATIONS_MINUTES};
use crate::error::AuctionError;
use crate::broadcast::EventBroadcaster;
use crate::ledger::{CreditLedger, IdempotencyKey, ItemRegistry, ReservationRef};
use crate::store::AuctionStore;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

// endregion: --- Imports

// region:    --- Auction Service

pub struct AuctionService {
    store: Arc<dyn AuctionStore>,
    ledger: Arc<dyn CreditLedger>,
    registry: Arc<dyn ItemRegistry>,
    broadcaster: Arc<dyn EventBroadcaster>,
    config: EngineConfig,
}

impl AuctionService {
    pub fn new(
        store: Arc<dyn AuctionStore>,
        ledger: Arc<dyn CreditLedger>,
        registry: Arc<dyn ItemRegistry>,
        broadcaster: Arc<dyn EventBroadcaster>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            registry,
            broadcaster,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // region:    --- Create

    pub async fn create_auction(
        &self,
        cmd: CreateAuctionCommand,
    ) -> Result<Listing, AuctionError> {
        info!("{:<12} --> create auction: {:?}", "Service", cmd);

        if cmd.starting_price <= 0 {
            return Err(AuctionError::Validation(
                "starting price must be positive".to_string(),
            ));
        }
        if let Some(buyout) = cmd.buyout_price {
            if buyout <= cmd.starting_price {
                return Err(AuctionError::Validation(
                    "buyout price must exceed the starting price".to_string(),
                ));
            }
        }
        if !ALLOWED_DURATIONS_MINUTES.contains(&cmd.duration_minutes) {
            return Err(AuctionError::Validation(format!(
                "duration must be one of {ALLOWED_DURATIONS_MINUTES:?} minutes"
            )));
        }

        let owner = self
            .registry
            .owner_of(cmd.item_id)
            .await?
            .ok_or_else(|| AuctionError::NotFound(format!("item {} not found", cmd.item_id)))?;
        if owner != cmd.seller_id {
            return Err(AuctionError::Validation(
                "caller does not own the item".to_string(),
            ));
        }
        let item_category = self.registry.item_category(cmd.item_id).await?;

        // Allocate the id up front so the fee charge and the item lock carry
        // keys tied to this listing.
        let listing_id = self.store.next_listing_id().await?;
        let fee = self.config.listing_fee(cmd.is_featured);
        self.ledger
            .charge(cmd.seller_id, fee, &IdempotencyKey::listing_fee(listing_id))
            .await?;

        if let Err(err) = self.registry.lock_item(cmd.item_id, listing_id).await {
            // Lock failed after the fee was taken: give the fee back in full.
            self.ledger
                .credit(cmd.seller_id, fee, &IdempotencyKey::cancel_refund(listing_id))
                .await?;
            return Err(err);
        }

        let now = Utc::now();
        let listing = Listing {
            id: listing_id,
            item_id: cmd.item_id,
            seller_id: cmd.seller_id,
            starting_price: cmd.starting_price,
            current_bid: None,
            current_bidder_id: None,
            buyout_price: cmd.buyout_price,
            starts_at: now,
            ends_at: now + Duration::minutes(cmd.duration_minutes),
            status: ListingStatus::Active,
            is_featured: cmd.is_featured,
            item_category,
            final_price: None,
            winner_id: None,
            created_at: now,
            completed_at: None,
            version: 1,
        };
        self.store.insert_listing(&listing).await?;
        info!(
            "{:<12} --> listing {} created for item {}",
            "Service", listing_id, cmd.item_id
        );
        Ok(listing)
    }

    // endregion: --- Create

    // region:    --- Bid

    pub async fn place_bid(
        &self,
        listing_id: i64,
        cmd: PlaceBidCommand,
    ) -> Result<Listing, AuctionError> {
        info!("{:<12} --> bid on listing {}: {:?}", "Service", listing_id, cmd);
        let mut held: Option<ReservationRef> = None;

        for _ in 0..self.config.max_bid_retries {
            let listing = self.store.get_listing(listing_id).await?;
            let now = Utc::now();

            if let Err(err) = self.validate_bid(&listing, now, &cmd) {
                self.release_if_held(&mut held).await;
                return Err(err);
            }

            let previous = listing
                .current_bidder_id
                .zip(listing.current_bid);

            // Reserving the same (listing, bidder, amount) tuple twice is a
            // no-op, so the hold survives CAS retries.
            let key = IdempotencyKey::bid(listing_id, cmd.bidder_id, cmd.amount);
            let reservation = match self.ledger.reserve(cmd.bidder_id, cmd.amount, &key).await {
                Ok(r) => r,
                Err(err) => {
                    self.release_if_held(&mut held).await;
                    return Err(err);
                }
            };
            held = Some(reservation);

            let remaining = listing.ends_at - now;
            let in_extension_window =
                remaining < Duration::minutes(self.config.extension_threshold_minutes);
            let new_ends_at = if in_extension_window {
                listing.ends_at + Duration::minutes(self.config.extension_amount_minutes)
            } else {
                listing.ends_at
            };

            match self
                .store
                .record_bid(
                    listing_id,
                    listing.version,
                    cmd.bidder_id,
                    cmd.amount,
                    new_ends_at,
                    now,
                    in_extension_window,
                )
                .await
            {
                Ok(updated) => {
                    // At most one reservation per listing: the outbid hold
                    // goes back in full. The bid itself is committed, so a
                    // failed release is only logged here; settlement later
                    // releases every hold that did not fund the sale.
                    if let Some((prev_bidder, prev_amount)) = previous {
                        let prev_ref = ReservationRef {
                            key: IdempotencyKey::bid(listing_id, prev_bidder, prev_amount),
                            account_id: prev_bidder,
                            amount: prev_amount,
                        };
                        if let Err(err) = self.ledger.release(&prev_ref).await {
                            warn!(
                                "{:<12} --> failed to release outbid hold {}: {}",
                                "Service", prev_ref.key, err
                            );
                        }
                    }

                    self.publish(AuctionEvent::BidPlaced {
                        listing_id,
                        bidder_id: cmd.bidder_id,
                        amount: cmd.amount,
                        new_ends_at: updated.ends_at,
                    })
                    .await;
                    if in_extension_window {
                        self.publish(AuctionEvent::ListingExtended {
                            listing_id,
                            new_ends_at: updated.ends_at,
                        })
                        .await;
                    }
                    return Ok(updated);
                }
                Err(AuctionError::Conflict) => {
                    warn!(
                        "{:<12} --> version conflict on listing {}, retrying",
                        "Service", listing_id
                    );
                    continue;
                }
                Err(err) => {
                    self.release_if_held(&mut held).await;
                    return Err(err);
                }
            }
        }

        self.release_if_held(&mut held).await;
        Err(AuctionError::Conflict)
    }

    fn validate_bid(
        &self,
        listing: &Listing,
        now: chrono::DateTime<Utc>,
        cmd: &PlaceBidCommand,
    ) -> Result<(), AuctionError> {
        if !listing.is_active() {
            return Err(AuctionError::Validation(
                "auction is no longer active".to_string(),
            ));
        }
        if now >= listing.ends_at {
            return Err(AuctionError::Validation("auction has expired".to_string()));
        }
        if cmd.bidder_id == listing.seller_id {
            return Err(AuctionError::Validation(
                "seller cannot bid on own listing".to_string(),
            ));
        }
        let minimum = self.config.min_next_bid(listing.bid_base());
        if cmd.amount < minimum {
            return Err(AuctionError::Validation(format!(
                "bid too low: minimum is {minimum}"
            )));
        }
        Ok(())
    }

    // endregion: --- Bid

    // region:    --- Buyout

    pub async fn execute_buyout(
        &self,
        listing_id: i64,
        cmd: BuyoutCommand,
    ) -> Result<Listing, AuctionError> {
        info!(
            "{:<12} --> buyout on listing {}: {:?}",
            "Service", listing_id, cmd
        );
        let mut held: Option<ReservationRef> = None;

        for _ in 0..self.config.max_bid_retries {
            let listing = self.store.get_listing(listing_id).await?;
            let now = Utc::now();

            let price = match self.validate_buyout(&listing, now, &cmd) {
                Ok(price) => price,
                Err(err) => {
                    self.release_if_held(&mut held).await;
                    return Err(err);
                }
            };

            let key = IdempotencyKey::buyout(listing_id, cmd.buyer_id);
            if let Err(err) = self.ledger.reserve(cmd.buyer_id, price, &key).await {
                self.release_if_held(&mut held).await;
                return Err(err);
            }
            held = Some(ReservationRef {
                key,
                account_id: cmd.buyer_id,
                amount: price,
            });

            // The settle CAS is the claim: only the winner of the version
            // race moves any funds. All fund and ownership movement runs in
            // the keyed finalization pass; if it fails here the listing
            // stays marked unfinalized and the sweeper re-runs it.
            match self
                .store
                .settle(listing_id, listing.version, price, cmd.buyer_id, now)
                .await
            {
                Ok(updated) => {
                    if let Err(err) = self.finalize_settlement(&updated).await {
                        warn!(
                            "{:<12} --> buyout of listing {} committed, finalization deferred: {}",
                            "Service", listing_id, err
                        );
                    }

                    self.publish(AuctionEvent::ListingSettled {
                        listing_id,
                        status: ListingStatus::Completed,
                        winner_id: Some(cmd.buyer_id),
                        final_price: Some(price),
                    })
                    .await;
                    return Ok(updated);
                }
                Err(AuctionError::Conflict) => {
                    warn!(
                        "{:<12} --> version conflict on buyout of listing {}, retrying",
                        "Service", listing_id
                    );
                    continue;
                }
                Err(err) => {
                    self.release_if_held(&mut held).await;
                    return Err(err);
                }
            }
        }

        self.release_if_held(&mut held).await;
        Err(AuctionError::Conflict)
    }

    fn validate_buyout(
        &self,
        listing: &Listing,
        now: chrono::DateTime<Utc>,
        cmd: &BuyoutCommand,
    ) -> Result<i64, AuctionError> {
        if !listing.is_active() {
            return Err(AuctionError::Validation(
                "auction is no longer active".to_string(),
            ));
        }
        if now >= listing.ends_at {
            return Err(AuctionError::Validation("auction has expired".to_string()));
        }
        if cmd.buyer_id == listing.seller_id {
            return Err(AuctionError::Validation(
                "seller cannot buy own listing".to_string(),
            ));
        }
        listing.buyout_price.ok_or_else(|| {
            AuctionError::Validation("listing has no buyout price".to_string())
        })
    }

    // endregion: --- Buyout

    // region:    --- Cancel

    pub async fn cancel_auction(
        &self,
        listing_id: i64,
        cmd: CancelCommand,
    ) -> Result<Listing, AuctionError> {
        info!(
            "{:<12} --> cancel listing {}: {:?}",
            "Service", listing_id, cmd
        );
        let listing = self.store.get_listing(listing_id).await?;

        if cmd.seller_id != listing.seller_id {
            return Err(AuctionError::Forbidden(
                "only the seller can cancel a listing".to_string(),
            ));
        }
        if !listing.is_active() {
            return Err(AuctionError::Validation(
                "auction is no longer active".to_string(),
            ));
        }
        if self.store.bid_count(listing_id).await? > 0 {
            return Err(AuctionError::Forbidden(
                "listing already has bids".to_string(),
            ));
        }

        // A bid racing this cancel bumps the version, so the CAS loses and
        // no refund happens.
        let now = Utc::now();
        let updated = self.store.cancel(listing_id, listing.version, now).await?;

        if let Err(err) = self.finalize_settlement(&updated).await {
            warn!(
                "{:<12} --> cancel of listing {} committed, finalization deferred: {}",
                "Service", listing_id, err
            );
        }

        self.publish(AuctionEvent::ListingSettled {
            listing_id,
            status: ListingStatus::Cancelled,
            winner_id: None,
            final_price: None,
        })
        .await;
        Ok(updated)
    }

    // endregion: --- Cancel

    // region:    --- Expiry Settlement

    /// Settle one expired listing. Invoked by the sweeper. The version CAS
    /// is the claim, exactly as for a buyout: whoever wins it owns all fund
    /// and ownership movement, so a sweep racing a client-initiated buyout
    /// on the same version loses cleanly before touching any reservation.
    pub async fn settle_expired(&self, listing: &Listing) -> Result<Listing, AuctionError> {
        let now = Utc::now();
        if !listing.is_active() || listing.ends_at > now {
            return Err(AuctionError::Validation(
                "listing is not expired".to_string(),
            ));
        }

        let updated = match listing.current_bidder_id.zip(listing.current_bid) {
            Some((winner_id, amount)) => {
                self.store
                    .settle(listing.id, listing.version, amount, winner_id, now)
                    .await?
            }
            None => self.store.cancel(listing.id, listing.version, now).await?,
        };

        self.finalize_settlement(&updated).await?;

        self.publish(AuctionEvent::ListingSettled {
            listing_id: updated.id,
            status: updated.status,
            winner_id: updated.winner_id,
            final_price: updated.final_price,
        })
        .await;
        info!(
            "{:<12} --> listing {} expired, now {}",
            "Service",
            updated.id,
            updated.status.as_str()
        );
        Ok(updated)
    }

    /// Run the collaborator side of a terminal listing: capture the winning
    /// hold, return every other hold, move item ownership and the lock, and
    /// pay the cancellation refund. Every step carries a key derived from
    /// the listing, so re-running after a partial failure or crash applies
    /// only the missing pieces; the sweeper re-invokes this for any listing
    /// not yet marked finalized.
    pub async fn finalize_settlement(&self, listing: &Listing) -> Result<(), AuctionError> {
        match listing.status {
            ListingStatus::Active => {
                return Err(AuctionError::Internal(format!(
                    "listing {} is not settled",
                    listing.id
                )));
            }
            ListingStatus::Completed => {
                let winner_id = listing.winner_id.ok_or_else(|| {
                    AuctionError::Internal(format!("listing {} has no winner", listing.id))
                })?;
                let final_price = listing.final_price.ok_or_else(|| {
                    AuctionError::Internal(format!("listing {} has no final price", listing.id))
                })?;

                // The sale is funded by the winner's bid hold when the high
                // bid won at expiry, by their buyout hold otherwise.
                let won_by_bid = listing.current_bidder_id == Some(winner_id)
                    && listing.current_bid == Some(final_price);
                let pay_from = ReservationRef {
                    key: if won_by_bid {
                        IdempotencyKey::bid(listing.id, winner_id, final_price)
                    } else {
                        IdempotencyKey::buyout(listing.id, winner_id)
                    },
                    account_id: winner_id,
                    amount: final_price,
                };

                let fee = self.config.marketplace_fee(final_price);
                self.ledger
                    .transfer(
                        &pay_from,
                        listing.seller_id,
                        fee,
                        &IdempotencyKey::settle(listing.id),
                    )
                    .await?;

                // Every hold that did not fund the sale goes back in full,
                // including any an earlier outbid release failed to return.
                for bid in self.store.bid_history(listing.id).await? {
                    let key = IdempotencyKey::bid(listing.id, bid.bidder_id, bid.amount);
                    if key != pay_from.key {
                        self.ledger
                            .release(&ReservationRef {
                                key,
                                account_id: bid.bidder_id,
                                amount: bid.amount,
                            })
                            .await?;
                    }
                }
                if won_by_bid {
                    // A buyout landing at exactly the standing bid leaves
                    // its own hold behind; returning a hold that never
                    // existed is a no-op.
                    self.ledger
                        .release(&ReservationRef {
                            key: IdempotencyKey::buyout(listing.id, winner_id),
                            account_id: winner_id,
                            amount: final_price,
                        })
                        .await?;
                }

                self.registry
                    .transfer_ownership(listing.item_id, winner_id)
                    .await?;
                self.registry.unlock_item(listing.item_id).await?;
            }
            ListingStatus::Cancelled => {
                self.registry.unlock_item(listing.item_id).await?;
                let refund = self.config.cancel_refund(listing.is_featured);
                self.ledger
                    .credit(
                        listing.seller_id,
                        refund,
                        &IdempotencyKey::cancel_refund(listing.id),
                    )
                    .await?;
            }
        }
        self.store.mark_finalized(listing.id).await?;
        Ok(())
    }

    // endregion: --- Expiry Settlement

    // region:    --- Queries

    pub async fn get_listing(&self, listing_id: i64) -> Result<Listing, AuctionError> {
        self.store.get_listing(listing_id).await
    }

    pub async fn list_active(&self, filter: &ActiveFilter) -> Result<Vec<Listing>, AuctionError> {
        self.store.list_active(filter, Utc::now()).await
    }

    pub async fn bid_history(&self, listing_id: i64) -> Result<Vec<Bid>, AuctionError> {
        // Surface NotFound for unknown listings instead of an empty history.
        self.store.get_listing(listing_id).await?;
        self.store.bid_history(listing_id).await
    }

    pub async fn find_expired(
        &self,
        now: chrono::DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Listing>, AuctionError> {
        self.store.find_expired(now, limit).await
    }

    pub async fn find_unfinalized(&self, limit: i64) -> Result<Vec<Listing>, AuctionError> {
        self.store.find_unfinalized(limit).await
    }

    // endregion: --- Queries

    async fn release_if_held(&self, held: &mut Option<ReservationRef>) {
        if let Some(reservation) = held.take() {
            if let Err(err) = self.ledger.release(&reservation).await {
                warn!(
                    "{:<12} --> failed to release reservation {}: {}",
                    "Service", reservation.key, err
                );
            }
        }
    }

    async fn publish(&self, event: AuctionEvent) {
        if let Err(err) = self.broadcaster.publish(&event).await {
            warn!("{:<12} --> event publish failed: {}", "Service", err);
        }
    }
}

// endregion: --- Auction Service
