// region:    --- Imports
use std::env;

// endregion: --- Imports

// region:    --- Engine Config

/// Listing durations a seller may choose, in minutes.
pub const ALLOWED_DURATIONS_MINUTES: &[i64] = &[30, 60, 120, 360, 720, 1440];

/// Runtime configuration for the auction engine. All values can be overridden
/// through environment variables of the same (upper-cased) name.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum percentage a new bid must exceed the previous one by.
    pub bid_increment_pct: i64,
    /// Bids landing within this many minutes of expiry trigger an extension.
    pub extension_threshold_minutes: i64,
    /// How far `ends_at` moves forward on each extension.
    pub extension_amount_minutes: i64,
    /// Flat fee charged to the seller at listing time.
    pub listing_fee_standard: i64,
    /// Flat fee for featured listings.
    pub listing_fee_featured: i64,
    /// Percentage fee on the settled price above the fee-free threshold.
    pub marketplace_fee_rate_pct: i64,
    /// Portion of the settled price that is exempt from the marketplace fee.
    pub marketplace_fee_free_threshold: i64,
    /// Percentage of the listing fee refunded on cancellation / no-bid expiry.
    pub cancel_fee_refund_pct: i64,
    pub sweep_interval_seconds: u64,
    pub sweep_batch_size: i64,
    /// Optimistic-concurrency retry budget for bid/buyout attempts.
    pub max_bid_retries: u32,
    /// Ledger account that collects marketplace fees.
    pub marketplace_account_id: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bid_increment_pct: 5,
            extension_threshold_minutes: 5,
            extension_amount_minutes: 1,
            listing_fee_standard: 100,
            listing_fee_featured: 500,
            marketplace_fee_rate_pct: 10,
            marketplace_fee_free_threshold: 1000,
            cancel_fee_refund_pct: 50,
            sweep_interval_seconds: 60,
            sweep_batch_size: 100,
            max_bid_retries: 8,
            marketplace_account_id: 0,
        }
    }
}

impl EngineConfig {
    /// Load the configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bid_increment_pct: env_i64("BID_INCREMENT_PCT", d.bid_increment_pct),
            extension_threshold_minutes: env_i64(
                "EXTENSION_THRESHOLD_MINUTES",
                d.extension_threshold_minutes,
            ),
            extension_amount_minutes: env_i64(
                "EXTENSION_AMOUNT_MINUTES",
                d.extension_amount_minutes,
            ),
            listing_fee_standard: env_i64("LISTING_FEE_STANDARD", d.listing_fee_standard),
            listing_fee_featured: env_i64("LISTING_FEE_FEATURED", d.listing_fee_featured),
            marketplace_fee_rate_pct: env_i64(
                "MARKETPLACE_FEE_RATE_PCT",
                d.marketplace_fee_rate_pct,
            ),
            marketplace_fee_free_threshold: env_i64(
                "MARKETPLACE_FEE_FREE_THRESHOLD",
                d.marketplace_fee_free_threshold,
            ),
            cancel_fee_refund_pct: env_i64("CANCEL_FEE_REFUND_PCT", d.cancel_fee_refund_pct),
            sweep_interval_seconds: env_i64("SWEEP_INTERVAL_SECONDS", d.sweep_interval_seconds as i64)
                as u64,
            sweep_batch_size: env_i64("SWEEP_BATCH_SIZE", d.sweep_batch_size),
            max_bid_retries: env_i64("MAX_BID_RETRIES", d.max_bid_retries as i64) as u32,
            marketplace_account_id: env_i64("MARKETPLACE_ACCOUNT_ID", d.marketplace_account_id),
        }
    }

    /// Smallest amount accepted as the next bid, given the current high bid
    /// (or starting price when no bid exists yet). Rounds up; saturates at
    /// i64::MAX so an astronomic bid cannot overflow the increment math.
    pub fn min_next_bid(&self, base: i64) -> i64 {
        base.checked_mul(100 + self.bid_increment_pct)
            .and_then(|scaled| scaled.checked_add(99))
            .map(|scaled| scaled / 100)
            .unwrap_or(i64::MAX)
    }

    /// Marketplace fee on a settled price: the rate applies only to the
    /// portion above the fee-free threshold.
    pub fn marketplace_fee(&self, price: i64) -> i64 {
        let taxable = (price - self.marketplace_fee_free_threshold).max(0);
        taxable * self.marketplace_fee_rate_pct / 100
    }

    pub fn listing_fee(&self, is_featured: bool) -> i64 {
        if is_featured {
            self.listing_fee_featured
        } else {
            self.listing_fee_standard
        }
    }

    pub fn cancel_refund(&self, is_featured: bool) -> i64 {
        self.listing_fee(is_featured) * self.cancel_fee_refund_pct / 100
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// endregion: --- Engine Config

// region:    --- Tests


// endregion: --- Tests
