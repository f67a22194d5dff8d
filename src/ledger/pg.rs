/// Postgres-backed CreditLedger / ItemRegistry adapters. Idempotency is
/// enforced with a `ledger_ops` key table and a single-use reservation row,
/// both checked inside the same transaction as the balance movement.
// region:    --- Imports
use crate::error::AuctionError;
use crate::ledger::{CreditLedger, IdempotencyKey, ItemRegistry, ReservationRef};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::info;

// endregion: --- Imports

// region:    --- Pg Credit Ledger

pub struct PgCreditLedger {
    pool: Arc<PgPool>,
    marketplace_account_id: i64,
}

impl PgCreditLedger {
    pub fn new(pool: Arc<PgPool>, marketplace_account_id: i64) -> Self {
        Self {
            pool,
            marketplace_account_id,
        }
    }

    /// Record the operation key; returns false when it was already applied.
    async fn claim_op(
        tx: &mut Transaction<'_, Postgres>,
        key: &IdempotencyKey,
    ) -> Result<bool, AuctionError> {
        let result = sqlx::query("INSERT INTO ledger_ops (key) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(key.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn add_balance(
        tx: &mut Transaction<'_, Postgres>,
        account_id: i64,
        amount: i64,
    ) -> Result<(), AuctionError> {
        sqlx::query(
            "INSERT INTO accounts (id, balance, reserved) VALUES ($1, $2, 0)
             ON CONFLICT (id) DO UPDATE SET balance = accounts.balance + $2",
        )
        .bind(account_id)
        .bind(amount)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn reserve(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<ReservationRef, AuctionError> {
        let mut tx = self.pool.begin().await?;

        // Retried reserve with the same key returns the existing hold. A
        // released reservation may be re-held (the caller is retrying the
        // same attempt); a captured one is gone for good.
        let existing = sqlx::query("SELECT account_id, amount, state FROM reservations WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = existing {
            match row.get::<String, _>("state").as_str() {
                "HELD" => {
                    return Ok(ReservationRef {
                        key: key.clone(),
                        account_id: row.get("account_id"),
                        amount: row.get("amount"),
                    });
                }
                "RELEASED" => {
                    sqlx::query("DELETE FROM reservations WHERE key = $1")
                        .bind(key.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                _ => {
                    return Err(AuctionError::Internal(format!(
                        "reservation {key} was already consumed"
                    )));
                }
            }
        }

        let held = sqlx::query(
            "UPDATE accounts SET reserved = reserved + $2
             WHERE id = $1 AND balance - reserved >= $2",
        )
        .bind(account_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;
        if held.rows_affected() == 0 {
            return Err(AuctionError::InsufficientFunds);
        }

        sqlx::query(
            "INSERT INTO reservations (key, account_id, amount, state) VALUES ($1, $2, $3, 'HELD')",
        )
        .bind(key.as_str())
        .bind(account_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!("{:<12} --> reserved {} from account {}", "Ledger", amount, account_id);
        Ok(ReservationRef {
            key: key.clone(),
            account_id,
            amount,
        })
    }

    async fn release(&self, reservation: &ReservationRef) -> Result<(), AuctionError> {
        let mut tx = self.pool.begin().await?;
        let released = sqlx::query(
            "UPDATE reservations SET state = 'RELEASED'
             WHERE key = $1 AND state = 'HELD'
             RETURNING account_id, amount",
        )
        .bind(reservation.key.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        // No-op when the reservation was already released or consumed.
        if let Some(row) = released {
            let account_id: i64 = row.get("account_id");
            let amount: i64 = row.get("amount");
            sqlx::query("UPDATE accounts SET reserved = reserved - $2 WHERE id = $1")
                .bind(account_id)
                .bind(amount)
                .execute(&mut *tx)
                .await?;
            info!("{:<12} --> released {} to account {}", "Ledger", amount, account_id);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn transfer(
        &self,
        reservation: &ReservationRef,
        to_account: i64,
        fee: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError> {
        let mut tx = self.pool.begin().await?;
        if !Self::claim_op(&mut tx, key).await? {
            tx.commit().await?;
            return Ok(());
        }

        let captured = sqlx::query(
            "UPDATE reservations SET state = 'CAPTURED'
             WHERE key = $1 AND state = 'HELD'
             RETURNING account_id, amount",
        )
        .bind(reservation.key.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| {
            AuctionError::Internal(format!("transfer of non-held reservation {}", reservation.key))
        })?;
        let from_account: i64 = captured.get("account_id");
        let amount: i64 = captured.get("amount");

        sqlx::query("UPDATE accounts SET balance = balance - $2, reserved = reserved - $2 WHERE id = $1")
            .bind(from_account)
            .bind(amount)
            .execute(&mut *tx)
            .await?;
        Self::add_balance(&mut tx, to_account, amount - fee).await?;
        Self::add_balance(&mut tx, self.marketplace_account_id, fee).await?;

        tx.commit().await?;
        info!(
            "{:<12} --> transferred {} (fee {}) from account {} to account {}",
            "Ledger", amount, fee, from_account, to_account
        );
        Ok(())
    }

    async fn charge(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError> {
        let mut tx = self.pool.begin().await?;
        if !Self::claim_op(&mut tx, key).await? {
            tx.commit().await?;
            return Ok(());
        }
        let charged = sqlx::query(
            "UPDATE accounts SET balance = balance - $2
             WHERE id = $1 AND balance - reserved >= $2",
        )
        .bind(account_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;
        if charged.rows_affected() == 0 {
            return Err(AuctionError::InsufficientFunds);
        }
        Self::add_balance(&mut tx, self.marketplace_account_id, amount).await?;
        tx.commit().await?;
        info!("{:<12} --> charged {} to account {}", "Ledger", amount, account_id);
        Ok(())
    }

    async fn credit(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError> {
        let mut tx = self.pool.begin().await?;
        if !Self::claim_op(&mut tx, key).await? {
            tx.commit().await?;
            return Ok(());
        }
        Self::add_balance(&mut tx, self.marketplace_account_id, -amount).await?;
        Self::add_balance(&mut tx, account_id, amount).await?;
        tx.commit().await?;
        info!("{:<12} --> credited {} to account {}", "Ledger", amount, account_id);
        Ok(())
    }
}

// endregion: --- Pg Credit Ledger

// region:    --- Pg Item Registry

pub struct PgItemRegistry {
    pool: Arc<PgPool>,
}

impl PgItemRegistry {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ItemRegistry for PgItemRegistry {
    async fn owner_of(&self, item_id: i64) -> Result<Option<i64>, AuctionError> {
        let row = sqlx::query("SELECT owner_id FROM items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(|r| r.get("owner_id")))
    }

    async fn item_category(&self, item_id: i64) -> Result<Option<String>, AuctionError> {
        let row = sqlx::query("SELECT category FROM items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.and_then(|r| r.get("category")))
    }

    async fn lock_item(&self, item_id: i64, listing_id: i64) -> Result<(), AuctionError> {
        let locked = sqlx::query(
            "UPDATE items SET locked_by = $2
             WHERE id = $1 AND (locked_by IS NULL OR locked_by = $2)",
        )
        .bind(item_id)
        .bind(listing_id)
        .execute(&*self.pool)
        .await?;
        if locked.rows_affected() == 0 {
            return Err(AuctionError::Validation(format!(
                "item {item_id} is already locked by another listing"
            )));
        }
        Ok(())
    }

    async fn unlock_item(&self, item_id: i64) -> Result<(), AuctionError> {
        sqlx::query("UPDATE items SET locked_by = NULL WHERE id = $1")
            .bind(item_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn transfer_ownership(
        &self,
        item_id: i64,
        to_account: i64,
    ) -> Result<(), AuctionError> {
        let moved = sqlx::query("UPDATE items SET owner_id = $2 WHERE id = $1")
            .bind(item_id)
            .bind(to_account)
            .execute(&*self.pool)
            .await?;
        if moved.rows_affected() == 0 {
            return Err(AuctionError::NotFound(format!("item {item_id} not found")));
        }
        info!(
            "{:<12} --> item {} ownership transferred to account {}",
            "Registry", item_id, to_account
        );
        Ok(())
    }
}

// endregion: --- Pg Item Registry
