/// In-memory CreditLedger / ItemRegistry with the same idempotency and
/// reservation semantics as the Postgres adapters. Used as stand-ins for the
/// external collaborators in tests.
// region:    --- Imports
use crate::error::AuctionError;
use crate::ledger::{CreditLedger, IdempotencyKey, ItemRegistry, ReservationRef};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

// endregion: --- Imports

// region:    --- Memory Credit Ledger

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReservationState {
    Held,
    Released,
    Captured,
}

#[derive(Debug, Clone)]
struct HeldReservation {
    account_id: i64,
    amount: i64,
    state: ReservationState,
}

#[derive(Debug, Default, Clone, Copy)]
struct Account {
    balance: i64,
    reserved: i64,
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<i64, Account>,
    reservations: HashMap<String, HeldReservation>,
    applied_ops: HashSet<String>,
}

pub struct MemoryCreditLedger {
    state: Mutex<LedgerState>,
    marketplace_account_id: i64,
}

impl MemoryCreditLedger {
    pub fn new(marketplace_account_id: i64) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            marketplace_account_id,
        }
    }

    pub fn with_account(self, account_id: i64, balance: i64) -> Self {
        self.state
            .lock()
            .unwrap()
            .accounts
            .insert(account_id, Account { balance, reserved: 0 });
        self
    }

    pub fn balance_of(&self, account_id: i64) -> i64 {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(&account_id)
            .map(|a| a.balance)
            .unwrap_or(0)
    }

    pub fn reserved_of(&self, account_id: i64) -> i64 {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(&account_id)
            .map(|a| a.reserved)
            .unwrap_or(0)
    }

    /// Sum of all balances, marketplace account included. Conservation of
    /// funds means this never changes, no matter what the engine does.
    pub fn total_credits(&self) -> i64 {
        self.state
            .lock()
            .unwrap()
            .accounts
            .values()
            .map(|a| a.balance)
            .sum()
    }
}

#[async_trait]
impl CreditLedger for MemoryCreditLedger {
    async fn reserve(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<ReservationRef, AuctionError> {
        let mut state = self.state.lock().unwrap();

        // Retried reserve with the same key returns the existing hold. A
        // released reservation may be re-held (the caller is retrying the
        // same attempt); a captured one is gone for good.
        if let Some(existing) = state.reservations.get(key.as_str()) {
            match existing.state {
                ReservationState::Held => {
                    return Ok(ReservationRef {
                        key: key.clone(),
                        account_id: existing.account_id,
                        amount: existing.amount,
                    });
                }
                ReservationState::Captured => {
                    return Err(AuctionError::Internal(format!(
                        "reservation {key} was already consumed"
                    )));
                }
                ReservationState::Released => {
                    state.reservations.remove(key.as_str());
                }
            }
        }

        let account = state.accounts.entry(account_id).or_default();
        if account.balance - account.reserved < amount {
            return Err(AuctionError::InsufficientFunds);
        }
        account.reserved += amount;
        state.reservations.insert(
            key.as_str().to_string(),
            HeldReservation {
                account_id,
                amount,
                state: ReservationState::Held,
            },
        );
        Ok(ReservationRef {
            key: key.clone(),
            account_id,
            amount,
        })
    }

    async fn release(&self, reservation: &ReservationRef) -> Result<(), AuctionError> {
        let mut state = self.state.lock().unwrap();
        let Some(held) = state.reservations.get_mut(reservation.key.as_str()) else {
            return Ok(());
        };
        if held.state != ReservationState::Held {
            return Ok(());
        }
        held.state = ReservationState::Released;
        let (account_id, amount) = (held.account_id, held.amount);
        if let Some(account) = state.accounts.get_mut(&account_id) {
            account.reserved -= amount;
        }
        Ok(())
    }

    async fn transfer(
        &self,
        reservation: &ReservationRef,
        to_account: i64,
        fee: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError> {
        let mut state = self.state.lock().unwrap();
        if state.applied_ops.contains(key.as_str()) {
            return Ok(());
        }
        let Some(held) = state.reservations.get_mut(reservation.key.as_str()) else {
            return Err(AuctionError::Internal(format!(
                "transfer of unknown reservation {}",
                reservation.key
            )));
        };
        if held.state != ReservationState::Held {
            return Err(AuctionError::Internal(format!(
                "transfer of non-held reservation {}",
                reservation.key
            )));
        }
        held.state = ReservationState::Captured;
        let (from_account, amount) = (held.account_id, held.amount);

        let from = state.accounts.entry(from_account).or_default();
        from.balance -= amount;
        from.reserved -= amount;
        state.accounts.entry(to_account).or_default().balance += amount - fee;
        state
            .accounts
            .entry(self.marketplace_account_id)
            .or_default()
            .balance += fee;
        state.applied_ops.insert(key.as_str().to_string());
        Ok(())
    }

    async fn charge(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError> {
        let mut state = self.state.lock().unwrap();
        if state.applied_ops.contains(key.as_str()) {
            return Ok(());
        }
        let account = state.accounts.entry(account_id).or_default();
        if account.balance - account.reserved < amount {
            return Err(AuctionError::InsufficientFunds);
        }
        account.balance -= amount;
        state
            .accounts
            .entry(self.marketplace_account_id)
            .or_default()
            .balance += amount;
        state.applied_ops.insert(key.as_str().to_string());
        Ok(())
    }

    async fn credit(
        &self,
        account_id: i64,
        amount: i64,
        key: &IdempotencyKey,
    ) -> Result<(), AuctionError> {
        let mut state = self.state.lock().unwrap();
        if state.applied_ops.contains(key.as_str()) {
            return Ok(());
        }
        state
            .accounts
            .entry(self.marketplace_account_id)
            .or_default()
            .balance -= amount;
        state.accounts.entry(account_id).or_default().balance += amount;
        state.applied_ops.insert(key.as_str().to_string());
        Ok(())
    }
}

// endregion: --- Memory Credit Ledger

// region:    --- Memory Item Registry

#[derive(Debug, Clone)]
struct ItemState {
    owner_id: i64,
    category: Option<String>,
    locked_by: Option<i64>,
}

#[derive(Default)]
pub struct MemoryItemRegistry {
    items: Mutex<HashMap<i64, ItemState>>,
}

impl MemoryItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(self, item_id: i64, owner_id: i64, category: Option<&str>) -> Self {
        self.items.lock().unwrap().insert(
            item_id,
            ItemState {
                owner_id,
                category: category.map(str::to_string),
                locked_by: None,
            },
        );
        self
    }

    pub fn is_locked(&self, item_id: i64) -> bool {
        self.items
            .lock()
            .unwrap()
            .get(&item_id)
            .map(|i| i.locked_by.is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ItemRegistry for MemoryItemRegistry {
    async fn owner_of(&self, item_id: i64) -> Result<Option<i64>, AuctionError> {
        Ok(self.items.lock().unwrap().get(&item_id).map(|i| i.owner_id))
    }

    async fn item_category(&self, item_id: i64) -> Result<Option<String>, AuctionError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .get(&item_id)
            .and_then(|i| i.category.clone()))
    }

    async fn lock_item(&self, item_id: i64, listing_id: i64) -> Result<(), AuctionError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(&item_id)
            .ok_or_else(|| AuctionError::NotFound(format!("item {item_id} not found")))?;
        match item.locked_by {
            Some(existing) if existing != listing_id => Err(AuctionError::Validation(format!(
                "item {item_id} is already locked by listing {existing}"
            ))),
            _ => {
                item.locked_by = Some(listing_id);
                Ok(())
            }
        }
    }

    async fn unlock_item(&self, item_id: i64) -> Result<(), AuctionError> {
        if let Some(item) = self.items.lock().unwrap().get_mut(&item_id) {
            item.locked_by = None;
        }
        Ok(())
    }

    async fn transfer_ownership(
        &self,
        item_id: i64,
        to_account: i64,
    ) -> Result<(), AuctionError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(&item_id)
            .ok_or_else(|| AuctionError::NotFound(format!("item {item_id} not found")))?;
        item.owner_id = to_account;
        Ok(())
    }
}

// endregion: --- Memory Item Registry

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reserve_respects_available_balance() {
        let ledger = MemoryCreditLedger::new(0).with_account(1, 100);
        let key = IdempotencyKey::bid(1, 1, 80);
        let res = ledger.reserve(1, 80, &key).await.unwrap();
        assert_eq!(ledger.reserved_of(1), 80);

        // 20 available left: a further 30 must fail.
        let err = ledger
            .reserve(1, 30, &IdempotencyKey::bid(2, 1, 30))
            .await
            .unwrap_err();
        assert_eq!(err, AuctionError::InsufficientFunds);

        ledger.release(&res).await.unwrap();
        assert_eq!(ledger.reserved_of(1), 0);
        assert_eq!(ledger.balance_of(1), 100);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let ledger = MemoryCreditLedger::new(0).with_account(1, 100);
        let res = ledger
            .reserve(1, 50, &IdempotencyKey::bid(1, 1, 50))
            .await
            .unwrap();
        ledger.release(&res).await.unwrap();
        ledger.release(&res).await.unwrap();
        assert_eq!(ledger.reserved_of(1), 0);
    }

    #[tokio::test]
    async fn released_reservation_can_be_reheld() {
        let ledger = MemoryCreditLedger::new(0).with_account(1, 100);
        let key = IdempotencyKey::bid(1, 1, 60);
        let res = ledger.reserve(1, 60, &key).await.unwrap();
        ledger.release(&res).await.unwrap();

        // A retry of the same attempt takes a fresh hold under the same key.
        ledger.reserve(1, 60, &key).await.unwrap();
        assert_eq!(ledger.reserved_of(1), 60);
    }

    #[tokio::test]
    async fn transfer_routes_fee_and_applies_once() {
        let ledger = MemoryCreditLedger::new(0).with_account(1, 100).with_account(2, 0);
        let res = ledger
            .reserve(1, 100, &IdempotencyKey::buyout(1, 1))
            .await
            .unwrap();
        let key = IdempotencyKey::settle(1);
        ledger.transfer(&res, 2, 10, &key).await.unwrap();
        // Retry with the same key is a no-op.
        ledger.transfer(&res, 2, 10, &key).await.unwrap();

        assert_eq!(ledger.balance_of(1), 0);
        assert_eq!(ledger.balance_of(2), 90);
        assert_eq!(ledger.balance_of(0), 10);
        assert_eq!(ledger.total_credits(), 100);
    }

    #[tokio::test]
    async fn lock_rejects_second_listing() {
        let registry = MemoryItemRegistry::new().with_item(7, 1, Some("weapon"));
        registry.lock_item(7, 100).await.unwrap();
        // Same listing relocking is fine (retry).
        registry.lock_item(7, 100).await.unwrap();
        let err = registry.lock_item(7, 101).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }
}

// endregion: --- Tests
