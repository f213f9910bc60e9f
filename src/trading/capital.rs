//! Capital ledger: per-account available balance behind an exclusive lock.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::{CopyError, Result};

/// Balance as observed at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub balance: Decimal,
    /// Bumped on every change; previews record it so execution can detect drift.
    pub version: u64,
}

#[derive(Debug, Default)]
struct AccountBalance {
    balance: Decimal,
    version: u64,
}

impl AccountBalance {
    fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            balance: self.balance,
            version: self.version,
        }
    }
}

/// Per-account available balance with an exclusive lock per account.
///
/// A copy request holds its account's [`CapitalGuard`] for the whole
/// validation and execution window, so a second request against the same
/// account either waits behind it or sees the post-batch balance.
/// Requests for different accounts never contend.
#[derive(Clone, Default)]
pub struct CapitalLedger {
    accounts: Arc<RwLock<HashMap<String, Arc<Mutex<AccountBalance>>>>>,
}

impl CapitalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, account: &str) -> Arc<Mutex<AccountBalance>> {
        if let Some(slot) = self.accounts.read().await.get(account) {
            return slot.clone();
        }
        self.accounts
            .write()
            .await
            .entry(account.to_string())
            .or_default()
            .clone()
    }

    /// Re-calibrate from the exchange's reported balance. Waits for any
    /// in-flight batch on the account to finish.
    pub async fn sync_balance(&self, account: &str, balance: Decimal) -> BalanceSnapshot {
        let mut guard = self.lock(account).await;
        guard.set_balance(balance)
    }

    /// Current balance and version, waiting for any in-flight batch.
    pub async fn snapshot(&self, account: &str) -> BalanceSnapshot {
        self.slot(account).await.lock().await.snapshot()
    }

    /// Take the account's capital lock.
    pub async fn lock(&self, account: &str) -> CapitalGuard {
        let inner = self.slot(account).await.lock_owned().await;
        CapitalGuard {
            account: account.to_string(),
            inner,
        }
    }

    pub async fn accounts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.accounts.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Exclusive access to one account's balance. Released on drop.
pub struct CapitalGuard {
    account: String,
    inner: OwnedMutexGuard<AccountBalance>,
}

impl CapitalGuard {
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        self.inner.snapshot()
    }

    pub fn available(&self) -> Decimal {
        self.inner.balance
    }

    /// Fail with `StaleBalance` if the balance moved since `expected` was read.
    ///
    /// An account that was never synced has no balance to spend and is
    /// rejected with `Unsynced` whatever version the caller presents.
    pub fn ensure_version(&self, expected: u64) -> Result<()> {
        if self.inner.version == 0 {
            return Err(CopyError::Unsynced(self.account.clone()));
        }
        if self.inner.version != expected {
            return Err(CopyError::StaleBalance {
                expected,
                current: self.inner.version,
            });
        }
        Ok(())
    }

    /// Fail with `BalanceMismatch` unless `previewed` is exactly the balance held.
    pub fn ensure_balance(&self, previewed: Decimal) -> Result<()> {
        if previewed != self.inner.balance {
            return Err(CopyError::BalanceMismatch {
                previewed,
                ledger: self.inner.balance,
            });
        }
        Ok(())
    }

    /// Remove committed capital after a batch. A zero debit leaves the version alone.
    pub fn debit(&mut self, amount: Decimal) -> BalanceSnapshot {
        if amount > Decimal::ZERO {
            let before = self.inner.balance;
            self.inner.balance = (before - amount).max(Decimal::ZERO);
            self.inner.version += 1;
            tracing::debug!(
                account = %self.account,
                amount = %amount,
                new_balance = %self.inner.balance,
                version = self.inner.version,
                "Capital ledger: debited"
            );
        }
        self.inner.snapshot()
    }

    pub fn set_balance(&mut self, balance: Decimal) -> BalanceSnapshot {
        let old = self.inner.balance;
        self.inner.balance = balance;
        self.inner.version += 1;
        tracing::info!(
            account = %self.account,
            old_balance = %old,
            new_balance = %balance,
            version = self.inner.version,
            "Capital ledger: synced balance"
        );
        self.inner.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unknown_account_starts_empty() {
        let ledger = CapitalLedger::new();
        let snap = ledger.snapshot("nobody").await;
        assert_eq!(snap.balance, Decimal::ZERO);
        assert_eq!(snap.version, 0);
    }

    #[tokio::test]
    async fn test_debit_bumps_version() {
        let ledger = CapitalLedger::new();
        let synced = ledger.sync_balance("alice", dec!(1000)).await;
        assert_eq!(synced.version, 1);

        let mut guard = ledger.lock("alice").await;
        let after = guard.debit(dec!(300));
        assert_eq!(after.balance, dec!(700));
        assert_eq!(after.version, 2);

        // Nothing filled, nothing changes
        assert_eq!(guard.debit(Decimal::ZERO).version, 2);
    }

    #[tokio::test]
    async fn test_stale_version_rejected() {
        let ledger = CapitalLedger::new();
        let read = ledger.sync_balance("alice", dec!(1000)).await;
        ledger.sync_balance("alice", dec!(400)).await;

        let guard = ledger.lock("alice").await;
        assert_eq!(
            guard.ensure_version(read.version),
            Err(CopyError::StaleBalance { expected: 1, current: 2 })
        );
        assert!(guard.ensure_version(2).is_ok());
    }

    #[tokio::test]
    async fn test_unsynced_account_rejected_at_version_zero() {
        let ledger = CapitalLedger::new();
        let guard = ledger.lock("nobody").await;
        assert_eq!(
            guard.ensure_version(0),
            Err(CopyError::Unsynced("nobody".to_string()))
        );
    }

    #[tokio::test]
    async fn test_previewed_balance_must_match() {
        let ledger = CapitalLedger::new();
        ledger.sync_balance("alice", dec!(100)).await;

        let guard = ledger.lock("alice").await;
        assert!(guard.ensure_balance(dec!(100)).is_ok());
        assert_eq!(
            guard.ensure_balance(dec!(10000)),
            Err(CopyError::BalanceMismatch {
                previewed: dec!(10000),
                ledger: dec!(100),
            })
        );
    }

    #[tokio::test]
    async fn test_second_request_waits_for_first() {
        let ledger = CapitalLedger::new();
        ledger.sync_balance("alice", dec!(100)).await;

        let mut first = ledger.lock("alice").await;

        let contender = ledger.clone();
        let waiter = tokio::spawn(async move {
            let guard = contender.lock("alice").await;
            guard.available()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        first.debit(dec!(60));
        drop(first);

        // The second holder observes the post-debit balance
        assert_eq!(waiter.await.unwrap(), dec!(40));
    }

    #[tokio::test]
    async fn test_accounts_are_independent() {
        let ledger = CapitalLedger::new();
        ledger.sync_balance("alice", dec!(100)).await;
        ledger.sync_balance("bob", dec!(50)).await;

        let _alice = ledger.lock("alice").await;
        let bob = tokio::time::timeout(Duration::from_millis(100), ledger.lock("bob"))
            .await
            .expect("bob should not wait on alice");
        assert_eq!(bob.available(), dec!(50));
        assert_eq!(ledger.accounts().await, vec!["alice", "bob"]);
    }
}
