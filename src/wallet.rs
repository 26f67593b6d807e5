//! Wallet Guard
//!
//! Every financial path locks wallets through [`WalletGuard::acquire`], which
//! takes the row locks in ascending user-id order. Two transactions touching
//! the same pair of wallets in opposite roles therefore queue on the same
//! first lock instead of deadlocking.
//!
//! A [`LockedWallets`] handle is only valid inside the transaction that
//! produced it; the locks are released when that transaction commits or rolls
//! back.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::debug;

use crate::core_types::UserId;
use crate::error::MarketError;
use crate::ledger::Ledger;
use crate::models::{LedgerEntry, LedgerReason, Wallet};
use crate::store::MarketTx;

/// Order in which wallet locks must be taken: ascending, without duplicates
pub fn lock_order(user_ids: &[UserId]) -> Vec<UserId> {
    let mut ids = user_ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

pub struct WalletGuard;

impl WalletGuard {
    /// Lock the wallets of `user_ids` in global order.
    ///
    /// Fails with `WalletNotFound` for the first id without a wallet row and
    /// with `LockTimeout` when a lock is not granted in time.
    pub async fn acquire(
        tx: &mut dyn MarketTx,
        user_ids: &[UserId],
    ) -> Result<LockedWallets, MarketError> {
        let order = lock_order(user_ids);
        let mut wallets = BTreeMap::new();
        for user_id in order {
            let wallet = tx
                .lock_wallet(user_id)
                .await?
                .ok_or(MarketError::WalletNotFound(user_id))?;
            wallets.insert(user_id, wallet);
        }
        debug!(users = ?wallets.keys().collect::<Vec<_>>(), "Wallets locked");
        Ok(LockedWallets { wallets })
    }
}

/// Wallets locked by the current transaction
#[derive(Debug)]
pub struct LockedWallets {
    wallets: BTreeMap<UserId, Wallet>,
}

impl LockedWallets {
    pub fn get(&self, user_id: UserId) -> Option<&Wallet> {
        self.wallets.get(&user_id)
    }

    pub fn available(&self, user_id: UserId) -> Result<Decimal, MarketError> {
        Ok(self.held(user_id)?.available_balance)
    }

    fn held(&self, user_id: UserId) -> Result<&Wallet, MarketError> {
        self.wallets.get(&user_id).ok_or_else(|| {
            MarketError::Inconsistent(format!("wallet {} is not held by this guard", user_id))
        })
    }

    fn held_mut(&mut self, user_id: UserId) -> Result<&mut Wallet, MarketError> {
        self.wallets.get_mut(&user_id).ok_or_else(|| {
            MarketError::Inconsistent(format!("wallet {} is not held by this guard", user_id))
        })
    }

    /// Change the available balance by `change` and record it in the ledger.
    ///
    /// A debit larger than the available balance fails with
    /// `InsufficientFunds` and changes nothing.
    pub async fn post(
        &mut self,
        tx: &mut dyn MarketTx,
        user_id: UserId,
        change: Decimal,
        reason: LedgerReason,
        note: impl Into<String> + Send,
    ) -> Result<LedgerEntry, MarketError> {
        let wallet = self.held_mut(user_id)?;
        if wallet.available_balance + change < Decimal::ZERO {
            return Err(MarketError::InsufficientFunds {
                required: -change,
                available: wallet.available_balance,
            });
        }
        let entry = Ledger::record(tx, wallet, change, reason, note).await?;
        wallet.available_balance = entry.balance_after;
        tx.save_wallet(wallet).await?;
        Ok(entry)
    }

    /// Move `amount` from available to frozen (withdrawal request)
    pub async fn freeze(
        &mut self,
        tx: &mut dyn MarketTx,
        user_id: UserId,
        amount: Decimal,
        note: impl Into<String> + Send,
    ) -> Result<LedgerEntry, MarketError> {
        let wallet = self.held_mut(user_id)?;
        if wallet.available_balance < amount {
            return Err(MarketError::InsufficientFunds {
                required: amount,
                available: wallet.available_balance,
            });
        }
        let entry = Ledger::record(tx, wallet, -amount, LedgerReason::Withdraw, note).await?;
        wallet.available_balance = entry.balance_after;
        wallet.frozen_balance += amount;
        tx.save_wallet(wallet).await?;
        Ok(entry)
    }

    /// Consume `amount` of frozen funds (withdrawal paid out)
    pub async fn consume_frozen(
        &mut self,
        tx: &mut dyn MarketTx,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<(), MarketError> {
        let wallet = self.held_mut(user_id)?;
        take_frozen(wallet, amount)?;
        tx.save_wallet(wallet).await?;
        Ok(())
    }

    /// Return `amount` of frozen funds to available (withdrawal refused)
    pub async fn refund_frozen(
        &mut self,
        tx: &mut dyn MarketTx,
        user_id: UserId,
        amount: Decimal,
        note: impl Into<String> + Send,
    ) -> Result<LedgerEntry, MarketError> {
        let wallet = self.held_mut(user_id)?;
        take_frozen(wallet, amount)?;
        let entry = Ledger::record(tx, wallet, amount, LedgerReason::WithdrawRefund, note).await?;
        wallet.available_balance = entry.balance_after;
        tx.save_wallet(wallet).await?;
        Ok(entry)
    }
}

fn take_frozen(wallet: &mut Wallet, amount: Decimal) -> Result<(), MarketError> {
    if wallet.frozen_balance < amount {
        return Err(MarketError::Inconsistent(format!(
            "user {} has frozen {} but {} is being released",
            wallet.user_id, wallet.frozen_balance, amount
        )));
    }
    wallet.frozen_balance -= amount;
    Ok(())
}
