//! Ledger - balance audit log
//!
//! Every change to a wallet's available balance is recorded as exactly one
//! entry, written in the same transaction as the balance write it documents.
//! Frozen-balance moves that leave the available balance untouched are
//! audited through their withdrawal row instead.

use rust_decimal::Decimal;
use tracing::debug;

use crate::core_types::UserId;
use crate::error::MarketError;
use crate::models::{LedgerEntry, LedgerReason, NewLedgerEntry, Wallet};
use crate::store::{MarketStore, MarketTx};

pub struct Ledger;

impl Ledger {
    /// Record `change` against `wallet`, which must be the locked,
    /// pre-mutation snapshot. The caller applies and saves the new balance.
    pub async fn record(
        tx: &mut dyn MarketTx,
        wallet: &Wallet,
        change: Decimal,
        reason: LedgerReason,
        note: impl Into<String> + Send,
    ) -> Result<LedgerEntry, MarketError> {
        let balance_before = wallet.available_balance;
        let balance_after = balance_before + change;

        let entry = tx
            .insert_ledger_entry(NewLedgerEntry {
                user_id: wallet.user_id,
                change_amount: change,
                balance_before,
                balance_after,
                reason,
                note: note.into(),
            })
            .await?;

        if !entry.is_balanced() {
            return Err(MarketError::Inconsistent(format!(
                "ledger entry {} for user {}: {} + {} != {}",
                entry.id, entry.user_id, entry.balance_before, entry.change_amount, entry.balance_after
            )));
        }

        debug!(
            user_id = entry.user_id,
            reason = %entry.reason,
            change = %entry.change_amount,
            balance_after = %entry.balance_after,
            "Ledger entry recorded"
        );
        Ok(entry)
    }

    /// Verify a user's entries (in insertion order) and return the balance
    /// they add up to.
    ///
    /// Every entry must satisfy `after == before + change`, the first must
    /// start from zero and each must start where the previous one ended.
    pub fn replay(entries: &[LedgerEntry]) -> Result<Decimal, MarketError> {
        let mut balance = Decimal::ZERO;
        for entry in entries {
            if !entry.is_balanced() {
                return Err(MarketError::Inconsistent(format!(
                    "ledger entry {} is not balanced",
                    entry.id
                )));
            }
            if entry.balance_before != balance {
                return Err(MarketError::Inconsistent(format!(
                    "ledger entry {} starts at {} but previous balance is {}",
                    entry.id, entry.balance_before, balance
                )));
            }
            balance = entry.balance_after;
        }
        Ok(balance)
    }
}

/// Replay a user's ledger and compare it with the stored available balance.
///
/// Reads committed state without locks; run it against a quiescent wallet.
pub async fn audit_wallet(store: &dyn MarketStore, user_id: UserId) -> Result<Decimal, MarketError> {
    let wallet = store
        .wallet(user_id)
        .await?
        .ok_or(MarketError::WalletNotFound(user_id))?;
    let entries = store.ledger_entries(user_id).await?;
    let replayed = Ledger::replay(&entries)?;
    if replayed != wallet.available_balance {
        return Err(MarketError::Inconsistent(format!(
            "user {} ledger sums to {} but wallet holds {}",
            user_id, replayed, wallet.available_balance
        )));
    }
    Ok(replayed)
}
