//! Withdrawals
//!
//! ```text
//! request:  available -= amount, frozen += amount        PENDING
//! start:                                                 PENDING → PROCESSING
//! complete: frozen -= amount                             PROCESSING → COMPLETED
//! close:    frozen -= amount, available += amount        PROCESSING → CLOSED
//! ```

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use super::{require_staff, require_step};
use crate::core_types::{UserId, WithdrawalId};
use crate::error::MarketError;
use crate::models::{business_number, Caller, NewWithdrawal, Withdrawal, WithdrawalStatus};
use crate::store::{MarketStore, MarketTx};
use crate::wallet::WalletGuard;

/// Where staff should send the money
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutDetails {
    pub pay_channel: String,
    pub payee_name: String,
    pub pay_info: String,
}

pub struct WithdrawService {
    store: Arc<dyn MarketStore>,
    step: Decimal,
}

impl WithdrawService {
    pub fn new(store: Arc<dyn MarketStore>, step: Decimal) -> Self {
        Self { store, step }
    }

    /// Freeze `amount` of the caller's balance and open a withdrawal request
    pub async fn request(
        &self,
        caller: &Caller,
        amount: Decimal,
        payout: PayoutDetails,
    ) -> Result<Withdrawal, MarketError> {
        require_step(amount, self.step, "withdraw")?;
        if payout.pay_channel.trim().is_empty()
            || payout.payee_name.trim().is_empty()
            || payout.pay_info.trim().is_empty()
        {
            return Err(MarketError::Validation(
                "pay channel, payee name and pay info are required".into(),
            ));
        }

        let mut tx = self.store.begin().await?;
        let mut wallets = WalletGuard::acquire(tx.as_mut(), &[caller.user_id]).await?;

        let order_number = business_number("TX");
        wallets
            .freeze(tx.as_mut(), caller.user_id, amount, order_number.clone())
            .await?;
        let withdrawal = tx
            .insert_withdrawal(NewWithdrawal {
                order_number,
                user_id: caller.user_id,
                amount,
                pay_channel: payout.pay_channel,
                payee_name: payout.payee_name,
                pay_info: payout.pay_info,
            })
            .await?;
        tx.commit().await?;

        info!(
            withdrawal_id = withdrawal.id,
            order_number = %withdrawal.order_number,
            user_id = caller.user_id,
            amount = %amount,
            "Withdrawal requested"
        );
        Ok(withdrawal)
    }

    /// Staff picks up a pending request
    pub async fn start(&self, caller: &Caller, id: WithdrawalId) -> Result<Withdrawal, MarketError> {
        require_staff(caller)?;

        let mut tx = self.store.begin().await?;
        let mut withdrawal = lock_in_state(tx.as_mut(), id, WithdrawalStatus::Pending).await?;
        withdrawal.status = WithdrawalStatus::Processing;
        tx.save_withdrawal(&withdrawal).await?;
        tx.commit().await?;

        info!(withdrawal_id = id, staff_id = caller.user_id, "Withdrawal processing");
        Ok(withdrawal)
    }

    /// Staff confirms the payout; the frozen funds leave the wallet
    pub async fn complete(
        &self,
        caller: &Caller,
        id: WithdrawalId,
    ) -> Result<Withdrawal, MarketError> {
        require_staff(caller)?;

        let mut tx = self.store.begin().await?;
        let user_id = owner_of(tx.as_mut(), id).await?;
        let mut wallets = WalletGuard::acquire(tx.as_mut(), &[user_id]).await?;
        let mut withdrawal = lock_in_state(tx.as_mut(), id, WithdrawalStatus::Processing).await?;

        wallets
            .consume_frozen(tx.as_mut(), user_id, withdrawal.amount)
            .await?;
        withdrawal.status = WithdrawalStatus::Completed;
        tx.save_withdrawal(&withdrawal).await?;
        tx.commit().await?;

        info!(
            withdrawal_id = id,
            user_id,
            amount = %withdrawal.amount,
            staff_id = caller.user_id,
            "Withdrawal completed"
        );
        Ok(withdrawal)
    }

    /// Bill closing: staff refuses the payout and the frozen funds return to
    /// the available balance.
    pub async fn close(
        &self,
        caller: &Caller,
        id: WithdrawalId,
        remark: &str,
    ) -> Result<Withdrawal, MarketError> {
        require_staff(caller)?;

        let mut tx = self.store.begin().await?;
        let user_id = owner_of(tx.as_mut(), id).await?;
        let mut wallets = WalletGuard::acquire(tx.as_mut(), &[user_id]).await?;
        let mut withdrawal = lock_in_state(tx.as_mut(), id, WithdrawalStatus::Processing).await?;

        wallets
            .refund_frozen(
                tx.as_mut(),
                user_id,
                withdrawal.amount,
                withdrawal.order_number.clone(),
            )
            .await?;
        withdrawal.status = WithdrawalStatus::Closed;
        withdrawal.remark = remark.to_string();
        tx.save_withdrawal(&withdrawal).await?;
        tx.commit().await?;

        info!(
            withdrawal_id = id,
            user_id,
            amount = %withdrawal.amount,
            remark,
            "Withdrawal closed, funds returned"
        );
        Ok(withdrawal)
    }

    /// Staff view, oldest first
    pub async fn withdrawals(
        &self,
        caller: &Caller,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, MarketError> {
        require_staff(caller)?;
        Ok(self.store.withdrawals(status).await?)
    }

    pub async fn withdrawals_of(
        &self,
        caller: &Caller,
        user_id: UserId,
    ) -> Result<Vec<Withdrawal>, MarketError> {
        if !caller.may_act_for(user_id) {
            return Err(MarketError::Forbidden("withdrawals of another user".into()));
        }
        Ok(self.store.withdrawals_of(user_id).await?)
    }
}

/// Owner of a withdrawal, read before any lock to pick the wallet to lock
async fn owner_of(tx: &mut dyn MarketTx, id: WithdrawalId) -> Result<UserId, MarketError> {
    tx.get_withdrawal(id)
        .await?
        .map(|w| w.user_id)
        .ok_or_else(|| MarketError::NotFound(format!("withdrawal {}", id)))
}

async fn lock_in_state(
    tx: &mut dyn MarketTx,
    id: WithdrawalId,
    expected: WithdrawalStatus,
) -> Result<Withdrawal, MarketError> {
    let withdrawal = tx
        .lock_withdrawal(id)
        .await?
        .ok_or_else(|| MarketError::NotFound(format!("withdrawal {}", id)))?;
    if withdrawal.status != expected {
        return Err(MarketError::InvalidStateTransition(format!(
            "withdrawal {} is {}, expected {}",
            id, withdrawal.status, expected
        )));
    }
    Ok(withdrawal)
}
