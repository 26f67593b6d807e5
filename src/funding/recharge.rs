//! Recharges
//!
//! Manual recharges are credited immediately by staff. USDT recharges are
//! recorded `PENDING` with a per-request `pay_amount` (the requested amount
//! plus a random fraction) so the chain watcher can tell payments apart, and
//! are credited when completed by order number.

use std::sync::Arc;

use rand::Rng;
use rust_decimal::Decimal;
use tracing::info;

use super::{require_staff, require_step};
use crate::core_types::UserId;
use crate::error::MarketError;
use crate::models::{
    business_number, Caller, LedgerReason, NewRecharge, Recharge, RechargeChannel, RechargeStatus,
};
use crate::store::MarketStore;
use crate::wallet::WalletGuard;

/// Decimal places of the `pay_amount` fraction
const PAY_FRACTION_SCALE: u32 = 5;

pub struct RechargeService {
    store: Arc<dyn MarketStore>,
    step: Decimal,
}

impl RechargeService {
    pub fn new(store: Arc<dyn MarketStore>, step: Decimal) -> Self {
        Self { store, step }
    }

    /// Staff credit to `user_id`, recorded as a paid manual recharge
    pub async fn manual_recharge(
        &self,
        caller: &Caller,
        user_id: UserId,
        amount: Decimal,
    ) -> Result<Recharge, MarketError> {
        require_staff(caller)?;
        require_step(amount, self.step, "recharge")?;

        let mut tx = self.store.begin().await?;
        let mut wallets = WalletGuard::acquire(tx.as_mut(), &[user_id]).await?;

        let order_number = business_number("CZ");
        wallets
            .post(
                tx.as_mut(),
                user_id,
                amount,
                LedgerReason::Recharge,
                order_number.clone(),
            )
            .await?;
        let recharge = tx
            .insert_recharge(NewRecharge {
                order_number,
                user_id,
                amount,
                pay_amount: amount,
                channel: RechargeChannel::Manual,
                status: RechargeStatus::Paid,
            })
            .await?;
        tx.commit().await?;

        info!(
            recharge_id = recharge.id,
            order_number = %recharge.order_number,
            user_id,
            amount = %amount,
            staff_id = caller.user_id,
            "Manual recharge credited"
        );
        Ok(recharge)
    }

    /// Open a USDT recharge for the caller. Nothing is credited until
    /// [`complete_recharge`](Self::complete_recharge).
    pub async fn create_pending_recharge(
        &self,
        caller: &Caller,
        amount: Decimal,
    ) -> Result<Recharge, MarketError> {
        require_step(amount, self.step, "recharge")?;
        if self.store.wallet(caller.user_id).await?.is_none() {
            return Err(MarketError::WalletNotFound(caller.user_id));
        }

        let pay_amount = amount + random_pay_fraction();

        let mut tx = self.store.begin().await?;
        let recharge = tx
            .insert_recharge(NewRecharge {
                order_number: business_number("CZ"),
                user_id: caller.user_id,
                amount,
                pay_amount,
                channel: RechargeChannel::Usdt,
                status: RechargeStatus::Pending,
            })
            .await?;
        tx.commit().await?;

        info!(
            recharge_id = recharge.id,
            order_number = %recharge.order_number,
            user_id = caller.user_id,
            amount = %amount,
            pay_amount = %pay_amount,
            "Pending recharge created"
        );
        Ok(recharge)
    }

    /// Mark a pending recharge paid and credit the wallet
    pub async fn complete_recharge(
        &self,
        caller: &Caller,
        order_number: &str,
    ) -> Result<Recharge, MarketError> {
        require_staff(caller)?;

        let mut tx = self.store.begin().await?;
        let found = tx
            .find_recharge(order_number)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("recharge {}", order_number)))?;

        // wallet before the recharge row
        let mut wallets = WalletGuard::acquire(tx.as_mut(), &[found.user_id]).await?;
        let mut recharge = tx
            .lock_recharge(found.id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("recharge {}", order_number)))?;
        if recharge.status != RechargeStatus::Pending {
            return Err(MarketError::InvalidStateTransition(format!(
                "recharge {} is already {}",
                order_number, recharge.status
            )));
        }

        wallets
            .post(
                tx.as_mut(),
                recharge.user_id,
                recharge.amount,
                LedgerReason::Recharge,
                recharge.order_number.clone(),
            )
            .await?;
        recharge.status = RechargeStatus::Paid;
        tx.save_recharge(&recharge).await?;
        tx.commit().await?;

        info!(
            recharge_id = recharge.id,
            order_number,
            user_id = recharge.user_id,
            amount = %recharge.amount,
            "Recharge completed"
        );
        Ok(recharge)
    }

    pub async fn recharges_of(
        &self,
        caller: &Caller,
        user_id: UserId,
    ) -> Result<Vec<Recharge>, MarketError> {
        if !caller.may_act_for(user_id) {
            return Err(MarketError::Forbidden("recharges of another user".into()));
        }
        Ok(self.store.recharges_of(user_id).await?)
    }
}

/// Random fraction in `(0, 1)` with five decimal places
fn random_pay_fraction() -> Decimal {
    let units: i64 = rand::thread_rng().gen_range(1..10_i64.pow(PAY_FRACTION_SCALE));
    Decimal::new(units, PAY_FRACTION_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::audit_wallet;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    const USER: UserId = 8;

    async fn setup() -> (Arc<MemoryStore>, RechargeService) {
        let store = Arc::new(MemoryStore::new());
        store.seed_wallet(USER, Decimal::ZERO).await.unwrap();
        let svc = RechargeService::new(store.clone(), dec!(100));
        (store, svc)
    }

    async fn available(store: &MemoryStore) -> Decimal {
        store.wallet(USER).await.unwrap().unwrap().available_balance
    }

    #[test]
    fn test_pay_fraction_range() {
        for _ in 0..1000 {
            let f = random_pay_fraction();
            assert!(f > Decimal::ZERO && f < Decimal::ONE, "{f}");
            assert!(f.scale() <= PAY_FRACTION_SCALE);
        }
    }

    #[tokio::test]
    async fn test_manual_recharge_credits_immediately() {
        let (store, svc) = setup().await;

        assert!(matches!(
            svc.manual_recharge(&Caller::buyer(USER), USER, dec!(500)).await,
            Err(MarketError::Forbidden(_))
        ));
        assert!(matches!(
            svc.manual_recharge(&Caller::staff(1), USER, dec!(550)).await,
            Err(MarketError::Validation(_))
        ));

        let r = svc
            .manual_recharge(&Caller::staff(1), USER, dec!(500))
            .await
            .unwrap();
        assert_eq!(r.status, RechargeStatus::Paid);
        assert_eq!(r.channel, RechargeChannel::Manual);
        assert_eq!(available(&store).await, dec!(500));
        audit_wallet(store.as_ref(), USER).await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_recharge_lifecycle() {
        let (store, svc) = setup().await;
        let staff = Caller::staff(1);

        let pending = svc
            .create_pending_recharge(&Caller::buyer(USER), dec!(200))
            .await
            .unwrap();
        assert_eq!(pending.status, RechargeStatus::Pending);
        assert_eq!(pending.channel, RechargeChannel::Usdt);
        assert!(pending.pay_amount > dec!(200) && pending.pay_amount < dec!(201));
        // not credited yet
        assert_eq!(available(&store).await, Decimal::ZERO);

        let paid = svc
            .complete_recharge(&staff, &pending.order_number)
            .await
            .unwrap();
        assert_eq!(paid.status, RechargeStatus::Paid);
        assert_eq!(available(&store).await, dec!(200));

        // a second completion credits nothing
        assert!(matches!(
            svc.complete_recharge(&staff, &pending.order_number).await,
            Err(MarketError::InvalidStateTransition(_))
        ));
        assert_eq!(available(&store).await, dec!(200));
        audit_wallet(store.as_ref(), USER).await.unwrap();

        assert_eq!(
            svc.recharges_of(&Caller::buyer(USER), USER).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_pending_recharge_rejections() {
        let (_, svc) = setup().await;
        assert!(matches!(
            svc.create_pending_recharge(&Caller::buyer(77), dec!(100)).await,
            Err(MarketError::WalletNotFound(77))
        ));
        assert!(matches!(
            svc.complete_recharge(&Caller::staff(1), "CZ-missing").await,
            Err(MarketError::NotFound(_))
        ));
        assert!(matches!(
            svc.recharges_of(&Caller::buyer(9), USER).await,
            Err(MarketError::Forbidden(_))
        ));
    }
}
