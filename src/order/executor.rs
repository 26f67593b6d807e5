//! Order Executor
//!
//! One purchase of one whole listing, in this order:
//!
//! ```text
//! lock wallets (ascending) → lock + re-check listing → check funds
//!   → debit buyer / credit seller → service fee → game accounts
//!   → order (PENDING_SETTLEMENT) + listing SOLD → gateway transfer → SETTLED
//! ```
//!
//! [`OrderExecutor::execute_buy`] never commits: every write lands in the
//! caller's transaction, so any failure (including a gateway rejection after
//! the wallets were touched) is undone by rolling that transaction back.
//! [`OrderExecutor::buy`] is the self-contained boundary for direct purchases.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::core_types::{GameAccountId, ListingId, UserId};
use crate::error::MarketError;
use crate::fee::{seller_net, service_fee};
use crate::models::{
    business_number, Caller, GameAccount, GameCredentials, LedgerReason, ListingStatus, NewOrder,
    Order, OrderStatus,
};
use crate::settlement::SettlementGateway;
use crate::store::{MarketStore, MarketTx};
use crate::wallet::WalletGuard;

/// Buyer-side game account of a purchase
#[derive(Debug, Clone)]
pub enum BuyerAccount {
    /// Direct purchase: a new account row is created from these credentials
    New(GameCredentials),
    /// Task-driven purchase: the task's linked account is reused
    Linked(GameAccountId),
}

pub struct OrderExecutor {
    store: Arc<dyn MarketStore>,
    gateway: Arc<dyn SettlementGateway>,
    fee_rate: Decimal,
}

impl OrderExecutor {
    pub fn new(
        store: Arc<dyn MarketStore>,
        gateway: Arc<dyn SettlementGateway>,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            store,
            gateway,
            fee_rate,
        }
    }

    /// Buy `listing_id` for `caller` in its own transaction.
    ///
    /// Commits only after the gateway confirmed the transfer; any failure
    /// rolls back every local write.
    pub async fn buy(
        &self,
        caller: &Caller,
        listing_id: ListingId,
        credentials: GameCredentials,
    ) -> Result<Order, MarketError> {
        let account = BuyerAccount::New(credentials);
        let mut tx = self.store.begin().await?;

        match self
            .execute_buy(tx.as_mut(), caller.user_id, listing_id, &account)
            .await
        {
            Ok(order) => {
                if let Err(e) = tx.commit().await {
                    // diamonds already moved remotely
                    error!(
                        target: "settlement",
                        order_number = %order.order_number,
                        settlement_ref = ?order.external_settlement_ref,
                        error = %e,
                        "Settled remotely but local commit failed"
                    );
                    return Err(e.into());
                }
                info!(
                    order_id = order.id,
                    order_number = %order.order_number,
                    buyer_id = order.buyer_id,
                    seller_id = order.seller_id,
                    listing_id,
                    total_price = %order.total_price,
                    seller_net = %seller_net(order.total_price, self.fee_rate),
                    "Order completed"
                );
                Ok(order)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    error!(listing_id, error = %rb, "Rollback failed");
                }
                warn!(
                    buyer_id = caller.user_id,
                    listing_id,
                    code = e.code(),
                    error = %e,
                    "Order failed"
                );
                Err(e)
            }
        }
    }

    /// Run one purchase inside `tx` without committing it.
    pub async fn execute_buy(
        &self,
        tx: &mut dyn MarketTx,
        buyer_id: UserId,
        listing_id: ListingId,
        buyer_account: &BuyerAccount,
    ) -> Result<Order, MarketError> {
        if let BuyerAccount::New(credentials) = buyer_account
            && !credentials.is_complete()
        {
            return Err(MarketError::Validation(
                "game type, login name and password are required".into(),
            ));
        }

        // Seller id decides the lock set; the listing is re-read under lock below
        let seller_id = tx
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {}", listing_id)))?
            .seller_id;
        if seller_id == buyer_id {
            return Err(MarketError::Validation("cannot buy your own listing".into()));
        }

        // 1. Wallet locks, ascending user id
        let mut wallets = WalletGuard::acquire(tx, &[buyer_id, seller_id])
            .await
            .map_err(|e| match e {
                MarketError::WalletNotFound(user_id) => {
                    MarketError::OrderFailed(format!("wallet of user {} not found", user_id))
                }
                other => other,
            })?;

        // 2. Listing under lock; only one lock holder can observe ACTIVE
        let listing = match tx.lock_listing(listing_id).await? {
            Some(l) if l.status == ListingStatus::Active && l.seller_id == seller_id => l,
            _ => return Err(MarketError::ListingUnavailable(listing_id)),
        };

        // 3. Funds
        let available = wallets.available(buyer_id)?;
        if available < listing.total_price {
            return Err(MarketError::InsufficientFunds {
                required: listing.total_price,
                available,
            });
        }

        let order_number = business_number("OD");

        // 4. Gross transfer
        let debit = wallets
            .post(
                tx,
                buyer_id,
                -listing.total_price,
                LedgerReason::PurchaseDebit,
                order_number.clone(),
            )
            .await?;
        let credit = wallets
            .post(
                tx,
                seller_id,
                listing.total_price,
                LedgerReason::SaleCredit,
                order_number.clone(),
            )
            .await?;
        if -debit.change_amount != listing.total_price
            || credit.change_amount != listing.total_price
        {
            return Err(MarketError::Inconsistent(format!(
                "order {}: debit {} / credit {} / total {}",
                order_number, debit.change_amount, credit.change_amount, listing.total_price
            )));
        }

        // 5. Service fee, separate entry
        let fee = service_fee(listing.total_price, self.fee_rate);
        if fee > Decimal::ZERO {
            wallets
                .post(
                    tx,
                    seller_id,
                    -fee,
                    LedgerReason::ServiceFee,
                    order_number.clone(),
                )
                .await?;
        }

        // 6. Game accounts
        let buyer_game_account = match buyer_account {
            BuyerAccount::New(credentials) => tx.insert_game_account(buyer_id, credentials).await?,
            BuyerAccount::Linked(id) => linked_account(tx, *id, buyer_id).await?,
        };
        let seller_game_account = tx
            .get_game_account(listing.linked_account_id)
            .await?
            .ok_or_else(|| {
                MarketError::OrderFailed(format!(
                    "game account {} of listing {} not found",
                    listing.linked_account_id, listing_id
                ))
            })?;

        // 7. Order + listing
        let mut order = tx
            .insert_order(NewOrder {
                order_number: order_number.clone(),
                buyer_id,
                seller_id,
                listing_id,
                buyer_account_id: buyer_game_account.id,
                seller_account_id: seller_game_account.id,
                diamond_amount: listing.diamond_amount,
                unit_price: listing.unit_price,
                total_price: listing.total_price,
            })
            .await?;
        tx.set_listing_status(listing_id, ListingStatus::Sold).await?;

        // 8. External settlement, last
        let settlement_ref = self
            .gateway
            .transfer_diamonds(
                &seller_game_account.credentials,
                &buyer_game_account.credentials,
                listing.diamond_amount,
            )
            .await
            .inspect_err(|e| {
                warn!(
                    target: "settlement",
                    order_number = %order_number,
                    listing_id,
                    error = %e,
                    "Diamond transfer failed"
                );
            })?;

        // 9. Stamp
        tx.mark_order_settled(order.id, &settlement_ref).await?;
        order.external_settlement_ref = Some(settlement_ref);
        order.status = OrderStatus::Settled;
        Ok(order)
    }

    /// Orders bought by `buyer_id`, newest first
    pub async fn orders_bought(
        &self,
        caller: &Caller,
        buyer_id: UserId,
    ) -> Result<Vec<Order>, MarketError> {
        if !caller.may_act_for(buyer_id) {
            return Err(MarketError::Forbidden("orders of another user".into()));
        }
        Ok(self.store.orders_bought(buyer_id).await?)
    }

    /// Orders sold by `seller_id`, newest first
    pub async fn orders_sold(
        &self,
        caller: &Caller,
        seller_id: UserId,
    ) -> Result<Vec<Order>, MarketError> {
        if !caller.may_act_for(seller_id) {
            return Err(MarketError::Forbidden("orders of another user".into()));
        }
        Ok(self.store.orders_sold(seller_id).await?)
    }
}

async fn linked_account(
    tx: &mut dyn MarketTx,
    id: GameAccountId,
    owner: UserId,
) -> Result<GameAccount, MarketError> {
    match tx.get_game_account(id).await? {
        Some(account) if account.user_id == owner => Ok(account),
        _ => Err(MarketError::OrderFailed(format!(
            "game account {} is not linked to user {}",
            id, owner
        ))),
    }
}
