//! Sale listings
//!
//! Sellers publish a fixed diamond quantity at a fixed unit price. Publishing
//! checks the configured price band and the seller's remote diamond balance;
//! the listing then stays `ACTIVE` until it is sold or delisted.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::config::MarketConfig;
use crate::core_types::{DiamondAmount, ListingId, UserId};
use crate::error::MarketError;
use crate::fee::require_money_scale;
use crate::models::{Caller, GameCredentials, ListingStatus, NewSaleListing, SaleListing};
use crate::settlement::SettlementGateway;
use crate::store::MarketStore;

pub struct ListingService {
    store: Arc<dyn MarketStore>,
    gateway: Arc<dyn SettlementGateway>,
    config: MarketConfig,
}

impl ListingService {
    pub fn new(
        store: Arc<dyn MarketStore>,
        gateway: Arc<dyn SettlementGateway>,
        config: MarketConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    fn validate(
        &self,
        credentials: &GameCredentials,
        diamond_amount: DiamondAmount,
        unit_price: Decimal,
    ) -> Result<(), MarketError> {
        if !credentials.is_complete() {
            return Err(MarketError::Validation(
                "game type, login name and password are required".into(),
            ));
        }
        if diamond_amount <= 0 {
            return Err(MarketError::Validation(
                "diamond amount must be positive".into(),
            ));
        }
        if unit_price <= Decimal::ZERO {
            return Err(MarketError::Validation("unit price must be positive".into()));
        }
        require_money_scale(unit_price, "unit price")?;
        if unit_price < self.config.min_unit_price || unit_price > self.config.max_unit_price {
            return Err(MarketError::Validation(format!(
                "unit price must be within [{}, {}]",
                self.config.min_unit_price, self.config.max_unit_price
            )));
        }
        Ok(())
    }

    /// Publish a listing for `caller`, selling from the game account behind
    /// `credentials`.
    pub async fn publish(
        &self,
        caller: &Caller,
        credentials: GameCredentials,
        diamond_amount: DiamondAmount,
        unit_price: Decimal,
    ) -> Result<SaleListing, MarketError> {
        self.validate(&credentials, diamond_amount, unit_price)?;

        if self.store.wallet(caller.user_id).await?.is_none() {
            return Err(MarketError::WalletNotFound(caller.user_id));
        }

        let remote = self.gateway.query_diamond_balance(&credentials).await?;
        if remote < diamond_amount {
            return Err(MarketError::Validation(format!(
                "game account holds {} diamonds, {} listed",
                remote, diamond_amount
            )));
        }

        let mut tx = self.store.begin().await?;
        let account = tx
            .insert_game_account(caller.user_id, &credentials)
            .await?;
        let listing = tx
            .insert_listing(NewSaleListing::new(
                caller.user_id,
                account.id,
                diamond_amount,
                unit_price,
            ))
            .await?;
        tx.commit().await?;

        info!(
            listing_id = listing.id,
            seller_id = listing.seller_id,
            diamond_amount,
            unit_price = %unit_price,
            total_price = %listing.total_price,
            "Listing published"
        );
        Ok(listing)
    }

    /// Withdraw an active listing. Sellers may delist their own, staff any.
    pub async fn delist(
        &self,
        caller: &Caller,
        listing_id: ListingId,
    ) -> Result<SaleListing, MarketError> {
        let mut tx = self.store.begin().await?;
        let mut listing = tx
            .lock_listing(listing_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("listing {}", listing_id)))?;

        if !caller.may_act_for(listing.seller_id) {
            return Err(MarketError::Forbidden(format!(
                "listing {} belongs to another seller",
                listing_id
            )));
        }
        if listing.status != ListingStatus::Active {
            return Err(MarketError::ListingUnavailable(listing_id));
        }

        tx.set_listing_status(listing_id, ListingStatus::Delisted)
            .await?;
        tx.commit().await?;
        listing.status = ListingStatus::Delisted;

        info!(listing_id, by = caller.user_id, "Listing delisted");
        Ok(listing)
    }

    /// Every active listing, cheapest first
    pub async fn active_listings(&self) -> Result<Vec<SaleListing>, MarketError> {
        Ok(self.store.active_listings().await?)
    }

    /// Active listings of one seller, newest first
    pub async fn seller_listings(&self, seller_id: UserId) -> Result<Vec<SaleListing>, MarketError> {
        Ok(self.store.listings_of(seller_id).await?)
    }
}
