//! Settlement Gateway
//!
//! Client side of the external game platform that actually moves diamonds
//! between player accounts. The local wallet ledger and the remote platform are
//! two independent ledgers; every call is logged with its request and raw
//! response so they can be reconciled when they diverge.
//!
//! # Endpoints
//!
//! ```text
//! POST /diamond/query        {loginName,password}                        -> {code,data:{diamond}}
//! POST /diamond/giftDiamond  {loginName1,password1,loginName2,password2,
//!                             giftDiamond}                                -> {code,data:{diamondRecordId}}
//! POST /diamond/buyDiamond   {loginName,password,goodId}                 -> {code,data:{orderNo,payPrice}}
//! ```
//!
//! Any application `code` other than 200 is a failure.

pub mod error;
pub mod http;
#[cfg(test)]
pub mod mock;

pub use error::GatewayError;
pub use http::HttpSettlementGateway;
#[cfg(test)]
pub use mock::MockGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::core_types::DiamondAmount;
use crate::models::GameCredentials;

/// Application code the platform returns on success
pub const SUCCESS_CODE: i64 = 200;

/// Remote record id of a confirmed diamond transfer
pub type SettlementRef = String;

/// Receipt of a system diamond purchase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyDiamondReceipt {
    pub order_no: String,
    pub pay_price: Decimal,
}

/// Game platform operations consumed by the market core
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Current diamond balance of a game account
    async fn query_diamond_balance(
        &self,
        account: &GameCredentials,
    ) -> Result<DiamondAmount, GatewayError>;

    /// Move `amount` diamonds between two game accounts
    async fn transfer_diamonds(
        &self,
        from: &GameCredentials,
        to: &GameCredentials,
        amount: DiamondAmount,
    ) -> Result<SettlementRef, GatewayError>;

    /// Buy a platform-sold diamond package for `account`
    async fn buy_diamond(
        &self,
        account: &GameCredentials,
        good_id: i64,
    ) -> Result<BuyDiamondReceipt, GatewayError>;
}
