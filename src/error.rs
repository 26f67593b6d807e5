//! Market Error Types
//!
//! One taxonomy shared by the order executor, the recycling matcher and the
//! wallet funding operations. Leaf errors from the store and the settlement
//! gateway convert into it via `From`.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{ListingId, UserId};
use crate::settlement::GatewayError;
use crate::store::StoreError;

/// Market error types
///
/// Error codes are stable and returned to the external caller verbatim.
#[derive(Error, Debug, Clone)]
pub enum MarketError {
    // === Request Errors (rejected before any lock is taken) ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // === Business Errors ===
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("Listing {0} is no longer available")]
    ListingUnavailable(ListingId),

    #[error("Wallet not found for user {0}")]
    WalletNotFound(UserId),

    #[error("Order failed: {0}")]
    OrderFailed(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === Infrastructure Errors ===
    #[error("Lock wait timed out")]
    LockTimeout,

    #[error("Settlement gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Store error: {0}")]
    Store(String),

    /// Post-condition violated. Never swallowed.
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),
}

impl MarketError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            MarketError::Validation(_) => "VALIDATION_ERROR",
            MarketError::Forbidden(_) => "FORBIDDEN",
            MarketError::NotFound(_) => "NOT_FOUND",
            MarketError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            MarketError::ListingUnavailable(_) => "LISTING_UNAVAILABLE",
            MarketError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            MarketError::OrderFailed(_) => "ORDER_FAILED",
            MarketError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            MarketError::LockTimeout => "LOCK_TIMEOUT",
            MarketError::Gateway(GatewayError::Unavailable(_)) => "GATEWAY_UNAVAILABLE",
            MarketError::Gateway(GatewayError::AccountInvalid { .. }) => "ACCOUNT_INVALID",
            MarketError::Gateway(GatewayError::SettlementRejected { .. }) => "SETTLEMENT_REJECTED",
            MarketError::Gateway(GatewayError::MalformedResponse(_)) => "GATEWAY_MALFORMED_RESPONSE",
            MarketError::Store(_) => "STORE_ERROR",
            MarketError::Inconsistent(_) => "INCONSISTENT",
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketError::LockTimeout | MarketError::Gateway(GatewayError::Unavailable(_))
        )
    }
}

impl From<StoreError> for MarketError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout => MarketError::LockTimeout,
            other => MarketError::Store(other.to_string()),
        }
    }
}
