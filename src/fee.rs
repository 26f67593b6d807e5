//! Service fee calculation
//!
//! Rates are plain decimal fractions: `0.05` = 5%.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::MarketError;

/// Decimal places of every stored money column
pub const MONEY_SCALE: u32 = 4;

/// Fee charged to the seller on a sale of `total_price`.
///
/// Rounded to [`MONEY_SCALE`] places, midpoint away from zero.
///
/// # Example
/// ```
/// use diamond_market::fee::service_fee;
/// use rust_decimal::Decimal;
/// // 600 * 5% = 30
/// let fee = service_fee(Decimal::new(600, 0), Decimal::new(5, 2));
/// assert_eq!(fee, Decimal::new(30, 0));
/// ```
#[inline]
pub fn service_fee(total_price: Decimal, rate: Decimal) -> Decimal {
    if rate <= Decimal::ZERO || total_price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (total_price * rate).round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Whether `value` fits a money column without rounding
#[inline]
pub fn fits_money_scale(value: Decimal) -> bool {
    value.normalize().scale() <= MONEY_SCALE
}

/// `Validation` error when `value` has more than [`MONEY_SCALE`] decimals
pub fn require_money_scale(value: Decimal, what: &str) -> Result<(), MarketError> {
    if fits_money_scale(value) {
        Ok(())
    } else {
        Err(MarketError::Validation(format!(
            "{} {} has more than {} decimal places",
            what, value, MONEY_SCALE
        )))
    }
}

/// Seller's net proceeds after the fee
#[inline]
pub fn seller_net(total_price: Decimal, rate: Decimal) -> Decimal {
    total_price - service_fee(total_price, rate)
}
