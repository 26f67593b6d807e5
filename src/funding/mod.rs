//! Wallet funding: withdrawals and recharges
//!
//! Every balance change goes through the Wallet Guard, so funding shares the
//! global lock order with order execution: wallet first, then the funding row.

pub mod recharge;
pub mod withdraw;

pub use recharge::RechargeService;
pub use withdraw::{PayoutDetails, WithdrawService};

use rust_decimal::Decimal;

use crate::error::MarketError;
use crate::fee::require_money_scale;
use crate::models::Caller;

/// Amount must be positive, fit the money scale and be a whole multiple of `step`
fn require_step(amount: Decimal, step: Decimal, what: &str) -> Result<(), MarketError> {
    if amount <= Decimal::ZERO {
        return Err(MarketError::Validation(format!("{} amount must be positive", what)));
    }
    require_money_scale(amount, &format!("{} amount", what))?;
    if step > Decimal::ZERO && !(amount % step).is_zero() {
        return Err(MarketError::Validation(format!(
            "{} amount {} must be a multiple of {}",
            what, amount, step
        )));
    }
    Ok(())
}

fn require_staff(caller: &Caller) -> Result<(), MarketError> {
    if caller.is_staff() {
        Ok(())
    } else {
        Err(MarketError::Forbidden("staff only".into()))
    }
}
