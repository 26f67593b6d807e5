//! Order execution
//!
//! A purchase moves funds between two wallets, records the order, marks the
//! listing sold and asks the game platform to move the diamonds, all inside
//! one transaction. Used directly by buyers and by the recycling matcher.

pub mod executor;


pub use executor::{BuyerAccount, OrderExecutor};
