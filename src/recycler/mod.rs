//! Diamond recycling
//!
//! Buyers open standing buy orders (recycling tasks) with a diamond quantity
//! and a unit price band. A background matcher periodically buys qualifying
//! listings on their behalf through the same executor a direct purchase uses.
//!
//! Matching policy:
//! - listings are visited cheapest first (ties by id)
//! - a listing goes to the oldest open task that can absorb it whole
//! - a task never receives more than it requested

pub mod tasks;
pub mod worker;

#[cfg(test)]
mod integration_tests;

pub use tasks::TaskService;
pub use worker::{CycleReport, RecyclingMatcher};
