//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! All ids map to Postgres `BIGINT` primary keys.

/// User ID - globally unique, immutable after assignment.
///
/// # Usage:
/// - Primary key of the wallet row (one wallet per user)
/// - Sort key of the global wallet lock order
pub type UserId = i64;

/// Sale listing ID
pub type ListingId = i64;

/// Market order ID (row id, not the human-facing order number)
pub type OrderId = i64;

/// Recycling task ID
pub type TaskId = i64;

/// Linked game-platform account ID
pub type GameAccountId = i64;

/// Ledger entry ID
pub type LedgerEntryId = i64;

/// Withdrawal request ID
pub type WithdrawalId = i64;

/// Recharge record ID
pub type RechargeId = i64;

/// Diamond quantity (in-game currency units, always whole)
pub type DiamondAmount = i64;
