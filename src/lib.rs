//! Diamond Market - ledger-consistent order execution and recycling matcher
//!
//! Core of a marketplace for an in-game currency ("diamonds"). Sellers list
//! diamonds at a fixed unit price, buyers purchase whole listings, funds move
//! between ledger-backed wallets, and standing buy orders are filled by a
//! background matcher. Diamonds themselves live on an external game platform
//! reached through the settlement gateway.
//!
//! # Modules
//!
//! - [`core_types`] - Id and amount aliases
//! - [`models`] - Stored rows and their status enums
//! - [`store`] - Transactional store with row locks (Postgres and in-memory)
//! - [`ledger`] - Ledger entries and replay audit
//! - [`wallet`] - Wallet Guard: ordered wallet locking and balance mutation
//! - [`settlement`] - Game platform client
//! - [`order`] - Order Executor
//! - [`recycler`] - Recycling tasks and the periodic matcher
//! - [`listing`] - Sale listings
//! - [`funding`] - Withdrawals and recharges

// Core types - must be first!
pub mod core_types;

pub mod config;
pub mod error;
pub mod fee;
pub mod logging;
pub mod models;

// Persistence
pub mod store;

// Money movement
pub mod funding;
pub mod ledger;
pub mod wallet;

// Market components
pub mod listing;
pub mod order;
pub mod recycler;
pub mod settlement;

// Convenient re-exports at crate root
pub use core_types::{DiamondAmount, ListingId, OrderId, TaskId, UserId};
pub use error::MarketError;
pub use listing::ListingService;
pub use models::{Caller, GameCredentials, Role};
pub use order::{BuyerAccount, OrderExecutor};
pub use recycler::{CycleReport, RecyclingMatcher, TaskService};
pub use settlement::{GatewayError, HttpSettlementGateway, SettlementGateway};
pub use store::{MarketStore, MarketTx, MemoryStore, PgMarketStore, StoreError};
pub use wallet::WalletGuard;
