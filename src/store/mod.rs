//! Market Store
//!
//! Persistence seam of the market core. A [`MarketStore`] hands out
//! [`MarketTx`] transactions; every write happens inside one.
//!
//! # Locking contract
//!
//! - `lock_*` methods take an exclusive row lock (`SELECT ... FOR UPDATE`)
//!   held until commit or rollback, waiting at most the configured lock
//!   timeout before failing with [`StoreError::LockTimeout`].
//! - `save_*` / status updates are only accepted for rows locked or inserted by
//!   the same transaction ([`StoreError::NotLocked`] otherwise), so a row can
//!   never be written from an unlocked read.
//! - Dropping a transaction without `commit` rolls it back.
//!
//! # Global lock order
//!
//! ```text
//! recycling task → wallets (ascending user id) → sale listing → withdrawal / recharge
//! ```

pub mod memory;
pub mod postgres;
pub mod schema;

pub use memory::MemoryStore;
pub use postgres::PgMarketStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::core_types::{
    GameAccountId, ListingId, OrderId, RechargeId, TaskId, UserId, WithdrawalId,
};
use crate::models::{
    GameAccount, GameCredentials, LedgerEntry, ListingStatus, NewLedgerEntry, NewOrder,
    NewRecharge, NewRecyclingTask, NewSaleListing, NewWithdrawal, Order, Recharge,
    RecyclingTask, SaleListing, Wallet, Withdrawal, WithdrawalStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lock wait timed out")]
    LockTimeout,

    #[error("Row {0:?} is not locked by this transaction")]
    NotLocked(RowKey),

    #[error("Row not found: {0:?}")]
    RowNotFound(RowKey),

    #[error("Transaction already finished")]
    Closed,

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Identity of a lockable row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    Wallet(UserId),
    Listing(ListingId),
    Order(OrderId),
    Task(TaskId),
    Withdrawal(WithdrawalId),
    Recharge(RechargeId),
}

/// One atomic unit of work
#[async_trait]
pub trait MarketTx: Send {
    // === Wallets & ledger ===
    async fn lock_wallet(&mut self, user_id: UserId) -> Result<Option<Wallet>, StoreError>;
    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError>;
    async fn insert_ledger_entry(
        &mut self,
        entry: NewLedgerEntry,
    ) -> Result<LedgerEntry, StoreError>;

    // === Listings ===
    /// Plain read (no lock)
    async fn get_listing(&mut self, id: ListingId) -> Result<Option<SaleListing>, StoreError>;
    async fn lock_listing(&mut self, id: ListingId) -> Result<Option<SaleListing>, StoreError>;
    async fn insert_listing(&mut self, listing: NewSaleListing)
    -> Result<SaleListing, StoreError>;
    async fn set_listing_status(
        &mut self,
        id: ListingId,
        status: ListingStatus,
    ) -> Result<(), StoreError>;

    // === Game accounts ===
    async fn insert_game_account(
        &mut self,
        user_id: UserId,
        credentials: &GameCredentials,
    ) -> Result<GameAccount, StoreError>;
    async fn get_game_account(
        &mut self,
        id: GameAccountId,
    ) -> Result<Option<GameAccount>, StoreError>;

    // === Orders ===
    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError>;
    async fn mark_order_settled(
        &mut self,
        id: OrderId,
        settlement_ref: &str,
    ) -> Result<(), StoreError>;

    // === Recycling tasks ===
    async fn insert_task(&mut self, task: NewRecyclingTask) -> Result<RecyclingTask, StoreError>;
    async fn lock_task(&mut self, id: TaskId) -> Result<Option<RecyclingTask>, StoreError>;
    /// Persists status and fulfilled amount
    async fn save_task(&mut self, task: &RecyclingTask) -> Result<(), StoreError>;

    // === Funding ===
    async fn insert_withdrawal(
        &mut self,
        withdrawal: NewWithdrawal,
    ) -> Result<Withdrawal, StoreError>;
    /// Plain read (no lock)
    async fn get_withdrawal(&mut self, id: WithdrawalId)
    -> Result<Option<Withdrawal>, StoreError>;
    async fn lock_withdrawal(
        &mut self,
        id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, StoreError>;
    /// Persists status and remark
    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), StoreError>;

    async fn insert_recharge(&mut self, recharge: NewRecharge) -> Result<Recharge, StoreError>;
    /// Plain read (no lock)
    async fn find_recharge(&mut self, order_number: &str)
    -> Result<Option<Recharge>, StoreError>;
    async fn lock_recharge(&mut self, id: RechargeId) -> Result<Option<Recharge>, StoreError>;
    /// Persists status
    async fn save_recharge(&mut self, recharge: &Recharge) -> Result<(), StoreError>;

    // === Boundary ===
    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

/// Transaction factory plus committed-state queries
#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn MarketTx>, StoreError>;

    /// Create the wallet of a newly registered user (idempotent)
    async fn open_wallet(&self, user_id: UserId) -> Result<Wallet, StoreError>;
    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>, StoreError>;
    /// Ledger of one user in insertion order
    async fn ledger_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError>;

    async fn listing(&self, id: ListingId) -> Result<Option<SaleListing>, StoreError>;
    /// Active listings, cheapest unit price first, ties by id
    async fn active_listings(&self) -> Result<Vec<SaleListing>, StoreError>;
    /// Active listings of one seller, newest first
    async fn listings_of(&self, seller_id: UserId) -> Result<Vec<SaleListing>, StoreError>;

    async fn game_account(&self, id: GameAccountId) -> Result<Option<GameAccount>, StoreError>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError>;
    async fn orders_bought(&self, buyer_id: UserId) -> Result<Vec<Order>, StoreError>;
    async fn orders_sold(&self, seller_id: UserId) -> Result<Vec<Order>, StoreError>;

    async fn task(&self, id: TaskId) -> Result<Option<RecyclingTask>, StoreError>;
    /// Open tasks, oldest first
    async fn open_tasks(&self) -> Result<Vec<RecyclingTask>, StoreError>;
    async fn tasks_of(&self, buyer_id: UserId) -> Result<Vec<RecyclingTask>, StoreError>;

    /// All withdrawals (optionally of one status), oldest first
    async fn withdrawals(
        &self,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, StoreError>;
    async fn withdrawals_of(&self, user_id: UserId) -> Result<Vec<Withdrawal>, StoreError>;
    async fn recharges_of(&self, user_id: UserId) -> Result<Vec<Recharge>, StoreError>;
}
