//! Market data model
//!
//! Rows owned by the store: wallets, ledger entries, sale listings, orders,
//! recycling tasks, linked game accounts and funding records.
//!
//! Status ids are stored as `SMALLINT` and must not be renumbered.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::core_types::{
    DiamondAmount, GameAccountId, LedgerEntryId, ListingId, OrderId, RechargeId, TaskId, UserId,
    WithdrawalId,
};

/// Generates `id`/`from_id`/`as_str`, `Display` and `TryFrom<i16>` for a
/// status enum with explicit discriminants.
macro_rules! status_enum {
    ($name:ident { $($variant:ident = $id:literal => $label:literal),+ $(,)? }) => {
        impl $name {
            /// Numeric id for storage
            #[inline]
            pub fn id(&self) -> i16 {
                *self as i16
            }

            /// Convert from a stored id
            pub fn from_id(id: i16) -> Option<Self> {
                match id {
                    $($id => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Human-readable name
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl TryFrom<i16> for $name {
            type Error = i16;

            fn try_from(value: i16) -> Result<Self, Self::Error> {
                $name::from_id(value).ok_or(value)
            }
        }
    };
}

// ============================================================
// IDENTITY
// ============================================================

/// Role flag of an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Buyer,
    Staff,
}

/// Identity supplied (and already validated) by the external caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn buyer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Buyer,
        }
    }

    pub fn staff(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Staff,
        }
    }

    #[inline]
    pub fn is_staff(&self) -> bool {
        self.role == Role::Staff
    }

    /// Whether this caller may act on a row owned by `owner`
    #[inline]
    pub fn may_act_for(&self, owner: UserId) -> bool {
        self.is_staff() || self.user_id == owner
    }
}

// ============================================================
// WALLET & LEDGER
// ============================================================

/// Per-user wallet. Mutated only while its row lock is held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub available_balance: Decimal,
    pub frozen_balance: Decimal,
}

impl Wallet {
    /// A freshly registered, empty wallet
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            available_balance: Decimal::ZERO,
            frozen_balance: Decimal::ZERO,
        }
    }
}

/// Reason code of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum LedgerReason {
    Recharge = 1,
    Withdraw = 2,
    PurchaseDebit = 3,
    SaleCredit = 4,
    ServiceFee = 5,
    WithdrawRefund = 6,
}

status_enum!(LedgerReason {
    Recharge = 1 => "RECHARGE",
    Withdraw = 2 => "WITHDRAW",
    PurchaseDebit = 3 => "PURCHASE_DEBIT",
    SaleCredit = 4 => "SALE_CREDIT",
    ServiceFee = 5 => "SERVICE_FEE",
    WithdrawRefund = 6 => "WITHDRAW_REFUND",
});

/// Immutable record of one change to a wallet's available balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    pub change_amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reason: LedgerReason,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// `balance_after == balance_before + change_amount`
    #[inline]
    pub fn is_balanced(&self) -> bool {
        self.balance_before + self.change_amount == self.balance_after
    }
}

/// Ledger entry before the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub user_id: UserId,
    pub change_amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub reason: LedgerReason,
    pub note: String,
}

// ============================================================
// GAME ACCOUNTS
// ============================================================

/// Login for the external game platform
#[derive(Clone, PartialEq, Eq)]
pub struct GameCredentials {
    pub game_type: String,
    pub login_name: String,
    pub password: String,
}

impl GameCredentials {
    pub fn new(
        game_type: impl Into<String>,
        login_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            game_type: game_type.into(),
            login_name: login_name.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.game_type.trim().is_empty()
            && !self.login_name.trim().is_empty()
            && !self.password.is_empty()
    }
}

impl fmt::Debug for GameCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameCredentials")
            .field("game_type", &self.game_type)
            .field("login_name", &self.login_name)
            .field("password", &"***")
            .finish()
    }
}

/// Game-platform account linked to a market user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameAccount {
    pub id: GameAccountId,
    pub user_id: UserId,
    pub credentials: GameCredentials,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// SALE LISTINGS
// ============================================================

/// Sale listing lifecycle: `Active → Sold | Delisted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum ListingStatus {
    Active = 1,
    /// Terminal: matched by exactly one order
    Sold = 2,
    /// Terminal: withdrawn by seller, staff or the matcher
    Delisted = 3,
}

status_enum!(ListingStatus {
    Active = 1 => "ACTIVE",
    Sold = 2 => "SOLD",
    Delisted = 3 => "DELISTED",
});

impl ListingStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ListingStatus::Active)
    }
}

/// Offer to sell a fixed diamond quantity at a fixed unit price
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleListing {
    pub id: ListingId,
    pub seller_id: UserId,
    pub linked_account_id: GameAccountId,
    pub diamond_amount: DiamondAmount,
    pub unit_price: Decimal,
    /// Fixed at creation, never recomputed
    pub total_price: Decimal,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

/// Listing before the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSaleListing {
    pub seller_id: UserId,
    pub linked_account_id: GameAccountId,
    pub diamond_amount: DiamondAmount,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl NewSaleListing {
    pub fn new(
        seller_id: UserId,
        linked_account_id: GameAccountId,
        diamond_amount: DiamondAmount,
        unit_price: Decimal,
    ) -> Self {
        Self {
            seller_id,
            linked_account_id,
            diamond_amount,
            unit_price,
            total_price: Decimal::from(diamond_amount) * unit_price,
        }
    }
}

// ============================================================
// ORDERS
// ============================================================

/// Order settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum OrderStatus {
    /// Local funds moved, game platform not yet confirmed
    PendingSettlement = 0,
    /// Game platform confirmed the diamond transfer
    Settled = 1,
}

status_enum!(OrderStatus {
    PendingSettlement = 0 => "PENDING_SETTLEMENT",
    Settled = 1 => "SETTLED",
});

/// Historical fact of one purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub listing_id: ListingId,
    pub buyer_account_id: GameAccountId,
    pub seller_account_id: GameAccountId,
    pub diamond_amount: DiamondAmount,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub external_settlement_ref: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Order before the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order_number: String,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub listing_id: ListingId,
    pub buyer_account_id: GameAccountId,
    pub seller_account_id: GameAccountId,
    pub diamond_amount: DiamondAmount,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

// ============================================================
// RECYCLING TASKS
// ============================================================

/// Recycling task status
///
/// `Open → Fulfilled` by the matcher, `Open → Stopped` by the user.
/// `PartiallyFulfilled` exists in stored data but is never produced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum TaskStatus {
    Open = 0,
    Fulfilled = 1,
    PartiallyFulfilled = 2,
    Stopped = -1,
}

status_enum!(TaskStatus {
    Open = 0 => "OPEN",
    Fulfilled = 1 => "FULFILLED",
    PartiallyFulfilled = 2 => "PARTIALLY_FULFILLED",
    Stopped = -1 => "STOPPED",
});

impl TaskStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Fulfilled | TaskStatus::Stopped)
    }
}

/// Standing buy order matched automatically against listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecyclingTask {
    pub id: TaskId,
    pub buyer_id: UserId,
    /// Buyer's game account, reused by every purchase of this task
    pub linked_account_id: GameAccountId,
    pub requested_diamond_amount: DiamondAmount,
    pub fulfilled_diamond_amount: DiamondAmount,
    pub min_unit_price: Decimal,
    pub max_unit_price: Decimal,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl RecyclingTask {
    /// Diamonds still wanted
    #[inline]
    pub fn remaining(&self) -> DiamondAmount {
        (self.requested_diamond_amount - self.fulfilled_diamond_amount).max(0)
    }

    /// Whether this task may buy the whole of `listing`
    pub fn accepts(&self, listing: &SaleListing) -> bool {
        self.status == TaskStatus::Open
            && listing.status == ListingStatus::Active
            && listing.seller_id != self.buyer_id
            && self.min_unit_price <= listing.unit_price
            && listing.unit_price <= self.max_unit_price
            && self.remaining() >= listing.diamond_amount
    }

    /// Account for a completed purchase of `amount` diamonds.
    ///
    /// Returns `false` (and changes nothing) if the fill would overshoot.
    pub fn record_fill(&mut self, amount: DiamondAmount) -> bool {
        if self.status != TaskStatus::Open || amount <= 0 || amount > self.remaining() {
            return false;
        }
        self.fulfilled_diamond_amount += amount;
        if self.fulfilled_diamond_amount >= self.requested_diamond_amount {
            self.status = TaskStatus::Fulfilled;
        }
        true
    }
}

/// Task before the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecyclingTask {
    pub buyer_id: UserId,
    pub linked_account_id: GameAccountId,
    pub requested_diamond_amount: DiamondAmount,
    pub min_unit_price: Decimal,
    pub max_unit_price: Decimal,
}

// ============================================================
// FUNDING RECORDS
// ============================================================

/// Withdrawal lifecycle: `Pending → Processing → Completed | Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum WithdrawalStatus {
    Pending = 0,
    Processing = 1,
    /// Terminal: paid out, frozen funds consumed
    Completed = 2,
    /// Terminal: refused, frozen funds returned to available
    Closed = 3,
}

status_enum!(WithdrawalStatus {
    Pending = 0 => "PENDING",
    Processing = 1 => "PROCESSING",
    Completed = 2 => "COMPLETED",
    Closed = 3 => "CLOSED",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub order_number: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub pay_channel: String,
    pub payee_name: String,
    pub pay_info: String,
    pub remark: String,
    pub status: WithdrawalStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWithdrawal {
    pub order_number: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub pay_channel: String,
    pub payee_name: String,
    pub pay_info: String,
}

/// Recharge lifecycle: `Pending → Paid`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum RechargeStatus {
    Pending = 0,
    Paid = 1,
}

status_enum!(RechargeStatus {
    Pending = 0 => "PENDING",
    Paid = 1 => "PAID",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RechargeChannel {
    /// On-chain transfer matched by `pay_amount`
    Usdt,
    /// Staff credit, paid immediately
    Manual,
}

impl RechargeChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RechargeChannel::Usdt => "usdt",
            RechargeChannel::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "usdt" => Some(RechargeChannel::Usdt),
            "manual" => Some(RechargeChannel::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recharge {
    pub id: RechargeId,
    pub order_number: String,
    pub user_id: UserId,
    /// Amount credited to the wallet
    pub amount: Decimal,
    /// Amount the payer must send (unique per pending USDT recharge)
    pub pay_amount: Decimal,
    pub channel: RechargeChannel,
    pub status: RechargeStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecharge {
    pub order_number: String,
    pub user_id: UserId,
    pub amount: Decimal,
    pub pay_amount: Decimal,
    pub channel: RechargeChannel,
    pub status: RechargeStatus,
}

/// Generate a unique, time-sortable business number such as `OD01J...`
pub fn business_number(prefix: &str) -> String {
    format!("{}{}", prefix, ulid::Ulid::new())
}
