//! In-process store
//!
//! Same locking contract as the Postgres store: row locks are per-row async
//! mutexes held by the transaction until it finishes, writes are staged in the
//! transaction and merged into the committed tables on `commit`. Used by the
//! test suites and for running the market without a database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{MarketStore, MarketTx, RowKey, StoreError};
use crate::core_types::{
    GameAccountId, LedgerEntryId, ListingId, OrderId, RechargeId, TaskId, UserId, WithdrawalId,
};
use crate::models::{
    GameAccount, GameCredentials, LedgerEntry, LedgerReason, ListingStatus, NewLedgerEntry,
    NewOrder, NewRecharge, NewRecyclingTask, NewSaleListing, NewWithdrawal, Order, OrderStatus,
    Recharge, RecyclingTask, SaleListing, TaskStatus, Wallet, Withdrawal, WithdrawalStatus,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone)]
struct Tables {
    wallets: BTreeMap<UserId, Wallet>,
    ledger: BTreeMap<LedgerEntryId, LedgerEntry>,
    listings: BTreeMap<ListingId, SaleListing>,
    game_accounts: BTreeMap<GameAccountId, GameAccount>,
    orders: BTreeMap<OrderId, Order>,
    tasks: BTreeMap<TaskId, RecyclingTask>,
    withdrawals: BTreeMap<WithdrawalId, Withdrawal>,
    recharges: BTreeMap<RechargeId, Recharge>,
}

impl Tables {
    fn merge(&mut self, staged: Tables) {
        self.wallets.extend(staged.wallets);
        self.ledger.extend(staged.ledger);
        self.listings.extend(staged.listings);
        self.game_accounts.extend(staged.game_accounts);
        self.orders.extend(staged.orders);
        self.tasks.extend(staged.tasks);
        self.withdrawals.extend(staged.withdrawals);
        self.recharges.extend(staged.recharges);
    }
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: DashMap<RowKey, Arc<Mutex<()>>>,
    next_id: AtomicI64,
    lock_timeout: Duration,
}

impl Shared {
    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: DashMap::new(),
                next_id: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    /// Open a wallet holding `available` with a matching opening ledger entry
    pub async fn seed_wallet(
        &self,
        user_id: UserId,
        available: Decimal,
    ) -> Result<Wallet, StoreError> {
        self.open_wallet(user_id).await?;
        let mut tx = self.begin().await?;
        let mut wallet = tx
            .lock_wallet(user_id)
            .await?
            .ok_or(StoreError::RowNotFound(RowKey::Wallet(user_id)))?;
        let before = wallet.available_balance;
        wallet.available_balance += available;
        tx.save_wallet(&wallet).await?;
        tx.insert_ledger_entry(NewLedgerEntry {
            user_id,
            change_amount: available,
            balance_before: before,
            balance_after: wallet.available_balance,
            reason: LedgerReason::Recharge,
            note: "opening balance".into(),
        })
        .await?;
        tx.commit().await?;
        Ok(wallet)
    }

    /// Insert a game account outside any business operation
    pub async fn seed_game_account(
        &self,
        user_id: UserId,
        credentials: GameCredentials,
    ) -> Result<GameAccount, StoreError> {
        let mut tx = self.begin().await?;
        let account = tx.insert_game_account(user_id, &credentials).await?;
        tx.commit().await?;
        Ok(account)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemoryTx {
    shared: Arc<Shared>,
    staged: Tables,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
    /// Rows locked or inserted by this transaction
    writable: HashSet<RowKey>,
    finished: bool,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self, key: RowKey) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.writable.contains(&key) {
            Ok(())
        } else {
            Err(StoreError::NotLocked(key))
        }
    }

    async fn acquire(&mut self, key: RowKey) -> Result<(), StoreError> {
        self.ensure_open()?;
        if self.guards.contains_key(&key) {
            return Ok(());
        }
        let mutex = Arc::clone(&self.shared.row_locks.entry(key).or_default());
        let guard = tokio::time::timeout(self.shared.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;
        self.guards.insert(key, guard);
        self.writable.insert(key);
        Ok(())
    }

    fn release(&mut self, key: RowKey) {
        self.guards.remove(&key);
        self.writable.remove(&key);
    }

    /// Staged row if any, else the committed one
    async fn overlay<K: Ord, T: Clone>(
        &self,
        id: K,
        pick: fn(&Tables) -> &BTreeMap<K, T>,
    ) -> Option<T> {
        if let Some(row) = pick(&self.staged).get(&id) {
            return Some(row.clone());
        }
        let tables = self.shared.tables.lock().await;
        pick(&*tables).get(&id).cloned()
    }

    /// Lock `key` and read the row; a missing row releases the lock again
    async fn lock_row<K: Ord, T: Clone>(
        &mut self,
        key: RowKey,
        id: K,
        pick: fn(&Tables) -> &BTreeMap<K, T>,
    ) -> Result<Option<T>, StoreError> {
        self.acquire(key).await?;
        let row = self.overlay(id, pick).await;
        if row.is_none() {
            self.release(key);
        }
        Ok(row)
    }

    fn finish(&mut self) {
        self.finished = true;
        self.staged = Tables::default();
        self.guards.clear();
        self.writable.clear();
    }
}

#[async_trait]
impl MarketTx for MemoryTx {
    async fn lock_wallet(&mut self, user_id: UserId) -> Result<Option<Wallet>, StoreError> {
        self.lock_row(RowKey::Wallet(user_id), user_id, |t| &t.wallets)
            .await
    }

    async fn save_wallet(&mut self, wallet: &Wallet) -> Result<(), StoreError> {
        self.ensure_writable(RowKey::Wallet(wallet.user_id))?;
        self.staged.wallets.insert(wallet.user_id, wallet.clone());
        Ok(())
    }

    async fn insert_ledger_entry(
        &mut self,
        entry: NewLedgerEntry,
    ) -> Result<LedgerEntry, StoreError> {
        self.ensure_writable(RowKey::Wallet(entry.user_id))?;
        let row = LedgerEntry {
            id: self.shared.next_id(),
            user_id: entry.user_id,
            change_amount: entry.change_amount,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            reason: entry.reason,
            note: entry.note,
            created_at: Utc::now(),
        };
        self.staged.ledger.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_listing(&mut self, id: ListingId) -> Result<Option<SaleListing>, StoreError> {
        self.ensure_open()?;
        Ok(self.overlay(id, |t| &t.listings).await)
    }

    async fn lock_listing(&mut self, id: ListingId) -> Result<Option<SaleListing>, StoreError> {
        self.lock_row(RowKey::Listing(id), id, |t| &t.listings)
            .await
    }

    async fn insert_listing(
        &mut self,
        listing: NewSaleListing,
    ) -> Result<SaleListing, StoreError> {
        self.ensure_open()?;
        let row = SaleListing {
            id: self.shared.next_id(),
            seller_id: listing.seller_id,
            linked_account_id: listing.linked_account_id,
            diamond_amount: listing.diamond_amount,
            unit_price: listing.unit_price,
            total_price: listing.total_price,
            status: ListingStatus::Active,
            created_at: Utc::now(),
        };
        self.staged.listings.insert(row.id, row.clone());
        self.writable.insert(RowKey::Listing(row.id));
        Ok(row)
    }

    async fn set_listing_status(
        &mut self,
        id: ListingId,
        status: ListingStatus,
    ) -> Result<(), StoreError> {
        let key = RowKey::Listing(id);
        self.ensure_writable(key)?;
        let mut row = self
            .overlay(id, |t| &t.listings)
            .await
            .ok_or(StoreError::RowNotFound(key))?;
        row.status = status;
        self.staged.listings.insert(id, row);
        Ok(())
    }

    async fn insert_game_account(
        &mut self,
        user_id: UserId,
        credentials: &GameCredentials,
    ) -> Result<GameAccount, StoreError> {
        self.ensure_open()?;
        let row = GameAccount {
            id: self.shared.next_id(),
            user_id,
            credentials: credentials.clone(),
            created_at: Utc::now(),
        };
        self.staged.game_accounts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_game_account(
        &mut self,
        id: GameAccountId,
    ) -> Result<Option<GameAccount>, StoreError> {
        self.ensure_open()?;
        Ok(self.overlay(id, |t| &t.game_accounts).await)
    }

    async fn insert_order(&mut self, order: NewOrder) -> Result<Order, StoreError> {
        self.ensure_open()?;
        let row = Order {
            id: self.shared.next_id(),
            order_number: order.order_number,
            buyer_id: order.buyer_id,
            seller_id: order.seller_id,
            listing_id: order.listing_id,
            buyer_account_id: order.buyer_account_id,
            seller_account_id: order.seller_account_id,
            diamond_amount: order.diamond_amount,
            unit_price: order.unit_price,
            total_price: order.total_price,
            external_settlement_ref: None,
            status: OrderStatus::PendingSettlement,
            created_at: Utc::now(),
        };
        self.staged.orders.insert(row.id, row.clone());
        self.writable.insert(RowKey::Order(row.id));
        Ok(row)
    }

    async fn mark_order_settled(
        &mut self,
        id: OrderId,
        settlement_ref: &str,
    ) -> Result<(), StoreError> {
        let key = RowKey::Order(id);
        self.ensure_writable(key)?;
        let mut row = self
            .overlay(id, |t| &t.orders)
            .await
            .ok_or(StoreError::RowNotFound(key))?;
        row.external_settlement_ref = Some(settlement_ref.to_string());
        row.status = OrderStatus::Settled;
        self.staged.orders.insert(id, row);
        Ok(())
    }

    async fn insert_task(&mut self, task: NewRecyclingTask) -> Result<RecyclingTask, StoreError> {
        self.ensure_open()?;
        let row = RecyclingTask {
            id: self.shared.next_id(),
            buyer_id: task.buyer_id,
            linked_account_id: task.linked_account_id,
            requested_diamond_amount: task.requested_diamond_amount,
            fulfilled_diamond_amount: 0,
            min_unit_price: task.min_unit_price,
            max_unit_price: task.max_unit_price,
            status: TaskStatus::Open,
            created_at: Utc::now(),
        };
        self.staged.tasks.insert(row.id, row.clone());
        self.writable.insert(RowKey::Task(row.id));
        Ok(row)
    }

    async fn lock_task(&mut self, id: TaskId) -> Result<Option<RecyclingTask>, StoreError> {
        self.lock_row(RowKey::Task(id), id, |t| &t.tasks).await
    }

    async fn save_task(&mut self, task: &RecyclingTask) -> Result<(), StoreError> {
        let key = RowKey::Task(task.id);
        self.ensure_writable(key)?;
        let mut row = self
            .overlay(task.id, |t| &t.tasks)
            .await
            .ok_or(StoreError::RowNotFound(key))?;
        row.status = task.status;
        row.fulfilled_diamond_amount = task.fulfilled_diamond_amount;
        self.staged.tasks.insert(task.id, row);
        Ok(())
    }

    async fn insert_withdrawal(
        &mut self,
        withdrawal: NewWithdrawal,
    ) -> Result<Withdrawal, StoreError> {
        self.ensure_open()?;
        let row = Withdrawal {
            id: self.shared.next_id(),
            order_number: withdrawal.order_number,
            user_id: withdrawal.user_id,
            amount: withdrawal.amount,
            pay_channel: withdrawal.pay_channel,
            payee_name: withdrawal.payee_name,
            pay_info: withdrawal.pay_info,
            remark: String::new(),
            status: WithdrawalStatus::Pending,
            created_at: Utc::now(),
        };
        self.staged.withdrawals.insert(row.id, row.clone());
        self.writable.insert(RowKey::Withdrawal(row.id));
        Ok(row)
    }

    async fn get_withdrawal(
        &mut self,
        id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, StoreError> {
        self.ensure_open()?;
        Ok(self.overlay(id, |t| &t.withdrawals).await)
    }

    async fn lock_withdrawal(
        &mut self,
        id: WithdrawalId,
    ) -> Result<Option<Withdrawal>, StoreError> {
        self.lock_row(RowKey::Withdrawal(id), id, |t| &t.withdrawals)
            .await
    }

    async fn save_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<(), StoreError> {
        let key = RowKey::Withdrawal(withdrawal.id);
        self.ensure_writable(key)?;
        let mut row = self
            .overlay(withdrawal.id, |t| &t.withdrawals)
            .await
            .ok_or(StoreError::RowNotFound(key))?;
        row.status = withdrawal.status;
        row.remark = withdrawal.remark.clone();
        self.staged.withdrawals.insert(withdrawal.id, row);
        Ok(())
    }

    async fn insert_recharge(&mut self, recharge: NewRecharge) -> Result<Recharge, StoreError> {
        self.ensure_open()?;
        let row = Recharge {
            id: self.shared.next_id(),
            order_number: recharge.order_number,
            user_id: recharge.user_id,
            amount: recharge.amount,
            pay_amount: recharge.pay_amount,
            channel: recharge.channel,
            status: recharge.status,
            created_at: Utc::now(),
        };
        self.staged.recharges.insert(row.id, row.clone());
        self.writable.insert(RowKey::Recharge(row.id));
        Ok(row)
    }

    async fn find_recharge(
        &mut self,
        order_number: &str,
    ) -> Result<Option<Recharge>, StoreError> {
        self.ensure_open()?;
        if let Some(row) = self
            .staged
            .recharges
            .values()
            .find(|r| r.order_number == order_number)
        {
            return Ok(Some(row.clone()));
        }
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .recharges
            .values()
            .find(|r| r.order_number == order_number)
            .cloned())
    }

    async fn lock_recharge(&mut self, id: RechargeId) -> Result<Option<Recharge>, StoreError> {
        self.lock_row(RowKey::Recharge(id), id, |t| &t.recharges)
            .await
    }

    async fn save_recharge(&mut self, recharge: &Recharge) -> Result<(), StoreError> {
        let key = RowKey::Recharge(recharge.id);
        self.ensure_writable(key)?;
        let mut row = self
            .overlay(recharge.id, |t| &t.recharges)
            .await
            .ok_or(StoreError::RowNotFound(key))?;
        row.status = recharge.status;
        self.staged.recharges.insert(recharge.id, row);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let staged = std::mem::take(&mut self.staged);
        // merge before any row lock is released
        self.shared.tables.lock().await.merge(staged);
        self.finish();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if !self.finished {
            self.finish();
        }
        Ok(())
    }
}

fn newest_first<T>(mut rows: Vec<T>, id: fn(&T) -> i64) -> Vec<T> {
    rows.sort_by_key(|r| std::cmp::Reverse(id(r)));
    rows
}

#[async_trait]
impl MarketStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn MarketTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            staged: Tables::default(),
            guards: HashMap::new(),
            writable: HashSet::new(),
            finished: false,
        }))
    }

    async fn open_wallet(&self, user_id: UserId) -> Result<Wallet, StoreError> {
        let mut tables = self.shared.tables.lock().await;
        Ok(tables
            .wallets
            .entry(user_id)
            .or_insert_with(|| Wallet::empty(user_id))
            .clone())
    }

    async fn wallet(&self, user_id: UserId) -> Result<Option<Wallet>, StoreError> {
        Ok(self.shared.tables.lock().await.wallets.get(&user_id).cloned())
    }

    async fn ledger_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>, StoreError> {
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .ledger
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn listing(&self, id: ListingId) -> Result<Option<SaleListing>, StoreError> {
        Ok(self.shared.tables.lock().await.listings.get(&id).cloned())
    }

    async fn active_listings(&self) -> Result<Vec<SaleListing>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let mut rows: Vec<SaleListing> = tables
            .listings
            .values()
            .filter(|l| l.status == ListingStatus::Active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.unit_price.cmp(&b.unit_price).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn listings_of(&self, seller_id: UserId) -> Result<Vec<SaleListing>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let rows: Vec<SaleListing> = tables
            .listings
            .values()
            .filter(|l| l.seller_id == seller_id && l.status == ListingStatus::Active)
            .cloned()
            .collect();
        Ok(newest_first(rows, |l| l.id))
    }

    async fn game_account(&self, id: GameAccountId) -> Result<Option<GameAccount>, StoreError> {
        Ok(self.shared.tables.lock().await.game_accounts.get(&id).cloned())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.shared.tables.lock().await.orders.get(&id).cloned())
    }

    async fn orders_bought(&self, buyer_id: UserId) -> Result<Vec<Order>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let rows: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.buyer_id == buyer_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |o| o.id))
    }

    async fn orders_sold(&self, seller_id: UserId) -> Result<Vec<Order>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let rows: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| o.seller_id == seller_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |o| o.id))
    }

    async fn task(&self, id: TaskId) -> Result<Option<RecyclingTask>, StoreError> {
        Ok(self.shared.tables.lock().await.tasks.get(&id).cloned())
    }

    async fn open_tasks(&self) -> Result<Vec<RecyclingTask>, StoreError> {
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Open)
            .cloned()
            .collect())
    }

    async fn tasks_of(&self, buyer_id: UserId) -> Result<Vec<RecyclingTask>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let rows: Vec<RecyclingTask> = tables
            .tasks
            .values()
            .filter(|t| t.buyer_id == buyer_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |t| t.id))
    }

    async fn withdrawals(
        &self,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, StoreError> {
        let tables = self.shared.tables.lock().await;
        Ok(tables
            .withdrawals
            .values()
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect())
    }

    async fn withdrawals_of(&self, user_id: UserId) -> Result<Vec<Withdrawal>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let rows: Vec<Withdrawal> = tables
            .withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |w| w.id))
    }

    async fn recharges_of(&self, user_id: UserId) -> Result<Vec<Recharge>, StoreError> {
        let tables = self.shared.tables.lock().await;
        let rows: Vec<Recharge> = tables
            .recharges
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(rows, |r| r.id))
    }
}
