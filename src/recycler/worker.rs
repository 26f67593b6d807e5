//! Recycling Matcher - periodic matching loop
//!
//! Each cycle walks the active listings cheapest first and, for every listing,
//! buys it on behalf of the oldest open task that accepts it whole. When that
//! match fails because of the task (funds, wallet, buyer account), the task
//! is dropped for the rest of the cycle and the listing is offered to the next
//! eligible task. Every match runs in its own transaction:
//!
//! ```text
//! lock task → re-check → OrderExecutor::execute_buy (wallets → listing → gateway)
//!   → record fill → commit
//! ```
//!
//! A failed match is logged and skipped; it never aborts the cycle.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RecyclerConfig;
use crate::core_types::{ListingId, TaskId};
use crate::error::MarketError;
use crate::models::{ListingStatus, Order, RecyclingTask, SaleListing, TaskStatus};
use crate::order::{BuyerAccount, OrderExecutor};
use crate::settlement::{GatewayError, SettlementGateway};
use crate::store::{MarketStore, MarketTx};

/// Outcome counters of one matcher cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub listings_scanned: usize,
    pub matched: usize,
    pub failed: usize,
    /// Listings withdrawn because the seller can no longer deliver
    pub delisted: usize,
    /// Listings left for the next cycle because the platform was unreachable
    pub skipped: usize,
}

/// Failures that say nothing about the task: the listing is gone, or the
/// attempt hit a transient condition. The listing waits for the next cycle
/// and the task keeps its place.
fn ends_listing(e: &MarketError) -> bool {
    matches!(
        e,
        MarketError::ListingUnavailable(_)
            | MarketError::LockTimeout
            | MarketError::Gateway(GatewayError::Unavailable(_))
    )
}

/// Result of the remote pre-check of a listing
enum SellerCheck {
    Deliverable,
    Undeliverable(String),
    Unknown(GatewayError),
}

pub struct RecyclingMatcher {
    store: Arc<dyn MarketStore>,
    gateway: Arc<dyn SettlementGateway>,
    executor: Arc<OrderExecutor>,
    interval: Duration,
    verify_seller_balance: bool,
}

impl RecyclingMatcher {
    pub fn new(
        store: Arc<dyn MarketStore>,
        gateway: Arc<dyn SettlementGateway>,
        executor: Arc<OrderExecutor>,
        config: &RecyclerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            executor,
            interval: Duration::from_secs(config.interval_secs),
            verify_seller_balance: config.verify_seller_balance,
        }
    }

    /// Run cycles until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// A cycle in progress always runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.interval, "Recycling matcher started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let sender_gone = tokio::select! {
                _ = ticker.tick() => false,
                changed = shutdown.changed() => changed.is_err(),
            };
            if sender_gone || *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(report) if report.listings_scanned > 0 => {
                    info!(
                        scanned = report.listings_scanned,
                        matched = report.matched,
                        failed = report.failed,
                        delisted = report.delisted,
                        skipped = report.skipped,
                        "Recycling cycle finished"
                    );
                }
                Ok(_) => debug!("Recycling cycle: nothing to match"),
                Err(e) => error!(error = %e, "Recycling cycle aborted"),
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!("Recycling matcher stopped");
    }

    /// One full pass over the active listings
    pub async fn run_once(&self) -> Result<CycleReport, MarketError> {
        let mut report = CycleReport::default();

        // oldest first
        let mut tasks = self.store.open_tasks().await?;
        if tasks.is_empty() {
            return Ok(report);
        }
        // cheapest first
        let listings = self.store.active_listings().await?;

        for listing in listings {
            if tasks.is_empty() {
                break;
            }
            report.listings_scanned += 1;

            if !tasks.iter().any(|t| t.accepts(&listing)) {
                continue;
            }

            if self.verify_seller_balance {
                match self.check_seller(&listing).await {
                    SellerCheck::Deliverable => {}
                    SellerCheck::Undeliverable(reason) => {
                        match self.delist(listing.id).await {
                            Ok(true) => {
                                report.delisted += 1;
                                info!(listing_id = listing.id, reason = %reason, "Listing delisted by matcher");
                            }
                            Ok(false) => {}
                            Err(e) => {
                                report.failed += 1;
                                warn!(listing_id = listing.id, error = %e, "Failed to delist listing");
                            }
                        }
                        continue;
                    }
                    SellerCheck::Unknown(e) => {
                        report.skipped += 1;
                        warn!(listing_id = listing.id, error = %e, "Seller balance unknown, skipping listing");
                        continue;
                    }
                }
            }

            // oldest eligible task first; a task whose match fails sits out
            // the rest of the cycle and the listing goes to the next one
            while let Some(idx) = tasks.iter().position(|t| t.accepts(&listing)) {
                let task_id = tasks[idx].id;
                match self.match_one(task_id, listing.id).await {
                    Ok((task, order)) => {
                        report.matched += 1;
                        info!(
                            task_id,
                            listing_id = listing.id,
                            order_number = %order.order_number,
                            diamonds = order.diamond_amount,
                            fulfilled = task.fulfilled_diamond_amount,
                            requested = task.requested_diamond_amount,
                            task_status = %task.status,
                            "Recycling match completed"
                        );
                        if task.status == TaskStatus::Open {
                            tasks[idx] = task;
                        } else {
                            tasks.remove(idx);
                        }
                        break;
                    }
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            task_id,
                            listing_id = listing.id,
                            code = e.code(),
                            error = %e,
                            "Recycling match failed"
                        );
                        if ends_listing(&e) {
                            break;
                        }
                        tasks.remove(idx);
                    }
                }
            }
        }

        Ok(report)
    }

    async fn check_seller(&self, listing: &SaleListing) -> SellerCheck {
        let account = match self.store.game_account(listing.linked_account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                return SellerCheck::Undeliverable(format!(
                    "game account {} missing",
                    listing.linked_account_id
                ));
            }
            Err(e) => return SellerCheck::Unknown(GatewayError::Unavailable(e.to_string())),
        };

        match self.gateway.query_diamond_balance(&account.credentials).await {
            Ok(balance) if balance >= listing.diamond_amount => SellerCheck::Deliverable,
            Ok(balance) => SellerCheck::Undeliverable(format!(
                "seller holds {} diamonds, listing needs {}",
                balance, listing.diamond_amount
            )),
            Err(GatewayError::AccountInvalid { code, message }) => {
                SellerCheck::Undeliverable(format!("account rejected ({}): {}", code, message))
            }
            Err(e) => SellerCheck::Unknown(e),
        }
    }

    /// Delist in a transaction of its own; `false` if it was no longer active
    async fn delist(&self, listing_id: ListingId) -> Result<bool, MarketError> {
        let mut tx = self.store.begin().await?;
        match tx.lock_listing(listing_id).await? {
            Some(l) if l.status == ListingStatus::Active => {
                tx.set_listing_status(listing_id, ListingStatus::Delisted)
                    .await?;
                tx.commit().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn match_one(
        &self,
        task_id: TaskId,
        listing_id: ListingId,
    ) -> Result<(RecyclingTask, Order), MarketError> {
        let mut tx = self.store.begin().await?;

        match self.match_in(tx.as_mut(), task_id, listing_id).await {
            Ok((task, order)) => {
                if let Err(e) = tx.commit().await {
                    error!(
                        target: "settlement",
                        order_number = %order.order_number,
                        settlement_ref = ?order.external_settlement_ref,
                        error = %e,
                        "Settled remotely but local commit failed"
                    );
                    return Err(e.into());
                }
                Ok((task, order))
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    error!(task_id, listing_id, error = %rb, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn match_in(
        &self,
        tx: &mut dyn MarketTx,
        task_id: TaskId,
        listing_id: ListingId,
    ) -> Result<(RecyclingTask, Order), MarketError> {
        // task first: a concurrent stop either finished or waits for us
        let mut task = tx
            .lock_task(task_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("recycling task {}", task_id)))?;
        if task.status != TaskStatus::Open {
            return Err(MarketError::InvalidStateTransition(format!(
                "task {} is {}",
                task_id, task.status
            )));
        }

        let listing = tx
            .get_listing(listing_id)
            .await?
            .ok_or(MarketError::ListingUnavailable(listing_id))?;
        if !task.accepts(&listing) {
            return Err(MarketError::ListingUnavailable(listing_id));
        }

        let order = self
            .executor
            .execute_buy(
                tx,
                task.buyer_id,
                listing_id,
                &BuyerAccount::Linked(task.linked_account_id),
            )
            .await?;

        if !task.record_fill(order.diamond_amount) {
            return Err(MarketError::Inconsistent(format!(
                "task {} cannot absorb {} diamonds",
                task_id, order.diamond_amount
            )));
        }
        tx.save_task(&task).await?;
        Ok((task, order))
    }
}
