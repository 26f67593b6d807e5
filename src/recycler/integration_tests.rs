//! Integration Tests for the Recycling Matcher

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;

use crate::config::RecyclerConfig;
use crate::core_types::{DiamondAmount, UserId};
use crate::ledger::audit_wallet;
use crate::models::{
    Caller, GameCredentials, ListingStatus, NewSaleListing, RecyclingTask, SaleListing, TaskStatus,
};
use crate::order::OrderExecutor;
use crate::recycler::{CycleReport, RecyclingMatcher, TaskService};
use crate::settlement::{GatewayError, MockGateway};
use crate::store::{MarketStore, MemoryStore};

const SELLER: UserId = 1;
const BUYER_A: UserId = 2;
const BUYER_B: UserId = 3;

fn creds(login: &str) -> GameCredentials {
    GameCredentials::new("ag", login, "secret")
}

struct TestHarness {
    store: Arc<MemoryStore>,
    gateway: Arc<MockGateway>,
    tasks: TaskService,
    matcher: RecyclingMatcher,
}

impl TestHarness {
    fn new(verify_seller_balance: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let executor = Arc::new(OrderExecutor::new(
            store.clone(),
            gateway.clone(),
            Decimal::ZERO,
        ));
        let config = RecyclerConfig {
            enabled: true,
            interval_secs: 1,
            verify_seller_balance,
        };
        let matcher = RecyclingMatcher::new(store.clone(), gateway.clone(), executor, &config);
        Self {
            tasks: TaskService::new(store.clone()),
            store,
            gateway,
            matcher,
        }
    }

    async fn user(&self, user_id: UserId, balance: Decimal) {
        self.store.seed_wallet(user_id, balance).await.unwrap();
    }

    async fn listing(
        &self,
        login: &str,
        amount: DiamondAmount,
        unit_price: Decimal,
    ) -> SaleListing {
        let account = self
            .store
            .seed_game_account(SELLER, creds(login))
            .await
            .unwrap();
        let mut tx = self.store.begin().await.unwrap();
        let listing = tx
            .insert_listing(NewSaleListing::new(SELLER, account.id, amount, unit_price))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        listing
    }

    async fn task(
        &self,
        buyer_id: UserId,
        amount: DiamondAmount,
        min: Decimal,
        max: Decimal,
    ) -> RecyclingTask {
        self.tasks
            .create(&Caller::buyer(buyer_id), creds(&format!("buyer{}", buyer_id)), amount, min, max)
            .await
            .unwrap()
    }

    async fn reload(&self, task: &RecyclingTask) -> RecyclingTask {
        self.store.task(task.id).await.unwrap().unwrap()
    }

    async fn listing_status(&self, listing: &SaleListing) -> ListingStatus {
        self.store.listing(listing.id).await.unwrap().unwrap().status
    }
}

// ========================================================================
// Matching Policy
// ========================================================================

#[tokio::test]
async fn test_listing_goes_to_oldest_eligible_task_only() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;
    h.user(BUYER_B, dec!(1000)).await;

    let first = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let second = h.task(BUYER_B, 100, dec!(1), dec!(2)).await;
    let listing = h.listing("s1", 50, dec!(1.5)).await;

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.failed, 0);

    let first = h.reload(&first).await;
    let second = h.reload(&second).await;
    assert_eq!(first.fulfilled_diamond_amount, 50);
    assert_eq!(first.status, TaskStatus::Open);
    assert_eq!(second.fulfilled_diamond_amount, 0);
    assert_eq!(h.listing_status(&listing).await, ListingStatus::Sold);

    let orders = h.store.orders_bought(BUYER_A).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].buyer_account_id, first.linked_account_id);
    assert_eq!(
        h.store.wallet(BUYER_A).await.unwrap().unwrap().available_balance,
        dec!(925)
    );
    audit_wallet(h.store.as_ref(), BUYER_A).await.unwrap();
    audit_wallet(h.store.as_ref(), SELLER).await.unwrap();
}

#[tokio::test]
async fn test_cheapest_listing_first_and_never_overfilled() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;

    let task = h.task(BUYER_A, 100, dec!(1), dec!(3)).await;
    let expensive = h.listing("s1", 60, dec!(2)).await;
    let cheap = h.listing("s2", 60, dec!(1)).await;
    let filler = h.listing("s3", 40, dec!(3)).await;

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.matched, 2);

    // 60 @1 first, then 60 @2 does not fit, 40 @3 completes the task
    assert_eq!(h.listing_status(&cheap).await, ListingStatus::Sold);
    assert_eq!(h.listing_status(&expensive).await, ListingStatus::Active);
    assert_eq!(h.listing_status(&filler).await, ListingStatus::Sold);

    let task = h.reload(&task).await;
    assert_eq!(task.fulfilled_diamond_amount, 100);
    assert_eq!(task.status, TaskStatus::Fulfilled);

    // fulfilled tasks take nothing more
    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report, CycleReport::default());
    assert_eq!(h.listing_status(&expensive).await, ListingStatus::Active);
}

#[tokio::test]
async fn test_price_band_is_inclusive_and_respected() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;

    let task = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let too_cheap = h.listing("s1", 10, dec!(0.99)).await;
    let too_dear = h.listing("s2", 10, dec!(2.01)).await;
    let at_max = h.listing("s3", 10, dec!(2)).await;

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(h.listing_status(&too_cheap).await, ListingStatus::Active);
    assert_eq!(h.listing_status(&too_dear).await, ListingStatus::Active);
    assert_eq!(h.listing_status(&at_max).await, ListingStatus::Sold);
    assert_eq!(h.reload(&task).await.fulfilled_diamond_amount, 10);
}

#[tokio::test]
async fn test_stopped_task_is_not_matched() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;

    let task = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    h.tasks.stop(&Caller::buyer(BUYER_A), task.id).await.unwrap();
    let listing = h.listing("s1", 10, dec!(1)).await;

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.matched, 0);
    assert_eq!(h.listing_status(&listing).await, ListingStatus::Active);
    assert_eq!(h.gateway.transfer_count(), 0);
}

// ========================================================================
// Failure Isolation
// ========================================================================

#[tokio::test]
async fn test_underfunded_oldest_task_does_not_starve_newer_task() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, Decimal::ZERO).await;
    h.user(BUYER_B, dec!(1000)).await;

    let broke = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let funded = h.task(BUYER_B, 100, dec!(1), dec!(2)).await;
    let listing = h.listing("s1", 50, dec!(1.5)).await;

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(h.reload(&broke).await.fulfilled_diamond_amount, 0);
    assert_eq!(h.reload(&funded).await.fulfilled_diamond_amount, 50);
    assert_eq!(h.listing_status(&listing).await, ListingStatus::Sold);
    assert_eq!(
        h.store.wallet(BUYER_B).await.unwrap().unwrap().available_balance,
        dec!(925)
    );

    // nothing left to fight over
    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.matched, 0);
    assert_eq!(report.failed, 0);
    audit_wallet(h.store.as_ref(), BUYER_A).await.unwrap();
    audit_wallet(h.store.as_ref(), BUYER_B).await.unwrap();
}

#[tokio::test]
async fn test_failed_match_rolls_back_and_task_returns_next_cycle() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(10)).await;
    h.user(BUYER_B, dec!(1000)).await;

    // A is older but can only afford 10
    let poor = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let rich = h.task(BUYER_B, 100, dec!(1), dec!(2)).await;
    let big = h.listing("s1", 50, dec!(1)).await;
    let small = h.listing("s2", 5, dec!(1.5)).await;

    // A fails on the cheap listing and sits out the cycle, B takes both
    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.matched, 2);
    assert_eq!(h.reload(&poor).await.fulfilled_diamond_amount, 0);
    assert_eq!(h.reload(&rich).await.fulfilled_diamond_amount, 55);
    assert_eq!(h.listing_status(&big).await, ListingStatus::Sold);
    assert_eq!(h.listing_status(&small).await, ListingStatus::Sold);
    assert_eq!(
        h.store.wallet(BUYER_A).await.unwrap().unwrap().available_balance,
        dec!(10)
    );
    assert!(h.store.orders_bought(BUYER_A).await.unwrap().is_empty());

    // next cycle A is first in line again
    let affordable = h.listing("s3", 5, dec!(1.5)).await;
    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(h.listing_status(&affordable).await, ListingStatus::Sold);
    assert_eq!(h.reload(&poor).await.fulfilled_diamond_amount, 5);
}

#[tokio::test]
async fn test_rejected_buyer_account_passes_listing_to_next_task() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;
    h.user(BUYER_B, dec!(1000)).await;

    let locked = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let open = h.task(BUYER_B, 100, dec!(1), dec!(2)).await;
    h.listing("s1", 20, dec!(1)).await;
    h.gateway.reject_transfers_to(&format!("buyer{}", BUYER_A));

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.matched, 1);
    assert_eq!(h.reload(&locked).await, locked);
    assert_eq!(h.reload(&open).await.fulfilled_diamond_amount, 20);
    assert_eq!(
        h.store.wallet(BUYER_A).await.unwrap().unwrap().available_balance,
        dec!(1000)
    );
    let transfers = h.gateway.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].to, format!("buyer{}", BUYER_B));
}

#[tokio::test]
async fn test_unreachable_platform_keeps_task_order() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;
    h.user(BUYER_B, dec!(1000)).await;

    let first = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let second = h.task(BUYER_B, 100, dec!(1), dec!(2)).await;
    let listing = h.listing("s1", 20, dec!(1)).await;
    h.gateway
        .set_transfer_failure(Some(GatewayError::Unavailable("connect timeout".into())));

    // transient: the listing waits, the next task is not tried
    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.matched, 0);
    assert_eq!(h.listing_status(&listing).await, ListingStatus::Active);

    h.gateway.set_transfer_failure(None);
    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.matched, 1);
    assert_eq!(h.reload(&first).await.fulfilled_diamond_amount, 20);
    assert_eq!(h.reload(&second).await.fulfilled_diamond_amount, 0);
}

#[tokio::test]
async fn test_settlement_rejection_leaves_task_untouched() {
    let h = TestHarness::new(false);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;

    let task = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let listing = h.listing("s1", 20, dec!(1)).await;
    h.gateway.set_transfer_failure(Some(GatewayError::SettlementRejected {
        code: 500,
        message: "platform maintenance".into(),
    }));

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.reload(&task).await, task);
    assert_eq!(h.listing_status(&listing).await, ListingStatus::Active);
    assert!(h.store.orders_bought(BUYER_A).await.unwrap().is_empty());
    assert_eq!(
        h.store.wallet(BUYER_A).await.unwrap().unwrap().available_balance,
        dec!(1000)
    );
}

// ========================================================================
// Seller Balance Pre-check
// ========================================================================

#[tokio::test]
async fn test_undeliverable_listings_are_delisted() {
    let h = TestHarness::new(true);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;

    h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let short = h.listing("short", 30, dec!(1)).await;
    let banned = h.listing("banned", 30, dec!(1)).await;
    h.gateway.set_balance("short", 29);
    h.gateway.fail_query(
        "banned",
        GatewayError::AccountInvalid {
            code: 401,
            message: "wrong password".into(),
        },
    );

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.delisted, 2);
    assert_eq!(report.matched, 0);
    assert_eq!(h.listing_status(&short).await, ListingStatus::Delisted);
    assert_eq!(h.listing_status(&banned).await, ListingStatus::Delisted);
    assert_eq!(h.gateway.transfer_count(), 0);
}

#[tokio::test]
async fn test_unreachable_platform_skips_listing() {
    let h = TestHarness::new(true);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;

    let task = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    let listing = h.listing("flaky", 30, dec!(1)).await;
    h.gateway
        .fail_query("flaky", GatewayError::Unavailable("connect timeout".into()));

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.delisted, 0);
    assert_eq!(h.listing_status(&listing).await, ListingStatus::Active);
    assert_eq!(h.reload(&task).await.fulfilled_diamond_amount, 0);
}

#[tokio::test]
async fn test_precheck_only_queries_listings_with_a_taker() {
    let h = TestHarness::new(true);
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;

    h.task(BUYER_A, 10, dec!(1), dec!(2)).await;
    h.listing("s1", 50, dec!(1)).await;

    let report = h.matcher.run_once().await.unwrap();
    assert_eq!(report.listings_scanned, 1);
    assert_eq!(report.matched, 0);
    assert_eq!(h.gateway.query_count(), 0);
}

// ========================================================================
// Loop Control
// ========================================================================

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let h = Arc::new(TestHarness::new(false));
    h.user(SELLER, Decimal::ZERO).await;
    h.user(BUYER_A, dec!(1000)).await;
    let task = h.task(BUYER_A, 100, dec!(1), dec!(2)).await;
    h.listing("s1", 10, dec!(1)).await;

    let (tx, rx) = watch::channel(false);
    let runner = h.clone();
    let handle = tokio::spawn(async move { runner.matcher.run(rx).await });

    // the first tick fires immediately
    let mut matched = false;
    for _ in 0..50 {
        if h.reload(&task).await.fulfilled_diamond_amount == 10 {
            matched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(matched);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("matcher did not stop")
        .unwrap();
}
