//! End-to-end market flow through the public API only.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use diamond_market::config::{MarketConfig, RecyclerConfig};
use diamond_market::funding::{PayoutDetails, RechargeService, WithdrawService};
use diamond_market::ledger::audit_wallet;
use diamond_market::models::{ListingStatus, OrderStatus, TaskStatus, WithdrawalStatus};
use diamond_market::settlement::{BuyDiamondReceipt, SettlementRef};
use diamond_market::{
    Caller, DiamondAmount, GameCredentials, GatewayError, ListingService, MarketError, MarketStore,
    MemoryStore, OrderExecutor, RecyclingMatcher, SettlementGateway, TaskService, UserId,
};

/// Platform double keeping real per-login diamond balances
#[derive(Default)]
struct FakePlatform {
    diamonds: Mutex<HashMap<String, DiamondAmount>>,
}

impl FakePlatform {
    fn give(&self, login: &str, amount: DiamondAmount) {
        *self
            .diamonds
            .lock()
            .unwrap()
            .entry(login.to_string())
            .or_default() += amount;
    }

    fn diamonds(&self, login: &str) -> DiamondAmount {
        self.diamonds
            .lock()
            .unwrap()
            .get(login)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SettlementGateway for FakePlatform {
    async fn query_diamond_balance(
        &self,
        account: &GameCredentials,
    ) -> Result<DiamondAmount, GatewayError> {
        Ok(self.diamonds(&account.login_name))
    }

    async fn transfer_diamonds(
        &self,
        from: &GameCredentials,
        to: &GameCredentials,
        amount: DiamondAmount,
    ) -> Result<SettlementRef, GatewayError> {
        let mut diamonds = self.diamonds.lock().unwrap();
        let held = diamonds.get(&from.login_name).copied().unwrap_or(0);
        if held < amount {
            return Err(GatewayError::SettlementRejected {
                code: 402,
                message: "not enough diamonds".into(),
            });
        }
        diamonds.insert(from.login_name.clone(), held - amount);
        *diamonds.entry(to.login_name.clone()).or_default() += amount;
        Ok(format!("R{}-{}", from.login_name, to.login_name))
    }

    async fn buy_diamond(
        &self,
        _account: &GameCredentials,
        good_id: i64,
    ) -> Result<BuyDiamondReceipt, GatewayError> {
        Err(GatewayError::SettlementRejected {
            code: 404,
            message: format!("good {} not sold here", good_id),
        })
    }
}

const STAFF: UserId = 100;
const SELLER: UserId = 1;
const BUYER: UserId = 2;
const RECYCLER: UserId = 3;

fn creds(login: &str) -> GameCredentials {
    GameCredentials::new("ag", login, "pw")
}

struct Market {
    store: Arc<MemoryStore>,
    platform: Arc<FakePlatform>,
    listings: ListingService,
    executor: Arc<OrderExecutor>,
    tasks: TaskService,
    matcher: RecyclingMatcher,
    recharges: RechargeService,
    withdrawals: WithdrawService,
}

impl Market {
    async fn open() -> Self {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::default());
        let config = MarketConfig {
            service_fee_rate: dec!(0.05),
            min_unit_price: dec!(0.5),
            max_unit_price: dec!(5),
            ..MarketConfig::default()
        };

        for user in [SELLER, BUYER, RECYCLER] {
            store.open_wallet(user).await.unwrap();
        }

        let executor = Arc::new(OrderExecutor::new(
            store.clone(),
            platform.clone(),
            config.service_fee_rate,
        ));
        let matcher = RecyclingMatcher::new(
            store.clone(),
            platform.clone(),
            executor.clone(),
            &RecyclerConfig::default(),
        );
        Self {
            listings: ListingService::new(store.clone(), platform.clone(), config.clone()),
            tasks: TaskService::new(store.clone()),
            recharges: RechargeService::new(store.clone(), config.recharge_step),
            withdrawals: WithdrawService::new(store.clone(), config.withdraw_step),
            executor,
            matcher,
            store,
            platform,
        }
    }

    async fn available(&self, user: UserId) -> Decimal {
        self.store
            .wallet(user)
            .await
            .unwrap()
            .unwrap()
            .available_balance
    }
}

#[tokio::test]
async fn direct_purchase_then_recycling_then_withdrawal() {
    let m = Market::open().await;
    let staff = Caller::staff(STAFF);
    m.platform.give("seller", 500);

    m.recharges
        .manual_recharge(&staff, BUYER, dec!(1000))
        .await
        .unwrap();
    m.recharges
        .manual_recharge(&staff, RECYCLER, dec!(300))
        .await
        .unwrap();

    // direct purchase: 100 diamonds at 5 = 500, fee 25
    let first = m
        .listings
        .publish(&Caller::buyer(SELLER), creds("seller"), 100, dec!(6))
        .await;
    assert!(matches!(first, Err(MarketError::Validation(_))), "above max price");

    let listing = m
        .listings
        .publish(&Caller::buyer(SELLER), creds("seller"), 100, dec!(5))
        .await
        .unwrap();
    let order = m
        .executor
        .buy(&Caller::buyer(BUYER), listing.id, creds("buyer"))
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Settled);
    assert_eq!(m.available(BUYER).await, dec!(500));
    assert_eq!(m.available(SELLER).await, dec!(475));
    assert_eq!(m.platform.diamonds("buyer"), 100);
    assert_eq!(m.platform.diamonds("seller"), 400);

    // sold listings cannot be bought twice
    let again = m
        .executor
        .buy(&Caller::buyer(RECYCLER), listing.id, creds("recycler"))
        .await;
    assert!(matches!(again, Err(MarketError::ListingUnavailable(_))));

    // recycling: task for 300 diamonds at most 1.0 each
    let task = m
        .tasks
        .create(&Caller::buyer(RECYCLER), creds("recycler"), 300, dec!(0.5), dec!(1))
        .await
        .unwrap();
    let cheap = m
        .listings
        .publish(&Caller::buyer(SELLER), creds("seller"), 200, dec!(1))
        .await
        .unwrap();
    let pricey = m
        .listings
        .publish(&Caller::buyer(SELLER), creds("seller"), 100, dec!(2))
        .await
        .unwrap();

    let report = m.matcher.run_once().await.unwrap();
    assert_eq!(report.matched, 1);
    let task = m.store.task(task.id).await.unwrap().unwrap();
    assert_eq!(task.fulfilled_diamond_amount, 200);
    assert_eq!(task.status, TaskStatus::Open);
    assert_eq!(m.platform.diamonds("recycler"), 200);
    assert_eq!(m.available(RECYCLER).await, dec!(100));
    assert_eq!(
        m.store.listing(cheap.id).await.unwrap().unwrap().status,
        ListingStatus::Sold
    );
    assert_eq!(
        m.store.listing(pricey.id).await.unwrap().unwrap().status,
        ListingStatus::Active
    );

    // seller cashes out
    let seller = Caller::buyer(SELLER);
    let payout = PayoutDetails {
        pay_channel: "bank".into(),
        payee_name: "Seller One".into(),
        pay_info: "6222 0000 0000".into(),
    };
    let w = m
        .withdrawals
        .request(&seller, dec!(400), payout)
        .await
        .unwrap();
    m.withdrawals.start(&staff, w.id).await.unwrap();
    let w = m.withdrawals.complete(&staff, w.id).await.unwrap();
    assert_eq!(w.status, WithdrawalStatus::Completed);

    // 475 + 200 - 10 fee - 400
    assert_eq!(m.available(SELLER).await, dec!(265));

    for user in [SELLER, BUYER, RECYCLER] {
        let replayed = audit_wallet(m.store.as_ref(), user).await.unwrap();
        assert_eq!(replayed, m.available(user).await);
    }

    let sold = m.executor.orders_sold(&seller, SELLER).await.unwrap();
    assert_eq!(sold.len(), 2);
}
