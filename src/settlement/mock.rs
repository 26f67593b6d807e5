//! Scriptable in-process gateway for tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{BuyDiamondReceipt, GatewayError, SettlementGateway, SettlementRef};
use crate::core_types::DiamondAmount;
use crate::models::GameCredentials;

/// One recorded `transfer_diamonds` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCall {
    pub from: String,
    pub to: String,
    pub amount: DiamondAmount,
}

pub struct MockGateway {
    /// Remote balances by login name; unknown logins report `default_balance`
    balances: Mutex<HashMap<String, DiamondAmount>>,
    default_balance: DiamondAmount,
    /// Per-login query failures
    query_failures: Mutex<HashMap<String, GatewayError>>,
    /// Failure returned by every transfer while set
    transfer_failure: Mutex<Option<GatewayError>>,
    /// Transfers to these buyer logins are rejected
    rejected_recipients: Mutex<Vec<String>>,
    transfer_delay: Mutex<Duration>,
    transfers: Mutex<Vec<TransferCall>>,
    query_count: AtomicUsize,
    next_ref: AtomicI64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            default_balance: 1_000_000,
            query_failures: Mutex::new(HashMap::new()),
            transfer_failure: Mutex::new(None),
            rejected_recipients: Mutex::new(Vec::new()),
            transfer_delay: Mutex::new(Duration::ZERO),
            transfers: Mutex::new(Vec::new()),
            query_count: AtomicUsize::new(0),
            next_ref: AtomicI64::new(1000),
        }
    }

    pub fn set_balance(&self, login: &str, diamonds: DiamondAmount) {
        self.balances
            .lock()
            .unwrap()
            .insert(login.to_string(), diamonds);
    }

    pub fn fail_query(&self, login: &str, err: GatewayError) {
        self.query_failures
            .lock()
            .unwrap()
            .insert(login.to_string(), err);
    }

    pub fn set_transfer_failure(&self, err: Option<GatewayError>) {
        *self.transfer_failure.lock().unwrap() = err;
    }

    pub fn reject_transfers_to(&self, login: &str) {
        self.rejected_recipients
            .lock()
            .unwrap()
            .push(login.to_string());
    }

    pub fn set_transfer_delay(&self, delay: Duration) {
        *self.transfer_delay.lock().unwrap() = delay;
    }

    pub fn transfers(&self) -> Vec<TransferCall> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.lock().unwrap().len()
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettlementGateway for MockGateway {
    async fn query_diamond_balance(
        &self,
        account: &GameCredentials,
    ) -> Result<DiamondAmount, GatewayError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.query_failures.lock().unwrap().get(&account.login_name) {
            return Err(err.clone());
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(&account.login_name)
            .copied()
            .unwrap_or(self.default_balance))
    }

    async fn transfer_diamonds(
        &self,
        from: &GameCredentials,
        to: &GameCredentials,
        amount: DiamondAmount,
    ) -> Result<SettlementRef, GatewayError> {
        let delay = *self.transfer_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.transfer_failure.lock().unwrap().clone() {
            return Err(err);
        }
        if self
            .rejected_recipients
            .lock()
            .unwrap()
            .contains(&to.login_name)
        {
            return Err(GatewayError::SettlementRejected {
                code: 403,
                message: "account locked".into(),
            });
        }

        self.transfers.lock().unwrap().push(TransferCall {
            from: from.login_name.clone(),
            to: to.login_name.clone(),
            amount,
        });
        Ok(self.next_ref.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn buy_diamond(
        &self,
        _account: &GameCredentials,
        good_id: i64,
    ) -> Result<BuyDiamondReceipt, GatewayError> {
        Ok(BuyDiamondReceipt {
            order_no: format!("SYS{}", good_id),
            pay_price: Decimal::ZERO,
        })
    }
}
