//! Recycling task lifecycle on the user side: create, stop, list.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use crate::core_types::{DiamondAmount, TaskId, UserId};
use crate::error::MarketError;
use crate::fee::require_money_scale;
use crate::models::{Caller, GameCredentials, NewRecyclingTask, RecyclingTask, TaskStatus};
use crate::store::MarketStore;

pub struct TaskService {
    store: Arc<dyn MarketStore>,
}

impl TaskService {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    /// Open a standing buy order for `caller`. Purchases are delivered to the
    /// game account behind `credentials`.
    pub async fn create(
        &self,
        caller: &Caller,
        credentials: GameCredentials,
        requested_diamond_amount: DiamondAmount,
        min_unit_price: Decimal,
        max_unit_price: Decimal,
    ) -> Result<RecyclingTask, MarketError> {
        if !credentials.is_complete() {
            return Err(MarketError::Validation(
                "game type, login name and password are required".into(),
            ));
        }
        if requested_diamond_amount <= 0 {
            return Err(MarketError::Validation(
                "requested diamond amount must be positive".into(),
            ));
        }
        if min_unit_price <= Decimal::ZERO || max_unit_price <= Decimal::ZERO {
            return Err(MarketError::Validation("unit prices must be positive".into()));
        }
        require_money_scale(min_unit_price, "min unit price")?;
        require_money_scale(max_unit_price, "max unit price")?;
        if min_unit_price > max_unit_price {
            return Err(MarketError::Validation(format!(
                "min unit price {} exceeds max unit price {}",
                min_unit_price, max_unit_price
            )));
        }
        if self.store.wallet(caller.user_id).await?.is_none() {
            return Err(MarketError::WalletNotFound(caller.user_id));
        }

        let mut tx = self.store.begin().await?;
        let account = tx
            .insert_game_account(caller.user_id, &credentials)
            .await?;
        let task = tx
            .insert_task(NewRecyclingTask {
                buyer_id: caller.user_id,
                linked_account_id: account.id,
                requested_diamond_amount,
                min_unit_price,
                max_unit_price,
            })
            .await?;
        tx.commit().await?;

        info!(
            task_id = task.id,
            buyer_id = task.buyer_id,
            requested = requested_diamond_amount,
            min_unit_price = %min_unit_price,
            max_unit_price = %max_unit_price,
            "Recycling task created"
        );
        Ok(task)
    }

    /// Stop an open task. The task row lock is the first lock the matcher
    /// takes, so a stop never interleaves with a match of the same task.
    pub async fn stop(&self, caller: &Caller, task_id: TaskId) -> Result<RecyclingTask, MarketError> {
        let mut tx = self.store.begin().await?;
        let mut task = tx
            .lock_task(task_id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("recycling task {}", task_id)))?;

        if !caller.may_act_for(task.buyer_id) {
            return Err(MarketError::Forbidden(format!(
                "recycling task {} belongs to another user",
                task_id
            )));
        }
        if task.status != TaskStatus::Open {
            return Err(MarketError::InvalidStateTransition(format!(
                "task {} is {}, only OPEN tasks can be stopped",
                task_id, task.status
            )));
        }

        task.status = TaskStatus::Stopped;
        tx.save_task(&task).await?;
        tx.commit().await?;

        info!(task_id, fulfilled = task.fulfilled_diamond_amount, "Recycling task stopped");
        Ok(task)
    }

    /// Tasks of `buyer_id`, newest first
    pub async fn tasks_of(
        &self,
        caller: &Caller,
        buyer_id: UserId,
    ) -> Result<Vec<RecyclingTask>, MarketError> {
        if !caller.may_act_for(buyer_id) {
            return Err(MarketError::Forbidden("tasks of another user".into()));
        }
        Ok(self.store.tasks_of(buyer_id).await?)
    }
}
