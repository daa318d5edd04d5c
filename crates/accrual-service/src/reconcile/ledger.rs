//! 积分入账
//!
//! 订单进入 PROCESSED 与用户余额增加在同一事务中完成，任一步失败整体回滚。

use std::sync::Arc;

use loyalty_shared::observability::metrics;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::error::{AccrualError, Result};
use crate::models::{Order, OrderStatus};
use crate::repository::{StorageTx, TransactionalStorage};

pub struct LedgerUpdater {
    storage: Arc<dyn TransactionalStorage>,
}

impl LedgerUpdater {
    pub fn new(storage: Arc<dyn TransactionalStorage>) -> Self {
        Self { storage }
    }

    /// 将订单标记为 PROCESSED 并为订单所有者入账，返回入账后的余额
    #[instrument(skip(self, order), fields(order_number = %order.number, owner = %order.owner))]
    pub async fn apply_terminal(&self, order: &Order, accrual: Decimal) -> Result<Decimal> {
        if accrual <= Decimal::ZERO {
            return Err(AccrualError::Validation(format!(
                "入账积分必须为正数: {accrual}"
            )));
        }

        let mut tx = self.storage.begin().await?;
        match Self::credit(tx.as_mut(), order, accrual).await {
            Ok(balance) => {
                tx.commit().await?;
                metrics::record_ledger_credit();
                info!(%accrual, %balance, "订单积分已入账");
                Ok(balance)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "入账事务回滚失败");
                }
                Err(e)
            }
        }
    }

    async fn credit(tx: &mut dyn StorageTx, order: &Order, accrual: Decimal) -> Result<Decimal> {
        tx.update_order(order.number, OrderStatus::Processed, accrual)
            .await?;
        tx.update_balance(&order.owner, accrual).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderNumber;
    use crate::repository::{MemoryStorage, OrderRepositoryTrait, UserRepositoryTrait};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn seeded() -> (MemoryStorage, Order) {
        let storage = MemoryStorage::new();
        UserRepositoryTrait::create(&storage, "alice").await.unwrap();
        let order = Order::new(OrderNumber::from_raw(79927398713), "alice", Utc::now());
        OrderRepositoryTrait::create(&storage, &order).await.unwrap();
        (storage, order)
    }

    #[tokio::test]
    async fn test_apply_terminal_credits_owner() {
        let (storage, order) = seeded().await;
        let ledger = LedgerUpdater::new(Arc::new(storage.clone()));

        let balance = ledger.apply_terminal(&order, dec!(500.00)).await.unwrap();
        assert_eq!(balance, dec!(500.00));

        let stored = OrderRepositoryTrait::get(&storage, order.number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Processed);
        assert_eq!(stored.accrual, dec!(500.00));
    }

    #[tokio::test]
    async fn test_second_credit_is_rejected_and_rolled_back() {
        let (storage, order) = seeded().await;
        let ledger = LedgerUpdater::new(Arc::new(storage.clone()));

        ledger.apply_terminal(&order, dec!(10)).await.unwrap();
        let err = ledger.apply_terminal(&order, dec!(10)).await.unwrap_err();
        assert_eq!(err.error_code(), "ORDER_FINALIZED");

        let user = UserRepositoryTrait::get(&storage, "alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.balance, dec!(10));
    }

    #[tokio::test]
    async fn test_unknown_owner_rolls_back_status() {
        let (storage, mut order) = seeded().await;
        order.owner = "ghost".to_string();
        let ledger = LedgerUpdater::new(Arc::new(storage.clone()));

        let err = ledger.apply_terminal(&order, dec!(1)).await.unwrap_err();
        assert_eq!(err.error_code(), "USER_NOT_FOUND");

        let stored = OrderRepositoryTrait::get(&storage, order.number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_non_positive_accrual_rejected() {
        let (storage, order) = seeded().await;
        let ledger = LedgerUpdater::new(Arc::new(storage));
        let err = ledger.apply_terminal(&order, Decimal::ZERO).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }
}
