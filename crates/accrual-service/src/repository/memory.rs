//! 内存存储
//!
//! 与 PostgreSQL 实现语义一致的内存版本，用于测试和本地运行。
//! 事务持有整个存储的互斥锁，在快照上暂存修改，提交时整体写回，
//! 因此事务之间完全串行，未提交的修改对其他调用方不可见。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::traits::{
    OrderRepositoryTrait, StorageTx, TransactionalStorage, UserRepositoryTrait,
    WithdrawalRepositoryTrait,
};
use crate::error::{AccrualError, Result};
use crate::models::{Order, OrderNumber, OrderStatus, User, Withdrawal};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    users: HashMap<String, Decimal>,
    orders: HashMap<OrderNumber, Order>,
    withdrawals: HashMap<OrderNumber, Withdrawal>,
}

impl MemoryState {
    fn update_order(
        &mut self,
        number: OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()> {
        let order = self
            .orders
            .get_mut(&number)
            .ok_or(AccrualError::OrderNotFound(number))?;
        if order.status.is_terminal() {
            return Err(AccrualError::OrderFinalized(number));
        }
        order.status = status;
        order.accrual = accrual;
        Ok(())
    }

    fn update_balance(&mut self, login: &str, delta: Decimal) -> Result<Decimal> {
        let balance = self
            .users
            .get_mut(login)
            .ok_or_else(|| AccrualError::UserNotFound(login.to_string()))?;
        *balance += delta;
        Ok(*balance)
    }

    fn create_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<()> {
        if !self.users.contains_key(&withdrawal.owner) {
            return Err(AccrualError::UserNotFound(withdrawal.owner.clone()));
        }
        if self.withdrawals.contains_key(&withdrawal.order_number) {
            return Err(AccrualError::DuplicateWithdrawal(withdrawal.order_number));
        }
        self.withdrawals
            .insert(withdrawal.order_number, withdrawal.clone());
        Ok(())
    }
}

/// 内存存储，克隆后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepositoryTrait for MemoryStorage {
    async fn create(&self, order: &Order) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&order.owner) {
            return Err(AccrualError::UserNotFound(order.owner.clone()));
        }
        if state.orders.contains_key(&order.number) {
            return Err(AccrualError::OrderAlreadyExists(order.number));
        }
        state.orders.insert(order.number, order.clone());
        Ok(())
    }

    async fn get(&self, number: OrderNumber) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&number).cloned())
    }

    async fn list_by_user(&self, login: &str) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.owner == login)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(orders)
    }

    async fn update(
        &self,
        number: OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .update_order(number, status, accrual)
    }

    async fn list_unprocessed(
        &self,
        limit: i64,
        offset: i64,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal() && o.submitted_at < older_than)
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then(a.number.cmp(&b.number))
        });

        Ok(orders
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }
}

#[async_trait]
impl UserRepositoryTrait for MemoryStorage {
    async fn create(&self, login: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.users.contains_key(login) {
            return Err(AccrualError::UserAlreadyExists(login.to_string()));
        }
        state.users.insert(login.to_string(), Decimal::ZERO);
        Ok(())
    }

    async fn get(&self, login: &str) -> Result<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.get(login).map(|balance| User {
            login: login.to_string(),
            balance: *balance,
        }))
    }

    async fn update_balance(&self, login: &str, delta: Decimal) -> Result<Decimal> {
        self.state.lock().await.update_balance(login, delta)
    }
}

#[async_trait]
impl WithdrawalRepositoryTrait for MemoryStorage {
    async fn list_by_user(&self, login: &str) -> Result<Vec<Withdrawal>> {
        let state = self.state.lock().await;
        let mut withdrawals: Vec<Withdrawal> = state
            .withdrawals
            .values()
            .filter(|w| w.owner == login)
            .cloned()
            .collect();
        withdrawals.sort_by(|a, b| b.processed_at.cmp(&a.processed_at));
        Ok(withdrawals)
    }

    async fn sum_by_user(&self, login: &str) -> Result<Decimal> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .values()
            .filter(|w| w.owner == login)
            .map(|w| w.sum)
            .sum())
    }
}

#[async_trait]
impl TransactionalStorage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryStorageTx {
            guard: Some(guard),
            staged,
        }))
    }
}

/// 内存事务
///
/// drop 时释放锁并丢弃暂存修改
pub struct MemoryStorageTx {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    staged: MemoryState,
}

impl MemoryStorageTx {
    fn ensure_open(&self) -> Result<()> {
        if self.guard.is_none() {
            return Err(AccrualError::Internal("事务已结束".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageTx for MemoryStorageTx {
    async fn update_order(
        &mut self,
        number: OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()> {
        self.ensure_open()?;
        self.staged.update_order(number, status, accrual)
    }

    async fn update_balance(&mut self, login: &str, delta: Decimal) -> Result<Decimal> {
        self.ensure_open()?;
        self.staged.update_balance(login, delta)
    }

    async fn create_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<()> {
        self.ensure_open()?;
        self.staged.create_withdrawal(withdrawal)
    }

    async fn commit(&mut self) -> Result<()> {
        let mut guard = self
            .guard
            .take()
            .ok_or_else(|| AccrualError::Internal("事务已结束".to_string()))?;
        *guard = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.guard = None;
        self.staged = MemoryState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn seeded() -> MemoryStorage {
        let storage = MemoryStorage::new();
        UserRepositoryTrait::create(&storage, "alice").await.unwrap();
        OrderRepositoryTrait::create(
            &storage,
            &Order::new(OrderNumber::from_raw(79927398713), "alice", Utc::now()),
        )
        .await
        .unwrap();
        storage
    }

    #[tokio::test]
    async fn test_commit_applies_staged_changes() {
        let storage = seeded().await;
        let number = OrderNumber::from_raw(79927398713);

        let mut tx = storage.begin().await.unwrap();
        tx.update_order(number, OrderStatus::Processed, dec!(10.5))
            .await
            .unwrap();
        assert_eq!(tx.update_balance("alice", dec!(10.5)).await.unwrap(), dec!(10.5));
        tx.commit().await.unwrap();

        let order = OrderRepositoryTrait::get(&storage, number).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
        let user = UserRepositoryTrait::get(&storage, "alice").await.unwrap().unwrap();
        assert_eq!(user.balance, dec!(10.5));
    }

    #[tokio::test]
    async fn test_drop_discards_staged_changes() {
        let storage = seeded().await;
        let number = OrderNumber::from_raw(79927398713);

        {
            let mut tx = storage.begin().await.unwrap();
            tx.update_order(number, OrderStatus::Processed, dec!(1))
                .await
                .unwrap();
        }

        let order = OrderRepositoryTrait::get(&storage, number).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::New);
    }

    #[tokio::test]
    async fn test_commit_twice_fails() {
        let storage = seeded().await;
        let mut tx = storage.begin().await.unwrap();
        tx.commit().await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(tx.update_balance("alice", dec!(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_list_unprocessed_filters_and_orders() {
        let storage = MemoryStorage::new();
        UserRepositoryTrait::create(&storage, "alice").await.unwrap();
        let now = Utc::now();
        let old = now - chrono::Duration::minutes(10);

        for (n, status, at) in [
            (18, OrderStatus::New, old + chrono::Duration::seconds(2)),
            (26, OrderStatus::Processing, old),
            (34, OrderStatus::Processed, old),
            (42, OrderStatus::Invalid, old),
            (59, OrderStatus::New, now),
        ] {
            let mut order = Order::new(OrderNumber::from_raw(n), "alice", at);
            order.status = status;
            OrderRepositoryTrait::create(&storage, &order).await.unwrap();
        }

        let cutoff = now - chrono::Duration::seconds(90);
        let orders = storage.list_unprocessed(10, 0, cutoff).await.unwrap();
        let numbers: Vec<i64> = orders.iter().map(|o| o.number.value()).collect();
        assert_eq!(numbers, vec![26, 18]);

        let page = storage.list_unprocessed(1, 1, cutoff).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].number.value(), 18);
    }

    #[tokio::test]
    async fn test_terminal_order_is_not_rewritten() {
        let storage = seeded().await;
        let number = OrderNumber::from_raw(79927398713);
        storage
            .update(number, OrderStatus::Processed, dec!(5))
            .await
            .unwrap();

        let mut tx = storage.begin().await.unwrap();
        let err = tx
            .update_order(number, OrderStatus::Processed, dec!(5))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ORDER_FINALIZED");
        drop(tx);

        let err = storage
            .update(number, OrderStatus::Processing, Decimal::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "ORDER_FINALIZED");
    }

    #[tokio::test]
    async fn test_duplicate_order_and_unknown_user() {
        let storage = seeded().await;
        let dup = Order::new(OrderNumber::from_raw(79927398713), "alice", Utc::now());
        let err = OrderRepositoryTrait::create(&storage, &dup).await.unwrap_err();
        assert_eq!(err.error_code(), "ORDER_ALREADY_EXISTS");

        let err = storage.update_balance("nobody", dec!(1)).await.unwrap_err();
        assert_eq!(err.error_code(), "USER_NOT_FOUND");
    }
}
