//! PostgreSQL 事务边界

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::order_repo::OrderRepository;
use super::traits::{StorageTx, TransactionalStorage};
use super::user_repo::UserRepository;
use super::withdrawal_repo::WithdrawalRepository;
use crate::error::{AccrualError, Result};
use crate::models::{OrderNumber, OrderStatus, Withdrawal};

/// 基于连接池的事务工厂
pub struct PgTransactionalStorage {
    pool: PgPool,
}

impl PgTransactionalStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionalStorage for PgTransactionalStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStorageTx { tx: Some(tx) }))
    }
}

/// PostgreSQL 事务
///
/// 未提交就被 drop 时由 sqlx 自动回滚
pub struct PgStorageTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStorageTx {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| AccrualError::Internal("事务已结束".to_string()))
    }
}

#[async_trait]
impl StorageTx for PgStorageTx {
    async fn update_order(
        &mut self,
        number: OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()> {
        OrderRepository::update_in_tx(self.conn()?, number, status, accrual).await
    }

    async fn update_balance(&mut self, login: &str, delta: Decimal) -> Result<Decimal> {
        UserRepository::update_balance_in_tx(self.conn()?, login, delta).await
    }

    async fn create_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<()> {
        WithdrawalRepository::create_in_tx(self.conn()?, withdrawal).await
    }

    async fn commit(&mut self) -> Result<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| AccrualError::Internal("事务已结束".to_string()))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
