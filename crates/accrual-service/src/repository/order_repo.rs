//! 订单仓储
//!
//! 提供订单的数据访问，包括对账扫描所需的未完成订单查询

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use super::{is_foreign_key_violation, is_unique_violation};
use super::traits::OrderRepositoryTrait;
use crate::error::{AccrualError, Result};
use crate::models::{Order, OrderNumber, OrderStatus};

/// 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建订单
    pub async fn create(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (number, owner_login, status, accrual, submitted_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.number)
        .bind(&order.owner)
        .bind(order.status)
        .bind(order.accrual)
        .bind(order.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AccrualError::OrderAlreadyExists(order.number)
            } else if is_foreign_key_violation(&e) {
                AccrualError::UserNotFound(order.owner.clone())
            } else {
                AccrualError::Database(e)
            }
        })?;

        Ok(())
    }

    pub async fn get(&self, number: OrderNumber) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT number, owner_login, status, accrual, submitted_at
            FROM orders
            WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    /// 列出用户的订单，最新提交的在前
    pub async fn list_by_user(&self, login: &str) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT number, owner_login, status, accrual, submitted_at
            FROM orders
            WHERE owner_login = $1
            ORDER BY submitted_at DESC
            "#,
        )
        .bind(login)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    /// 更新订单状态与积分
    pub async fn update(
        &self,
        number: OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        Self::update_in_tx(&mut conn, number, status, accrual).await
    }

    /// 在事务中更新订单状态与积分
    ///
    /// 终态订单不会被改写，返回 `OrderFinalized`；并发的两次入账只有一次能成功
    pub async fn update_in_tx(
        tx: &mut PgConnection,
        number: OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1
              AND status NOT IN ('INVALID', 'PROCESSED')
            "#,
        )
        .bind(number)
        .bind(status)
        .bind(accrual)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM orders WHERE number = $1)")
                .bind(number)
                .fetch_one(&mut *tx)
                .await?;
        if exists.0 {
            Err(AccrualError::OrderFinalized(number))
        } else {
            Err(AccrualError::OrderNotFound(number))
        }
    }

    /// 查询需要重新对账的订单
    ///
    /// 排除终态订单和仍在首次对账窗口内的新订单，按提交时间正序分页
    pub async fn list_unprocessed(
        &self,
        limit: i64,
        offset: i64,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT number, owner_login, status, accrual, submitted_at
            FROM orders
            WHERE status NOT IN ('INVALID', 'PROCESSED')
              AND submitted_at < $3
            ORDER BY submitted_at ASC, number ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .bind(older_than)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn create(&self, order: &Order) -> Result<()> {
        self.create(order).await
    }

    async fn get(&self, number: OrderNumber) -> Result<Option<Order>> {
        self.get(number).await
    }

    async fn list_by_user(&self, login: &str) -> Result<Vec<Order>> {
        self.list_by_user(login).await
    }

    async fn update(
        &self,
        number: OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()> {
        self.update(number, status, accrual).await
    }

    async fn list_unprocessed(
        &self,
        limit: i64,
        offset: i64,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        self.list_unprocessed(limit, offset, older_than).await
    }
}
