//! 提现记录仓储

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use super::is_unique_violation;
use super::traits::WithdrawalRepositoryTrait;
use crate::error::{AccrualError, Result};
use crate::models::Withdrawal;

/// 提现记录仓储
pub struct WithdrawalRepository {
    pool: PgPool,
}

impl WithdrawalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中创建提现记录
    pub async fn create_in_tx(tx: &mut PgConnection, withdrawal: &Withdrawal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO withdrawals (order_number, owner_login, sum, processed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(withdrawal.order_number)
        .bind(&withdrawal.owner)
        .bind(withdrawal.sum)
        .bind(withdrawal.processed_at)
        .execute(tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AccrualError::DuplicateWithdrawal(withdrawal.order_number)
            } else {
                AccrualError::Database(e)
            }
        })?;

        Ok(())
    }

    pub async fn list_by_user(&self, login: &str) -> Result<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT order_number, owner_login, sum, processed_at
            FROM withdrawals
            WHERE owner_login = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(login)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }

    pub async fn sum_by_user(&self, login: &str) -> Result<Decimal> {
        let sum: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(sum), 0) FROM withdrawals WHERE owner_login = $1",
        )
        .bind(login)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }
}

#[async_trait]
impl WithdrawalRepositoryTrait for WithdrawalRepository {
    async fn list_by_user(&self, login: &str) -> Result<Vec<Withdrawal>> {
        self.list_by_user(login).await
    }

    async fn sum_by_user(&self, login: &str) -> Result<Decimal> {
        self.sum_by_user(login).await
    }
}
