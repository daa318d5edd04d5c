//! 用户积分账户仓储

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};

use super::traits::UserRepositoryTrait;
use super::{is_check_violation, is_unique_violation};
use crate::error::{AccrualError, Result};
use crate::models::User;

/// 用户积分账户仓储
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 创建零余额账户
    pub async fn create(&self, login: &str) -> Result<()> {
        sqlx::query("INSERT INTO users (login, balance) VALUES ($1, 0)")
            .bind(login)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AccrualError::UserAlreadyExists(login.to_string())
                } else {
                    AccrualError::Database(e)
                }
            })?;

        Ok(())
    }

    pub async fn get(&self, login: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT login, balance FROM users WHERE login = $1")
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    pub async fn update_balance(&self, login: &str, delta: Decimal) -> Result<Decimal> {
        let mut conn = self.pool.acquire().await?;
        Self::update_balance_in_tx(&mut conn, login, delta).await
    }

    /// 在事务中调整余额
    ///
    /// 单条 UPDATE 完成读改写，行锁持有到事务结束。
    /// 余额将变为负数时触发表约束，返回 `InsufficientBalance`。
    pub async fn update_balance_in_tx(
        tx: &mut PgConnection,
        login: &str,
        delta: Decimal,
    ) -> Result<Decimal> {
        let balance: Option<Decimal> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET balance = balance + $2
            WHERE login = $1
            RETURNING balance
            "#,
        )
        .bind(login)
        .bind(delta)
        .fetch_optional(tx)
        .await
        .map_err(|e| {
            if is_check_violation(&e) {
                AccrualError::InsufficientBalance {
                    login: login.to_string(),
                    required: -delta,
                }
            } else {
                AccrualError::Database(e)
            }
        })?;

        balance.ok_or_else(|| AccrualError::UserNotFound(login.to_string()))
    }
}

#[async_trait]
impl UserRepositoryTrait for UserRepository {
    async fn create(&self, login: &str) -> Result<()> {
        self.create(login).await
    }

    async fn get(&self, login: &str) -> Result<Option<User>> {
        self.get(login).await
    }

    async fn update_balance(&self, login: &str, delta: Decimal) -> Result<Decimal> {
        self.update_balance(login, delta).await
    }
}
