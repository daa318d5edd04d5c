//! 积分提现服务
//!
//! 扣减余额与写入提现记录在同一事务中完成，与对账入账共享事务边界。

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::error::{AccrualError, Result};
use crate::models::{BalanceSummary, OrderNumber, Withdrawal};
use crate::repository::{
    StorageTx, TransactionalStorage, UserRepositoryTrait, WithdrawalRepositoryTrait,
};

#[derive(Clone)]
pub struct WithdrawService {
    users: Arc<dyn UserRepositoryTrait>,
    withdrawals: Arc<dyn WithdrawalRepositoryTrait>,
    storage: Arc<dyn TransactionalStorage>,
}

impl WithdrawService {
    pub fn new(
        users: Arc<dyn UserRepositoryTrait>,
        withdrawals: Arc<dyn WithdrawalRepositoryTrait>,
        storage: Arc<dyn TransactionalStorage>,
    ) -> Self {
        Self {
            users,
            withdrawals,
            storage,
        }
    }

    /// 从用户余额中提取 `sum` 积分，记在订单号 `raw_number` 名下
    #[instrument(skip(self), fields(%sum))]
    pub async fn withdraw(&self, login: &str, raw_number: &str, sum: Decimal) -> Result<Withdrawal> {
        let number = OrderNumber::parse(raw_number)?;
        if sum <= Decimal::ZERO {
            return Err(AccrualError::Validation(format!(
                "提现积分必须为正数: {sum}"
            )));
        }

        let withdrawal = Withdrawal {
            order_number: number,
            owner: login.to_string(),
            sum,
            processed_at: Utc::now(),
        };

        let mut tx = self.storage.begin().await?;
        match Self::debit(tx.as_mut(), &withdrawal).await {
            Ok(balance) => {
                tx.commit().await?;
                info!(order_number = %number, %balance, "积分提现成功");
                Ok(withdrawal)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "提现事务回滚失败");
                }
                Err(e)
            }
        }
    }

    async fn debit(tx: &mut dyn StorageTx, withdrawal: &Withdrawal) -> Result<Decimal> {
        let balance = tx
            .update_balance(&withdrawal.owner, -withdrawal.sum)
            .await?;
        if balance < Decimal::ZERO {
            return Err(AccrualError::InsufficientBalance {
                login: withdrawal.owner.clone(),
                required: withdrawal.sum,
            });
        }
        tx.create_withdrawal(withdrawal).await?;
        Ok(balance)
    }

    /// 用户的提现记录，最新的在前
    pub async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>> {
        self.withdrawals.list_by_user(login).await
    }

    pub async fn balance(&self, login: &str) -> Result<BalanceSummary> {
        let user = self
            .users
            .get(login)
            .await?
            .ok_or_else(|| AccrualError::UserNotFound(login.to_string()))?;
        let withdrawn = self.withdrawals.sum_by_user(login).await?;
        Ok(BalanceSummary {
            current: user.balance,
            withdrawn,
        })
    }
}
