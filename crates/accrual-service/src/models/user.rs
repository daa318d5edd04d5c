//! 用户积分账户模型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 用户积分账户
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub login: String,
    pub balance: Decimal,
}

/// 用户积分概览
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BalanceSummary {
    /// 当前可用积分
    pub current: Decimal,
    /// 累计已提现积分
    pub withdrawn: Decimal,
}
