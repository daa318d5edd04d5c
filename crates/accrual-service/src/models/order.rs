//! 订单模型

use std::fmt;

use chrono::{DateTime, Utc};
use loyalty_shared::luhn;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AccrualError, Result};

/// 订单号
///
/// 外部提交的十进制数字串，必须通过 Luhn 校验。入库后作为订单唯一标识。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct OrderNumber(i64);

impl OrderNumber {
    /// 解析并校验用户提交的订单号
    pub fn parse(raw: &str) -> Result<Self> {
        let digits = raw.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccrualError::InvalidOrderNumber(raw.to_string()));
        }
        if !luhn::is_valid(digits) {
            return Err(AccrualError::InvalidOrderNumber(raw.to_string()));
        }
        digits
            .parse::<i64>()
            .map(Self)
            .map_err(|_| AccrualError::InvalidOrderNumber(raw.to_string()))
    }

    /// 从已校验来源（数据库行、测试数据）构造，不做 Luhn 校验
    pub const fn from_raw(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 订单状态
///
/// `INVALID` 与 `PROCESSED` 为终态，到达后不再变化
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 已提交，积分系统尚未开始处理或尚未登记
    #[default]
    New,
    /// 积分系统计算中
    Processing,
    /// 积分系统拒绝计算，不会产生积分
    Invalid,
    /// 计算完成，积分已入账
    Processed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户提交的订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub number: OrderNumber,
    #[sqlx(rename = "owner_login")]
    pub owner: String,
    pub status: OrderStatus,
    /// 仅在 PROCESSED 时有意义，其余状态为 0
    pub accrual: Decimal,
    pub submitted_at: DateTime<Utc>,
}

impl Order {
    /// 创建 NEW 状态的新订单
    pub fn new(number: OrderNumber, owner: impl Into<String>, submitted_at: DateTime<Utc>) -> Self {
        Self {
            number,
            owner: owner.into(),
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            submitted_at,
        }
    }
}
