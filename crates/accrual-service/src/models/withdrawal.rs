//! 积分提现模型

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::OrderNumber;

/// 积分提现记录
///
/// 以订单号为唯一键，同一订单号只能提现一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Withdrawal {
    pub order_number: OrderNumber,
    #[sqlx(rename = "owner_login")]
    pub owner: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}
