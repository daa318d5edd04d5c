//! 积分系统客户端
//!
//! 向外部积分计算系统查询订单状态。调用方通过 `AccrualFetcher` trait 依赖客户端，
//! 测试时可替换为 mock 实现。

pub mod deadline;
pub mod http;
pub mod rate_limit;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::OrderNumber;

pub use deadline::{Cancelled, Deadline};
pub use http::{AccrualClient, RateHintParser};
pub use rate_limit::RateLimiter;

/// 积分系统返回的订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalStatus {
    /// 已登记，尚未开始计算
    Registered,
    Invalid,
    Processing,
    Processed,
}

/// 积分系统对某个订单的答复
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualOutcome {
    pub order: String,
    pub status: ExternalStatus,
    /// 仅 PROCESSED 时携带
    pub accrual: Option<Decimal>,
}

/// 一次完整查询（含重试）的结果
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Outcome(AccrualOutcome),
    /// 积分系统没有该订单的记录
    NotRegistered,
    /// 重试次数耗尽仍未得到可用答复
    Unavailable,
    /// 截止时间到达或被取消
    Cancelled,
}

impl FetchOutcome {
    /// 用于指标标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Outcome(_) => "outcome",
            Self::NotRegistered => "not_registered",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

/// 积分查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualFetcher: Send + Sync {
    /// 查询订单当前的积分状态，不返回错误，所有失败都折叠为 `FetchOutcome` 的某个分支
    async fn fetch(&self, number: OrderNumber, deadline: &Deadline) -> FetchOutcome;
}
