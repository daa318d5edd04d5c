//! 积分服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::OrderNumber;

/// 积分服务错误类型
#[derive(Debug, Error)]
pub enum AccrualError {
    // === 订单相关错误 ===
    #[error("订单号格式错误: {0}")]
    InvalidOrderNumber(String),

    #[error("订单已被其他用户提交: {0}")]
    OrderOwnedByAnotherUser(OrderNumber),

    #[error("订单不存在: {0}")]
    OrderNotFound(OrderNumber),

    #[error("订单已存在: {0}")]
    OrderAlreadyExists(OrderNumber),

    #[error("订单已处于终态: {0}")]
    OrderFinalized(OrderNumber),

    // === 用户相关错误 ===
    #[error("用户不存在: {0}")]
    UserNotFound(String),

    #[error("用户已存在: {0}")]
    UserAlreadyExists(String),

    // === 提现相关错误 ===
    #[error("积分余额不足: login={login}, 需要 {required}")]
    InsufficientBalance { login: String, required: Decimal },

    #[error("重复的提现请求: {0}")]
    DuplicateWithdrawal(OrderNumber),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP 客户端错误: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("参数校验失败: {0}")]
    Validation(String),
}

/// 积分服务 Result 类型别名
pub type Result<T> = std::result::Result<T, AccrualError>;

impl AccrualError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::HttpClient(_))
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_) | Self::HttpClient(_) | Self::Internal(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidOrderNumber(_) => "INVALID_ORDER_NUMBER",
            Self::OrderOwnedByAnotherUser(_) => "ORDER_OWNED_BY_ANOTHER_USER",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::OrderAlreadyExists(_) => "ORDER_ALREADY_EXISTS",
            Self::OrderFinalized(_) => "ORDER_FINALIZED",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::UserAlreadyExists(_) => "USER_ALREADY_EXISTS",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::DuplicateWithdrawal(_) => "DUPLICATE_WITHDRAWAL",
            Self::Database(_) => "DATABASE_ERROR",
            Self::HttpClient(_) => "HTTP_CLIENT_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
        }
    }
}
