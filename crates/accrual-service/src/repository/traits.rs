//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::{Order, OrderNumber, OrderStatus, User, Withdrawal};

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 订单号已存在时返回 `OrderAlreadyExists`
    async fn create(&self, order: &Order) -> Result<()>;
    async fn get(&self, number: OrderNumber) -> Result<Option<Order>>;
    /// 按提交时间倒序
    async fn list_by_user(&self, login: &str) -> Result<Vec<Order>>;
    /// 非事务的状态更新，订单不存在时返回 `OrderNotFound`，已是终态时返回 `OrderFinalized`
    async fn update(&self, number: OrderNumber, status: OrderStatus, accrual: Decimal)
    -> Result<()>;
    /// 非终态且提交时间早于 `older_than` 的订单，按提交时间正序
    async fn list_unprocessed(
        &self,
        limit: i64,
        offset: i64,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Order>>;
}

/// 用户积分账户仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepositoryTrait: Send + Sync {
    async fn create(&self, login: &str) -> Result<()>;
    async fn get(&self, login: &str) -> Result<Option<User>>;
    /// 非事务地调整余额，返回调整后的余额
    async fn update_balance(&self, login: &str, delta: Decimal) -> Result<Decimal>;
}

/// 提现记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WithdrawalRepositoryTrait: Send + Sync {
    /// 按处理时间倒序
    async fn list_by_user(&self, login: &str) -> Result<Vec<Withdrawal>>;
    async fn sum_by_user(&self, login: &str) -> Result<Decimal>;
}

/// 存储事务
///
/// 提交或回滚后事务即失效，之后的读写和提交返回 `Internal` 错误，回滚为空操作。
/// 未提交即 drop 的事务等同于回滚。
#[async_trait]
pub trait StorageTx: Send {
    /// 与 `OrderRepositoryTrait::update` 相同，终态订单不可改写
    async fn update_order(
        &mut self,
        number: OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<()>;
    /// 调整余额并返回调整后的余额
    async fn update_balance(&mut self, login: &str, delta: Decimal) -> Result<Decimal>;
    /// 提现单号重复时返回 `DuplicateWithdrawal`
    async fn create_withdrawal(&mut self, withdrawal: &Withdrawal) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

/// 事务边界
///
/// 积分入账与提现扣减共用同一事务边界，由存储引擎的隔离级别保证余额一致
#[async_trait]
pub trait TransactionalStorage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageTx>>;
}
