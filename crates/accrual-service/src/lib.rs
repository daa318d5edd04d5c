//! 积分对账服务
//!
//! 用户提交订单后，向外部积分计算系统查询订单状态，并将最终积分计入用户余额。
//!
//! ## 核心功能
//!
//! - **限流客户端**：本地令牌桶 + 服务端限流提示 + `Retry-After` 全局冷却 + 指数退避
//! - **订单状态机**：积分系统答复到本地状态的单调映射
//! - **事务入账**：订单进入 PROCESSED 与余额增加原子完成
//! - **定期扫描**：补偿未完成的对账
//! - **提现**：余额扣减与提现记录原子完成
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 存储层（PostgreSQL 与内存实现）
//! - `client`: 积分系统客户端
//! - `reconcile`: 对账流程
//! - `service`: 订单提交与提现服务
//! - `runtime`: 后台任务生命周期

pub mod client;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod repository;
pub mod runtime;
pub mod service;

pub use client::{AccrualClient, AccrualFetcher, Deadline, FetchOutcome, RateLimiter};
pub use error::{AccrualError, Result};
pub use models::*;
pub use reconcile::{LedgerUpdater, ReconcileReport, ReconcileWorker, SweepReport, SweepScheduler};
pub use repository::{MemoryStorage, Storages};
pub use runtime::ReconcileRuntime;
pub use service::{OrderService, SubmitResult, WithdrawService};
