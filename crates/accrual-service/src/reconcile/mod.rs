//! 订单积分对账
//!
//! - `state_machine`：根据积分系统答复决定状态变更
//! - `worker`：单个订单的完整对账流程
//! - `ledger`：PROCESSED 与入账的事务写入
//! - `dispatcher`：新提交订单的有界队列
//! - `sweep`：定期补偿未完成的订单

pub mod dispatcher;
pub mod ledger;
pub mod state_machine;
pub mod sweep;
pub mod worker;

pub use dispatcher::{Dispatcher, SubmissionQueue};
pub use ledger::LedgerUpdater;
pub use state_machine::{Decision, map_status, reconcile};
pub use sweep::{SweepReport, SweepScheduler};
pub use worker::{ReconcileReport, ReconcileWorker};
