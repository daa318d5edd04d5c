//! 业务服务层
//!
//! 订单提交与积分提现。对账结果只通过订单状态和余额的变化对外可见。

pub mod order_service;
pub mod withdraw_service;

pub use order_service::{OrderService, SubmitResult};
pub use withdraw_service::WithdrawService;
