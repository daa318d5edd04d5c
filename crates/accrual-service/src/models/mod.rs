//! 积分服务领域模型

pub mod order;
pub mod user;
pub mod withdrawal;

pub use order::{Order, OrderNumber, OrderStatus};
pub use user::{BalanceSummary, User};
pub use withdrawal::Withdrawal;
