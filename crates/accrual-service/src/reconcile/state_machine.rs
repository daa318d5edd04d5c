//! 订单状态机
//!
//! 纯函数：根据订单当前状态和积分系统答复，决定需要做的存储写入。

use rust_decimal::Decimal;
use tracing::error;

use crate::client::{AccrualOutcome, ExternalStatus};
use crate::models::{Order, OrderStatus};

/// 对账决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 无需写入
    NoChange,
    /// 仅更新状态
    StatusOnly(OrderStatus),
    /// 进入 PROCESSED 并入账
    Terminal { accrual: Decimal },
}

/// 积分系统状态到本地订单状态的映射
pub fn map_status(status: ExternalStatus) -> OrderStatus {
    match status {
        ExternalStatus::Registered => OrderStatus::New,
        ExternalStatus::Processing => OrderStatus::Processing,
        ExternalStatus::Invalid => OrderStatus::Invalid,
        ExternalStatus::Processed => OrderStatus::Processed,
    }
}

pub fn reconcile(current: &Order, outcome: &AccrualOutcome) -> Decision {
    if current.status.is_terminal() {
        return Decision::NoChange;
    }

    let next = map_status(outcome.status);
    if next == current.status {
        return Decision::NoChange;
    }
    if next != OrderStatus::Processed {
        return Decision::StatusOnly(next);
    }

    match outcome.accrual {
        Some(accrual) if accrual > Decimal::ZERO => Decision::Terminal { accrual },
        other => {
            error!(
                order_number = %current.number,
                accrual = ?other,
                "积分系统返回 PROCESSED 但积分非正，忽略该答复"
            );
            Decision::NoChange
        }
    }
}
