//! 单个订单的对账
//!
//! 查询积分系统 -> 状态机决策 -> 写入存储。所有失败都只记录日志，
//! 订单保持原状，等待后续扫描重新对账。

use std::sync::Arc;
use std::time::Duration;

use loyalty_shared::observability::metrics;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use super::ledger::LedgerUpdater;
use super::state_machine::{Decision, reconcile};
use crate::client::{AccrualFetcher, Deadline, FetchOutcome};
use crate::models::{Order, OrderStatus};
use crate::repository::OrderRepositoryTrait;

/// 一次对账的结果，仅用于统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReport {
    NotRegistered,
    Unavailable,
    Cancelled,
    Unchanged,
    StatusUpdated(OrderStatus),
    Credited { accrual: Decimal },
    Failed,
}

impl ReconcileReport {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotRegistered => "not_registered",
            Self::Unavailable => "unavailable",
            Self::Cancelled => "cancelled",
            Self::Unchanged => "unchanged",
            Self::StatusUpdated(_) => "status_updated",
            Self::Credited { .. } => "credited",
            Self::Failed => "failed",
        }
    }

    /// 订单是否因本次对账进入终态
    pub fn reached_terminal(&self) -> bool {
        match self {
            Self::StatusUpdated(status) => status.is_terminal(),
            Self::Credited { .. } => true,
            _ => false,
        }
    }
}

pub struct ReconcileWorker {
    fetcher: Arc<dyn AccrualFetcher>,
    orders: Arc<dyn OrderRepositoryTrait>,
    ledger: LedgerUpdater,
    deadline: Duration,
}

impl ReconcileWorker {
    pub fn new(
        fetcher: Arc<dyn AccrualFetcher>,
        orders: Arc<dyn OrderRepositoryTrait>,
        ledger: LedgerUpdater,
        deadline: Duration,
    ) -> Self {
        Self {
            fetcher,
            orders,
            ledger,
            deadline,
        }
    }

    /// 单次对账的时间上限
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// 对一个订单执行对账
    ///
    /// 本次对账的截止时间不晚于 `parent`，并继承其取消信号
    #[instrument(skip(self, order, parent), fields(order_number = %order.number))]
    pub async fn reconcile_one(&self, order: &Order, parent: &Deadline) -> ReconcileReport {
        let deadline = parent.child(self.deadline);
        let report = self.run(order, &deadline).await;
        metrics::record_reconcile_outcome(report.label());
        report
    }

    async fn run(&self, order: &Order, deadline: &Deadline) -> ReconcileReport {
        let outcome = match self.fetcher.fetch(order.number, deadline).await {
            FetchOutcome::Outcome(outcome) => outcome,
            FetchOutcome::NotRegistered => {
                warn!("积分系统未登记该订单，保持 NEW 等待下次扫描");
                return ReconcileReport::NotRegistered;
            }
            FetchOutcome::Unavailable => {
                warn!("积分系统暂不可用，等待下次扫描");
                return ReconcileReport::Unavailable;
            }
            FetchOutcome::Cancelled => {
                debug!("对账已取消");
                return ReconcileReport::Cancelled;
            }
        };

        match reconcile(order, &outcome) {
            Decision::NoChange => {
                debug!(status = %order.status, "订单状态未变化");
                ReconcileReport::Unchanged
            }
            Decision::StatusOnly(status) => {
                match self.orders.update(order.number, status, Decimal::ZERO).await {
                    Ok(()) => {
                        info!(from = %order.status, to = %status, "订单状态已更新");
                        ReconcileReport::StatusUpdated(status)
                    }
                    Err(e) => {
                        error!(error = %e, to = %status, "更新订单状态失败");
                        ReconcileReport::Failed
                    }
                }
            }
            Decision::Terminal { accrual } => match self.ledger.apply_terminal(order, accrual).await {
                Ok(_) => ReconcileReport::Credited { accrual },
                Err(e) => {
                    error!(error = %e, %accrual, "积分入账失败，已回滚");
                    ReconcileReport::Failed
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AccrualOutcome, ExternalStatus, MockAccrualFetcher};
    use crate::error::AccrualError;
    use crate::models::OrderNumber;
    use crate::repository::{MemoryStorage, MockOrderRepositoryTrait, TransactionalStorage};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tokio_util::sync::CancellationToken;

    fn order() -> Order {
        Order::new(OrderNumber::from_raw(79927398713), "alice", Utc::now())
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(90), CancellationToken::new())
    }

    fn ledger() -> LedgerUpdater {
        let storage: Arc<dyn TransactionalStorage> = Arc::new(MemoryStorage::new());
        LedgerUpdater::new(storage)
    }

    fn fetcher_returning(outcome: FetchOutcome) -> MockAccrualFetcher {
        let mut fetcher = MockAccrualFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(move |_, _| outcome.clone());
        fetcher
    }

    #[tokio::test]
    async fn test_not_registered_writes_nothing() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_update().never();

        let worker = ReconcileWorker::new(
            Arc::new(fetcher_returning(FetchOutcome::NotRegistered)),
            Arc::new(orders),
            ledger(),
            Duration::from_secs(90),
        );
        let report = worker.reconcile_one(&order(), &deadline()).await;
        assert_eq!(report, ReconcileReport::NotRegistered);
    }

    #[tokio::test]
    async fn test_unavailable_and_cancelled_write_nothing() {
        for (outcome, expected) in [
            (FetchOutcome::Unavailable, ReconcileReport::Unavailable),
            (FetchOutcome::Cancelled, ReconcileReport::Cancelled),
        ] {
            let mut orders = MockOrderRepositoryTrait::new();
            orders.expect_update().never();
            let worker = ReconcileWorker::new(
                Arc::new(fetcher_returning(outcome)),
                Arc::new(orders),
                ledger(),
                Duration::from_secs(90),
            );
            assert_eq!(worker.reconcile_one(&order(), &deadline()).await, expected);
        }
    }

    #[tokio::test]
    async fn test_processing_updates_status_without_accrual() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_update()
            .withf(|number, status, accrual| {
                number.value() == 79927398713
                    && *status == OrderStatus::Processing
                    && accrual.is_zero()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let worker = ReconcileWorker::new(
            Arc::new(fetcher_returning(FetchOutcome::Outcome(AccrualOutcome {
                order: "79927398713".to_string(),
                status: ExternalStatus::Processing,
                accrual: None,
            }))),
            Arc::new(orders),
            ledger(),
            Duration::from_secs(90),
        );
        let report = worker.reconcile_one(&order(), &deadline()).await;
        assert_eq!(report, ReconcileReport::StatusUpdated(OrderStatus::Processing));
        assert!(!report.reached_terminal());
    }

    #[tokio::test]
    async fn test_status_update_failure_is_reported_not_raised() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_update()
            .returning(|_, _, _| Err(AccrualError::Database(sqlx::Error::PoolTimedOut)));

        let worker = ReconcileWorker::new(
            Arc::new(fetcher_returning(FetchOutcome::Outcome(AccrualOutcome {
                order: "79927398713".to_string(),
                status: ExternalStatus::Invalid,
                accrual: None,
            }))),
            Arc::new(orders),
            ledger(),
            Duration::from_secs(90),
        );
        assert_eq!(
            worker.reconcile_one(&order(), &deadline()).await,
            ReconcileReport::Failed
        );
    }

    #[tokio::test]
    async fn test_processed_goes_through_ledger() {
        let storage = MemoryStorage::new();
        crate::repository::UserRepositoryTrait::create(&storage, "alice")
            .await
            .unwrap();
        let order = order();
        OrderRepositoryTrait::create(&storage, &order).await.unwrap();

        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_update().never();

        let worker = ReconcileWorker::new(
            Arc::new(fetcher_returning(FetchOutcome::Outcome(AccrualOutcome {
                order: "79927398713".to_string(),
                status: ExternalStatus::Processed,
                accrual: Some(dec!(500.00)),
            }))),
            Arc::new(orders),
            LedgerUpdater::new(Arc::new(storage.clone())),
            Duration::from_secs(90),
        );
        let report = worker.reconcile_one(&order, &deadline()).await;
        assert_eq!(report, ReconcileReport::Credited { accrual: dec!(500.00) });
        assert!(report.reached_terminal());

        let user = crate::repository::UserRepositoryTrait::get(&storage, "alice")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.balance, dec!(500.00));
    }

    #[tokio::test]
    async fn test_worker_deadline_never_exceeds_parent() {
        let mut fetcher = MockAccrualFetcher::new();
        let parent = Deadline::after(Duration::from_secs(5), CancellationToken::new());
        let parent_at = parent.at();
        fetcher
            .expect_fetch()
            .withf(move |_, deadline| deadline.at() <= parent_at)
            .returning(|_, _| FetchOutcome::Cancelled);

        let worker = ReconcileWorker::new(
            Arc::new(fetcher),
            Arc::new(MockOrderRepositoryTrait::new()),
            ledger(),
            Duration::from_secs(90),
        );
        assert_eq!(
            worker.reconcile_one(&order(), &parent).await,
            ReconcileReport::Cancelled
        );
    }
}
