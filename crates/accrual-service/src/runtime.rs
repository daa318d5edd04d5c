//! 对账后台任务的组装与生命周期
//!
//! 持有唯一的取消信号：关闭时停止扫描、关闭队列，并让所有进行中的对账在下一个等待点返回。

use std::sync::Arc;

use loyalty_shared::config::ReconcileConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::client::AccrualFetcher;
use crate::reconcile::{
    Dispatcher, LedgerUpdater, ReconcileWorker, SubmissionQueue, SweepScheduler, dispatcher,
};
use crate::repository::Storages;
use crate::service::{OrderService, WithdrawService};

pub struct ReconcileRuntime {
    storages: Storages,
    queue: SubmissionQueue,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ReconcileRuntime {
    /// 启动 Dispatcher 与 SweepScheduler
    pub fn start(
        config: &ReconcileConfig,
        storages: Storages,
        fetcher: Arc<dyn AccrualFetcher>,
    ) -> Self {
        let token = CancellationToken::new();
        let worker = Arc::new(ReconcileWorker::new(
            fetcher,
            storages.orders.clone(),
            LedgerUpdater::new(storages.tx.clone()),
            config.deadline(),
        ));

        let (queue, receiver) = dispatcher::channel(config.queue_capacity);
        let dispatcher = Dispatcher::new(worker.clone(), receiver, config.dispatch_concurrency);
        let sweep = SweepScheduler::new(worker, storages.orders.clone(), config);

        let tasks = vec![
            tokio::spawn(dispatcher.run(token.clone())),
            tokio::spawn({
                let token = token.clone();
                async move { sweep.run(token).await }
            }),
        ];

        info!(
            deadline_secs = config.deadline_secs,
            queue_capacity = config.queue_capacity,
            "对账运行时已启动"
        );

        Self {
            storages,
            queue,
            token,
            tasks,
        }
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(self.storages.orders.clone(), self.queue.clone())
    }

    pub fn withdraw_service(&self) -> WithdrawService {
        WithdrawService::new(
            self.storages.users.clone(),
            self.storages.withdrawals.clone(),
            self.storages.tx.clone(),
        )
    }

    /// 取消所有后台任务并等待其退出
    pub async fn shutdown(self) {
        self.token.cancel();
        drop(self.queue);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "后台任务异常退出");
            }
        }
        info!("对账运行时已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Deadline, FetchOutcome};
    use crate::models::{OrderNumber, OrderStatus};
    use crate::repository::{MemoryStorage, UserRepositoryTrait};
    use async_trait::async_trait;
    use std::time::Duration;

    /// 等到截止时间或取消
    struct SlowFetcher;

    #[async_trait]
    impl AccrualFetcher for SlowFetcher {
        async fn fetch(&self, _number: OrderNumber, deadline: &Deadline) -> FetchOutcome {
            match deadline.run(std::future::pending::<()>()).await {
                Ok(()) => FetchOutcome::Unavailable,
                Err(_) => FetchOutcome::Cancelled,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_in_flight_reconciliation() {
        let storage = MemoryStorage::new();
        UserRepositoryTrait::create(&storage, "alice").await.unwrap();
        let runtime = ReconcileRuntime::start(
            &ReconcileConfig::default(),
            Storages::in_memory(storage.clone()),
            Arc::new(SlowFetcher),
        );

        let submitted = runtime
            .order_service()
            .submit_order("alice", "79927398713")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        tokio::time::timeout(Duration::from_secs(5), runtime.shutdown())
            .await
            .unwrap();

        let order = crate::repository::OrderRepositoryTrait::get(&storage, submitted.order.number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::New);
    }
}
