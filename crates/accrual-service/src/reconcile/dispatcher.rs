//! 新订单对账队列
//!
//! 提交路径只负责入队，不等待对账结果；Dispatcher 以有限并发消费队列。
//! 队列满或已关闭时订单仍以 NEW 状态留在存储中，由扫描任务补偿。

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::worker::ReconcileWorker;
use crate::client::Deadline;
use crate::models::Order;

/// 创建容量为 `capacity` 的对账队列
pub fn channel(capacity: usize) -> (SubmissionQueue, mpsc::Receiver<Order>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SubmissionQueue { tx }, rx)
}

/// 对账队列的发送端
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    tx: mpsc::Sender<Order>,
}

impl SubmissionQueue {
    /// 非阻塞入队，返回是否成功
    pub fn submit(&self, order: Order) -> bool {
        match self.tx.try_send(order) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(order)) => {
                warn!(order_number = %order.number, "对账队列已满，订单留待扫描处理");
                false
            }
            Err(mpsc::error::TrySendError::Closed(order)) => {
                warn!(order_number = %order.number, "对账队列已关闭，订单留待扫描处理");
                false
            }
        }
    }
}

pub struct Dispatcher {
    worker: Arc<ReconcileWorker>,
    receiver: mpsc::Receiver<Order>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(
        worker: Arc<ReconcileWorker>,
        receiver: mpsc::Receiver<Order>,
        concurrency: usize,
    ) -> Self {
        Self {
            worker,
            receiver,
            concurrency: concurrency.max(1),
        }
    }

    /// 消费队列直到取消或所有发送端关闭，退出前等待进行中的对账结束
    pub async fn run(mut self, token: CancellationToken) {
        info!(concurrency = self.concurrency, "Dispatcher 已启动");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            let order = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                order = self.receiver.recv() => match order {
                    Some(order) => order,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = self.worker.clone();
            let deadline = Deadline::after(worker.deadline(), token.clone());
            tasks.spawn(async move {
                let _permit = permit;
                worker.reconcile_one(&order, &deadline).await
            });

            while let Some(joined) = tasks.try_join_next() {
                Self::log_joined(joined);
            }
        }

        self.receiver.close();
        debug!(in_flight = tasks.len(), "Dispatcher 等待进行中的对账结束");
        while let Some(joined) = tasks.join_next().await {
            Self::log_joined(joined);
        }
        info!("Dispatcher 已停止");
    }

    fn log_joined(joined: Result<super::ReconcileReport, tokio::task::JoinError>) {
        if let Err(e) = joined {
            error!(error = %e, "对账任务异常退出");
        }
    }
}
