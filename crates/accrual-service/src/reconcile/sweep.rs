//! 定期扫描未完成的订单
//!
//! 首次对账可能因进程重启、截止时间到达或积分系统不可用而没有完成。
//! 扫描任务按固定间隔分批取出超过对账截止时间仍未进入终态的订单，
//! 以有限并发重新对账，直到没有剩余订单或本周期截止。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use loyalty_shared::config::ReconcileConfig;
use loyalty_shared::observability::metrics;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::worker::ReconcileWorker;
use crate::client::Deadline;
use crate::repository::OrderRepositoryTrait;

/// 单个扫描周期的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub batches: u64,
    pub visited: u64,
    /// 本周期进入终态的订单数
    pub resolved: u64,
}

pub struct SweepScheduler {
    worker: Arc<ReconcileWorker>,
    orders: Arc<dyn OrderRepositoryTrait>,
    interval: Duration,
    batch_size: i64,
    concurrency: usize,
}

impl SweepScheduler {
    pub fn new(
        worker: Arc<ReconcileWorker>,
        orders: Arc<dyn OrderRepositoryTrait>,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            worker,
            orders,
            interval: config.sweep_interval(),
            batch_size: config.sweep_batch_size.max(1),
            concurrency: config.sweep_concurrency.max(1),
        }
    }

    /// 主循环：每个间隔执行一个扫描周期，直到取消
    ///
    /// 周期串行执行，上一个周期未结束时不会启动下一个
    pub async fn run(&self, token: CancellationToken) {
        info!(
            interval = ?self.interval,
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "SweepScheduler 已启动"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let deadline = Deadline::after(self.interval, token.clone());
            self.run_cycle(&deadline).await;
            metrics::set_worker_last_run("sweep");
        }

        info!("SweepScheduler 已停止");
    }

    /// 执行一个扫描周期
    pub async fn run_cycle(&self, deadline: &Deadline) -> SweepReport {
        let started = std::time::Instant::now();
        let staleness =
            chrono::Duration::from_std(self.worker.deadline()).unwrap_or(chrono::Duration::zero());
        let older_than = Utc::now() - staleness;

        let mut report = SweepReport::default();
        // 仍未进入终态的订单留在结果集中，偏移量跳过它们，保证每个订单每周期只处理一次
        let mut offset = 0i64;

        loop {
            if deadline.is_expired() {
                debug!(offset, "扫描周期已到截止时间");
                break;
            }

            let batch = match self
                .orders
                .list_unprocessed(self.batch_size, offset, older_than)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, offset, "查询待对账订单失败");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let fetched = batch.len() as u64;
            let resolved = AtomicU64::new(0);
            futures::stream::iter(batch.iter())
                .for_each_concurrent(self.concurrency, |order| {
                    let resolved = &resolved;
                    async move {
                        if self.worker.reconcile_one(order, deadline).await.reached_terminal() {
                            resolved.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
                .await;
            let resolved = resolved.into_inner();

            report.batches += 1;
            report.visited += fetched;
            report.resolved += resolved;
            offset += (fetched - resolved) as i64;

            if (fetched as i64) < self.batch_size {
                break;
            }
        }

        let elapsed = started.elapsed();
        metrics::record_sweep_cycle(report.visited, elapsed.as_secs_f64());
        info!(
            batches = report.batches,
            visited = report.visited,
            resolved = report.resolved,
            elapsed_ms = elapsed.as_millis() as u64,
            "扫描周期完成"
        );
        report
    }
}
