//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务器
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 和 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "accrual_requests_total",
        "HTTP requests sent to the accrual system, by response status"
    );
    metrics::describe_counter!(
        "accrual_fetch_results_total",
        "Accrual fetch calls by final result"
    );
    metrics::describe_counter!(
        "accrual_rate_limit_signals_total",
        "Rate-limit responses (429/503) received from the accrual system"
    );
    metrics::describe_counter!(
        "reconcile_outcomes_total",
        "Order reconciliation runs by outcome"
    );
    metrics::describe_counter!("ledger_credits_total", "Committed accrual credits");
    metrics::describe_counter!("sweep_cycles_total", "Completed sweep cycles");
    metrics::describe_counter!("sweep_orders_total", "Orders visited by the sweep");
    metrics::describe_histogram!(
        "sweep_cycle_duration_seconds",
        "Sweep cycle duration in seconds"
    );
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last completed background worker run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次对积分系统的 HTTP 请求（status 为状态码或 "transport_error"）
#[inline]
pub fn record_accrual_request(status: &str) {
    metrics::counter!("accrual_requests_total", "status" => status.to_string()).increment(1);
}

/// 记录一次完整查询（含重试）的最终结果
#[inline]
pub fn record_fetch_result(result: &'static str) {
    metrics::counter!("accrual_fetch_results_total", "result" => result).increment(1);
}

#[inline]
pub fn record_rate_limit_signal() {
    metrics::counter!("accrual_rate_limit_signals_total").increment(1);
}

/// 记录单个订单对账结果
#[inline]
pub fn record_reconcile_outcome(outcome: &'static str) {
    metrics::counter!("reconcile_outcomes_total", "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_ledger_credit() {
    metrics::counter!("ledger_credits_total").increment(1);
}

/// 记录一轮扫描
#[inline]
pub fn record_sweep_cycle(orders_visited: u64, duration_secs: f64) {
    metrics::counter!("sweep_cycles_total").increment(1);
    metrics::counter!("sweep_orders_total").increment(orders_visited);
    metrics::histogram!("sweep_cycle_duration_seconds").record(duration_secs);
}

/// 记录后台 Worker 最近一次运行时间，用于健康检查告警
#[inline]
pub fn set_worker_last_run(worker: &'static str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker)
        .set(chrono::Utc::now().timestamp() as f64);
}
