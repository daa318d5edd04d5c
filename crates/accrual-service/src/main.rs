//! 积分对账服务入口
//!
//! 启动数据库、积分系统客户端和对账后台任务，收到关闭信号后优雅退出。

use std::sync::Arc;

use anyhow::Result;
use loyalty_shared::{
    config::AppConfig,
    database::Database,
    error::InfraError,
    observability,
    retry::{RetryPolicy, retry_with_policy},
};
use tokio::signal;
use tracing::{error, info};

use loyalty_accrual::{AccrualClient, ReconcileRuntime, Storages};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置，失败时使用默认值
    let config = AppConfig::load("accrual-service").unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        let mut config = AppConfig {
            service_name: "accrual-service".to_string(),
            ..Default::default()
        };
        config.apply_legacy_env(|key| std::env::var(key).ok());
        config
    });

    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting accrual-service...");
    info!(
        environment = %config.environment,
        accrual_base_url = %config.accrual.base_url,
        "Configuration loaded"
    );

    // 2. 数据库连接（启动时数据库可能尚未就绪）
    let db = retry_with_policy(
        &RetryPolicy::default(),
        "database_connect",
        InfraError::is_retryable,
        || Database::connect(&config.database),
    )
    .await?;
    db.run_migrations().await?;
    info!("Database connection established");

    // 3. 积分系统客户端与对账运行时
    let client = AccrualClient::new(&config.accrual)?;
    let storages = Storages::postgres(db.pool().clone());
    let runtime = ReconcileRuntime::start(&config.reconcile, storages, Arc::new(client));

    shutdown_signal().await;

    runtime.shutdown().await;
    db.close().await;
    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
