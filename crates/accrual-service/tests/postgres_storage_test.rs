//! PostgreSQL 存储集成测试
//!
//! 验证 SQL 实现与内存实现的语义一致：约束冲突映射、事务回滚、未完成订单查询。
//!
//! ## 运行方式
//!
//! ```bash
//! DATABASE_URL=postgres://... cargo test --test postgres_storage_test -- --ignored
//! ```

use chrono::Utc;
use loyalty_accrual::models::{Order, OrderNumber, OrderStatus, Withdrawal};
use loyalty_accrual::reconcile::LedgerUpdater;
use loyalty_accrual::repository::{
    OrderRepositoryTrait, StorageTx, Storages, TransactionalStorage, UserRepositoryTrait,
    WithdrawalRepositoryTrait,
};
use loyalty_accrual::service::WithdrawService;
use loyalty_shared::database::Database;
use loyalty_shared::test_utils::{test_database_config, test_login, test_order_number};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// ==================== 辅助函数 ====================

async fn setup() -> Storages {
    let db = Database::connect(&test_database_config())
        .await
        .expect("数据库连接失败");
    db.run_migrations().await.expect("数据库迁移失败");
    Storages::postgres(db.pool().clone())
}

async fn seed_user(storages: &Storages) -> String {
    let login = test_login();
    storages.users.create(&login).await.expect("创建测试用户失败");
    login
}

async fn seed_order(storages: &Storages, login: &str) -> Order {
    let order = Order::new(OrderNumber::from_raw(test_order_number()), login, Utc::now());
    storages.orders.create(&order).await.expect("创建测试订单失败");
    order
}

// ==================== 测试 ====================

#[tokio::test]
#[ignore = "需要 PostgreSQL 环境"]
async fn test_create_order_conflicts() {
    let storages = setup().await;
    let login = seed_user(&storages).await;
    let order = seed_order(&storages, &login).await;

    let err = storages.orders.create(&order).await.unwrap_err();
    assert_eq!(err.error_code(), "ORDER_ALREADY_EXISTS");

    let orphan = Order::new(OrderNumber::from_raw(test_order_number()), test_login(), Utc::now());
    let err = storages.orders.create(&orphan).await.unwrap_err();
    assert_eq!(err.error_code(), "USER_NOT_FOUND");

    let err = storages.users.create(&login).await.unwrap_err();
    assert_eq!(err.error_code(), "USER_ALREADY_EXISTS");
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 环境"]
async fn test_ledger_credit_commits_both_writes() {
    let storages = setup().await;
    let login = seed_user(&storages).await;
    let order = seed_order(&storages, &login).await;

    let ledger = LedgerUpdater::new(storages.tx.clone());
    let balance = ledger.apply_terminal(&order, dec!(500.00)).await.unwrap();
    assert_eq!(balance, dec!(500.00));

    let stored = storages.orders.get(order.number).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Processed);
    assert_eq!(stored.accrual, dec!(500.00));

    // 终态订单不可再次入账
    let err = ledger.apply_terminal(&order, dec!(500.00)).await.unwrap_err();
    assert_eq!(err.error_code(), "ORDER_FINALIZED");
    let user = storages.users.get(&login).await.unwrap().unwrap();
    assert_eq!(user.balance, dec!(500.00));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 环境"]
async fn test_dropped_transaction_rolls_back() {
    let storages = setup().await;
    let login = seed_user(&storages).await;
    let order = seed_order(&storages, &login).await;

    {
        let mut tx = storages.tx.begin().await.unwrap();
        tx.update_order(order.number, OrderStatus::Processed, dec!(1))
            .await
            .unwrap();
        tx.update_balance(&login, dec!(1)).await.unwrap();
    }

    let stored = storages.orders.get(order.number).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::New);
    let user = storages.users.get(&login).await.unwrap().unwrap();
    assert_eq!(user.balance, Decimal::ZERO);
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 环境"]
async fn test_withdraw_respects_balance_constraint() {
    let storages = setup().await;
    let login = seed_user(&storages).await;
    storages.users.update_balance(&login, dec!(100)).await.unwrap();

    let service = WithdrawService::new(
        storages.users.clone(),
        storages.withdrawals.clone(),
        storages.tx.clone(),
    );
    let number = test_order_number().to_string();

    let err = service.withdraw(&login, &number, dec!(100.01)).await.unwrap_err();
    assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");

    let withdrawal: Withdrawal = service.withdraw(&login, &number, dec!(40)).await.unwrap();
    assert_eq!(withdrawal.sum, dec!(40));

    let err = service.withdraw(&login, &number, dec!(1)).await.unwrap_err();
    assert_eq!(err.error_code(), "DUPLICATE_WITHDRAWAL");

    let summary = service.balance(&login).await.unwrap();
    assert_eq!(summary.current, dec!(60));
    assert_eq!(summary.withdrawn, dec!(40));
    assert_eq!(storages.withdrawals.sum_by_user(&login).await.unwrap(), dec!(40));
}

#[tokio::test]
#[ignore = "需要 PostgreSQL 环境"]
async fn test_list_unprocessed_excludes_terminal_and_fresh() {
    let storages = setup().await;
    let login = seed_user(&storages).await;

    let mut stale = Order::new(
        OrderNumber::from_raw(test_order_number()),
        login.as_str(),
        Utc::now() - chrono::Duration::days(3650),
    );
    storages.orders.create(&stale).await.unwrap();

    let mut finished = stale.clone();
    finished.number = OrderNumber::from_raw(test_order_number());
    finished.status = OrderStatus::Invalid;
    storages.orders.create(&finished).await.unwrap();

    let fresh = seed_order(&storages, &login).await;

    let cutoff = Utc::now() - chrono::Duration::seconds(90);
    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let page = storages.orders.list_unprocessed(100, offset, cutoff).await.unwrap();
        if page.is_empty() {
            break;
        }
        offset += page.len() as i64;
        seen.extend(page.into_iter().map(|o| o.number));
    }
    assert!(seen.contains(&stale.number));
    assert!(!seen.contains(&finished.number));
    assert!(!seen.contains(&fresh.number));

    stale.status = OrderStatus::Processing;
    storages
        .orders
        .update(stale.number, stale.status, Decimal::ZERO)
        .await
        .unwrap();
    assert_eq!(
        storages.orders.get(stale.number).await.unwrap().unwrap().status,
        OrderStatus::Processing
    );
}
