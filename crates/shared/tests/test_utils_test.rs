//! 测试工具集成测试
//!
//! 验证测试数据生成器在并行测试下的唯一性，以及生成的号码满足 Luhn 校验。

use std::collections::HashSet;
use std::time::Duration;

use loyalty_shared::luhn;
use loyalty_shared::retry::{RetryPolicy, retry_with_policy};
use loyalty_shared::test_utils::{test_database_config, test_login, test_order_number};

// ==================== 订单号生成 ====================

#[test]
fn test_order_numbers_pass_luhn() {
    for _ in 0..500 {
        let number = test_order_number();
        assert!(number > 0);
        assert!(luhn::is_valid_number(number), "{number} 未通过 Luhn 校验");
    }
}

#[test]
fn test_order_numbers_unique_across_threads() {
    let handles: Vec<_> = (0..4)
        .map(|_| std::thread::spawn(|| (0..25).map(|_| test_order_number()).collect::<Vec<_>>()))
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for number in handle.join().unwrap() {
            assert!(seen.insert(number), "重复的订单号 {number}");
        }
    }
    assert_eq!(seen.len(), 100);
}

// ==================== 登录名生成 ====================

#[test]
fn test_logins_unique() {
    let logins: HashSet<_> = (0..100).map(|_| test_login()).collect();
    assert_eq!(logins.len(), 100);
    assert!(logins.iter().all(|l| l.starts_with("test-user-")));
}

// ==================== 数据库配置 ====================

#[test]
fn test_database_config_points_to_postgres() {
    let config = test_database_config();
    assert!(config.url.starts_with("postgres://"));
    assert!(config.max_connections >= config.min_connections);
    assert!(config.connect_timeout_seconds > 0);
}

// ==================== 重试 ====================

#[test]
fn test_retry_returns_first_success() {
    let policy = RetryPolicy::exponential(3, Duration::from_millis(1), Duration::from_millis(2));
    let result: Result<i64, String> = tokio_test::block_on(retry_with_policy(
        &policy,
        "generate",
        |_: &String| true,
        || async { Ok(test_order_number()) },
    ));
    assert!(luhn::is_valid_number(result.unwrap()));
}
