//! 数据库仓储层
//!
//! 提供订单、积分账户、提现记录的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 使用 SQLx 进行类型安全的数据库操作
//! - 事务控制由调用方（对账、提现）通过 `TransactionalStorage` 决定
//! - 定义 trait 接口以支持 mock 测试和内存实现

mod memory;
mod order_repo;
mod pg_tx;
mod traits;
mod user_repo;
mod withdrawal_repo;

use std::sync::Arc;

use sqlx::PgPool;

pub use memory::{MemoryStorage, MemoryStorageTx};
pub use order_repo::OrderRepository;
pub use pg_tx::{PgStorageTx, PgTransactionalStorage};
pub use traits::*;
pub use user_repo::UserRepository;
pub use withdrawal_repo::WithdrawalRepository;

/// PostgreSQL 唯一约束冲突
const UNIQUE_VIOLATION: &str = "23505";
/// PostgreSQL CHECK 约束冲突
const CHECK_VIOLATION: &str = "23514";
/// PostgreSQL 外键约束冲突
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    db_error_code(err).as_deref() == Some(UNIQUE_VIOLATION)
}

fn is_check_violation(err: &sqlx::Error) -> bool {
    db_error_code(err).as_deref() == Some(CHECK_VIOLATION)
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    db_error_code(err).as_deref() == Some(FOREIGN_KEY_VIOLATION)
}

fn db_error_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// 服务所需的全部存储依赖
#[derive(Clone)]
pub struct Storages {
    pub orders: Arc<dyn OrderRepositoryTrait>,
    pub users: Arc<dyn UserRepositoryTrait>,
    pub withdrawals: Arc<dyn WithdrawalRepositoryTrait>,
    pub tx: Arc<dyn TransactionalStorage>,
}

impl Storages {
    /// 基于 PostgreSQL 连接池构建
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            orders: Arc::new(OrderRepository::new(pool.clone())),
            users: Arc::new(UserRepository::new(pool.clone())),
            withdrawals: Arc::new(WithdrawalRepository::new(pool.clone())),
            tx: Arc::new(PgTransactionalStorage::new(pool)),
        }
    }

    /// 基于同一份内存数据构建
    pub fn in_memory(storage: MemoryStorage) -> Self {
        let storage = Arc::new(storage);
        Self {
            orders: storage.clone(),
            users: storage.clone(),
            withdrawals: storage.clone(),
            tx: storage,
        }
    }
}
