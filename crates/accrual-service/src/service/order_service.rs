//! 订单提交服务
//!
//! 校验订单号、落库为 NEW，然后交给对账队列；重复提交按所有者区分处理。

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use crate::error::{AccrualError, Result};
use crate::models::{Order, OrderNumber};
use crate::reconcile::SubmissionQueue;
use crate::repository::OrderRepositoryTrait;

/// 提交结果
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitResult {
    pub order: Order,
    /// 同一用户此前已提交过该订单
    pub already_submitted: bool,
}

#[derive(Clone)]
pub struct OrderService {
    orders: Arc<dyn OrderRepositoryTrait>,
    queue: SubmissionQueue,
}

impl OrderService {
    pub fn new(orders: Arc<dyn OrderRepositoryTrait>, queue: SubmissionQueue) -> Self {
        Self { orders, queue }
    }

    #[instrument(skip(self))]
    pub async fn submit_order(&self, login: &str, raw_number: &str) -> Result<SubmitResult> {
        let number = OrderNumber::parse(raw_number)?;
        let order = Order::new(number, login, Utc::now());

        match self.orders.create(&order).await {
            Ok(()) => {
                info!(order_number = %number, "订单已提交");
                let queued = self.queue.submit(order.clone());
                info!(order_number = %number, queued, "订单已进入对账流程");
                Ok(SubmitResult {
                    order,
                    already_submitted: false,
                })
            }
            Err(AccrualError::OrderAlreadyExists(_)) => {
                let existing = self
                    .orders
                    .get(number)
                    .await?
                    .ok_or(AccrualError::OrderNotFound(number))?;
                if existing.owner != login {
                    return Err(AccrualError::OrderOwnedByAnotherUser(number));
                }
                Ok(SubmitResult {
                    order: existing,
                    already_submitted: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// 用户的订单，最新提交的在前
    pub async fn list_orders(&self, login: &str) -> Result<Vec<Order>> {
        self.orders.list_by_user(login).await
    }
}
