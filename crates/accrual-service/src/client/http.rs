//! 积分系统 HTTP 客户端
//!
//! 每次查询最多尝试 `max_attempts` 次，每次尝试前先等待全局冷却、再取本地令牌。
//! 429/503 视为限流：从响应体提取新的速率提示，按 `Retry-After` 设置全局冷却；
//! 其余失败按指数退避重试。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loyalty_shared::config::AccrualConfig;
use loyalty_shared::observability::metrics;
use loyalty_shared::retry::RetryPolicy;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::deadline::Deadline;
use super::rate_limit::RateLimiter;
use super::{AccrualFetcher, AccrualOutcome, ExternalStatus, FetchOutcome};
use crate::error::{AccrualError, Result};
use crate::models::OrderNumber;

/// 限流响应体中的速率提示解析器
///
/// 支持两种措辞："N requests per minute allowed" 与 "N requests per second allowed"，
/// 统一换算为请求/秒
pub struct RateHintParser {
    per_minute: Regex,
    per_second: Regex,
}

impl RateHintParser {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            per_minute: Regex::new(r"([0-9]+) requests per minute allowed")?,
            per_second: Regex::new(r"([0-9]+) requests per second allowed")?,
        })
    }

    /// 返回请求/秒，未找到提示时返回 None
    pub fn parse(&self, body: &str) -> Option<f64> {
        if let Some(n) = Self::capture(&self.per_minute, body) {
            return Some(n / 60.0);
        }
        Self::capture(&self.per_second, body)
    }

    fn capture(re: &Regex, body: &str) -> Option<f64> {
        re.captures(body)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(|n| n as f64)
    }
}

/// 积分系统 200 响应体
#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: String,
    status: ExternalStatus,
    #[serde(default)]
    accrual: Option<serde_json::Number>,
}

impl OrderResponse {
    fn into_outcome(self) -> AccrualOutcome {
        let accrual = match self.status {
            ExternalStatus::Processed => self.accrual.as_ref().and_then(parse_accrual),
            _ => None,
        };
        AccrualOutcome {
            order: self.order,
            status: self.status,
            accrual,
        }
    }
}

/// 将 JSON 数字按十进制文本转换，避免经过浮点运算
fn parse_accrual(number: &serde_json::Number) -> Option<Decimal> {
    let text = number.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// 解析秒数形式的 `Retry-After`
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// 单次尝试的结果
#[derive(Debug)]
enum Attempt {
    Finished(FetchOutcome),
    RateLimited { retry_after: Option<Duration> },
    Transient,
}

/// 积分系统 HTTP 客户端
pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    backoff: RetryPolicy,
    max_attempts: u32,
    hints: RateHintParser,
}

impl AccrualClient {
    /// 按配置创建客户端及其专属限流器
    pub fn new(config: &AccrualConfig) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_rps, config.rate_burst));
        Self::with_limiter(config, limiter)
    }

    /// 使用外部注入的限流器创建客户端
    pub fn with_limiter(config: &AccrualConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| AccrualError::Validation(format!("accrual.base_url 无效: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AccrualError::Validation(format!(
                "accrual.base_url 必须是 http(s) 地址: {}",
                config.base_url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let hints = RateHintParser::new().map_err(|e| AccrualError::Internal(e.to_string()))?;
        let max_attempts = config.max_attempts.max(1);

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter,
            backoff: RetryPolicy::exponential(
                max_attempts - 1,
                config.min_backoff(),
                config.max_backoff(),
            ),
            max_attempts,
            hints,
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// 第 `attempt` 次（从 1 开始）失败后的退避时间：`min_backoff * 2^attempt`，不超过上限
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt)
    }

    fn order_url(&self, number: OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }

    async fn attempt(&self, number: OrderNumber, attempt: u32) -> Attempt {
        let response = match self.http.get(self.order_url(number)).send().await {
            Ok(response) => response,
            Err(e) => {
                metrics::record_accrual_request("transport_error");
                warn!(order_number = %number, attempt, error = %e, "请求积分系统失败");
                return Attempt::Transient;
            }
        };

        let status = response.status();
        metrics::record_accrual_request(status.as_str());

        match status {
            StatusCode::NO_CONTENT => Attempt::Finished(FetchOutcome::NotRegistered),
            StatusCode::OK => {
                let body = match response.bytes().await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(order_number = %number, attempt, error = %e, "读取积分系统响应失败");
                        return Attempt::Transient;
                    }
                };
                match serde_json::from_slice::<OrderResponse>(&body) {
                    Ok(parsed) => Attempt::Finished(FetchOutcome::Outcome(parsed.into_outcome())),
                    Err(e) => {
                        warn!(order_number = %number, attempt, error = %e, "积分系统响应格式错误");
                        Attempt::Transient
                    }
                }
            }
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                metrics::record_rate_limit_signal();
                let retry_after = parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();

                if let Some(rate) = self.hints.parse(&body) {
                    if self.limiter.set_rate(rate) {
                        info!(order_number = %number, rate, "根据积分系统提示调整请求速率");
                    }
                }
                warn!(
                    order_number = %number,
                    attempt,
                    status = status.as_u16(),
                    retry_after_secs = retry_after.map(|d| d.as_secs()),
                    "积分系统限流"
                );
                Attempt::RateLimited { retry_after }
            }
            other => {
                warn!(order_number = %number, attempt, status = other.as_u16(), "积分系统返回异常状态");
                Attempt::Transient
            }
        }
    }

    #[instrument(skip(self, deadline), fields(order_number = %number))]
    async fn fetch_with_retry(&self, number: OrderNumber, deadline: &Deadline) -> FetchOutcome {
        for attempt in 1..=self.max_attempts {
            if self.limiter.wait_cooldown(deadline).await.is_err()
                || self.limiter.acquire(deadline).await.is_err()
            {
                return FetchOutcome::Cancelled;
            }

            let result = match deadline.run(self.attempt(number, attempt)).await {
                Ok(result) => result,
                Err(_) => return FetchOutcome::Cancelled,
            };

            let pause = match result {
                Attempt::Finished(outcome) => return outcome,
                Attempt::RateLimited {
                    retry_after: Some(wait),
                } => {
                    let Some(until) = Instant::now().checked_add(wait) else {
                        warn!(retry_after_secs = wait.as_secs(), "Retry-After 超出可表示范围");
                        return FetchOutcome::Cancelled;
                    };
                    self.limiter.extend_cooldown(until);
                    // 冷却超过截止时间，本次对账无法再发请求
                    if until > deadline.at() {
                        debug!(attempt, "Retry-After 超过截止时间");
                        return FetchOutcome::Cancelled;
                    }
                    wait
                }
                Attempt::RateLimited { retry_after: None } | Attempt::Transient => {
                    self.backoff_for_attempt(attempt)
                }
            };

            if attempt == self.max_attempts {
                break;
            }
            debug!(attempt, pause_ms = pause.as_millis() as u64, "等待后重试");
            if deadline.sleep(pause).await.is_err() {
                return FetchOutcome::Cancelled;
            }
        }

        FetchOutcome::Unavailable
    }
}

#[async_trait]
impl AccrualFetcher for AccrualClient {
    async fn fetch(&self, number: OrderNumber, deadline: &Deadline) -> FetchOutcome {
        let outcome = self.fetch_with_retry(number, deadline).await;
        metrics::record_fetch_result(outcome.label());
        outcome
    }
}
