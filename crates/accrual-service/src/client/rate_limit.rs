//! 积分系统限流器
//!
//! 本地令牌桶 + 全局冷却时间。令牌桶速率可被服务端返回的限流提示实时修改；
//! 冷却时间由 `Retry-After` 设置，生效期间所有调用方都必须等待，不论桶内是否有令牌。
//! 同一个限流器在所有对账任务之间共享，任一任务观察到的限流信号对全体生效。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::deadline::{Cancelled, Deadline};

/// 速率下限，防止除零
const MIN_RATE: f64 = 1e-3;

#[derive(Debug)]
struct Bucket {
    /// 每秒补充的令牌数
    rate: f64,
    burst: f64,
    /// 可为负数，表示已被预约的令牌
    tokens: f64,
    updated: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.updated).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.updated = now;
    }
}

/// 令牌桶限流器与全局冷却
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    epoch: Instant,
    /// 冷却截止时刻（相对 epoch 的纳秒数），0 表示无冷却
    cooldown_until: AtomicU64,
}

impl RateLimiter {
    /// 创建限流器，桶初始为满
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let now = Instant::now();
        let burst = f64::from(burst.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                rate: rate_per_sec.max(MIN_RATE),
                burst,
                tokens: burst,
                updated: now,
            }),
            epoch: now,
            cooldown_until: AtomicU64::new(0),
        }
    }

    /// 当前速率（请求/秒）
    pub fn rate(&self) -> f64 {
        self.bucket.lock().rate
    }

    /// 替换速率，非正数或非有限值被忽略并返回 false
    ///
    /// 已积累的令牌按旧速率结算后保留。
    pub fn set_rate(&self, rate_per_sec: f64) -> bool {
        if !rate_per_sec.is_finite() || rate_per_sec <= 0.0 {
            return false;
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.rate = rate_per_sec.max(MIN_RATE);
        true
    }

    /// 获取一个令牌
    ///
    /// 需要等待的时刻晚于截止时间时立即返回 `Cancelled`，且不消耗令牌。
    pub async fn acquire(&self, deadline: &Deadline) -> Result<(), Cancelled> {
        let now = Instant::now();
        let ready_at = self.reserve(now, deadline.at())?;
        if ready_at <= now {
            return Ok(());
        }
        if let Err(cancelled) = deadline.sleep_until(ready_at).await {
            self.release();
            return Err(cancelled);
        }
        Ok(())
    }

    /// 预约一个令牌，返回可以发出请求的时刻
    fn reserve(&self, now: Instant, not_after: Instant) -> Result<Instant, Cancelled> {
        let mut bucket = self.bucket.lock();
        bucket.refill(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(now);
        }

        let wait_secs = (1.0 - bucket.tokens) / bucket.rate;
        let ready_at = Duration::try_from_secs_f64(wait_secs)
            .ok()
            .and_then(|wait| now.checked_add(wait))
            .ok_or(Cancelled)?;
        if ready_at > not_after {
            return Err(Cancelled);
        }

        bucket.tokens -= 1.0;
        Ok(ready_at)
    }

    /// 归还被取消的预约
    fn release(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens = (bucket.tokens + 1.0).min(bucket.burst);
    }

    /// 将全局冷却延长到 `until`，只会向后推移
    pub fn extend_cooldown(&self, until: Instant) {
        let nanos = until.saturating_duration_since(self.epoch).as_nanos();
        let nanos = u64::try_from(nanos).unwrap_or(u64::MAX);
        self.cooldown_until.fetch_max(nanos, Ordering::AcqRel);
    }

    /// 当前冷却截止时刻，已过期或未设置时返回 None
    pub fn cooldown_until(&self) -> Option<Instant> {
        let nanos = self.cooldown_until.load(Ordering::Acquire);
        if nanos == 0 {
            return None;
        }
        let until = self.epoch.checked_add(Duration::from_nanos(nanos))?;
        (until > Instant::now()).then_some(until)
    }

    /// 等待全局冷却结束
    ///
    /// 等待期间冷却可能被其他任务继续延长，因此循环直到不再处于冷却中
    pub async fn wait_cooldown(&self, deadline: &Deadline) -> Result<(), Cancelled> {
        while let Some(until) = self.cooldown_until() {
            deadline.sleep_until(until).await?;
        }
        Ok(())
    }
}
