//! 可取消的截止时间
//!
//! 所有等待点（全局冷却、令牌桶、退避、HTTP 请求）都在"计时结束"与
//! "截止时间到达 / 取消信号"之间择一返回，不做阻塞式睡眠。

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 截止时间已到或外部取消
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("截止时间已到或已取消")]
pub struct Cancelled;

/// 一次对账运行的截止时间与取消信号
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    token: CancellationToken,
}

impl Deadline {
    /// 从现在起 `timeout` 后到期，`token` 被取消时提前结束
    pub fn after(timeout: Duration, token: CancellationToken) -> Self {
        Self {
            at: instant_after(timeout),
            token,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.at
    }

    /// 在不晚于本截止时间的前提下派生更短的截止时间，共享取消信号
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            at: self.at.min(instant_after(timeout)),
            token: self.token.child_token(),
        }
    }

    /// 可取消的睡眠
    ///
    /// 睡眠结束前截止时间必然到达时直接返回 `Cancelled`
    pub async fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        let wake_at = Instant::now().checked_add(duration).ok_or(Cancelled)?;
        self.sleep_until(wake_at).await
    }

    /// 可取消地等待到指定时刻
    pub async fn sleep_until(&self, wake_at: Instant) -> Result<(), Cancelled> {
        if self.token.is_cancelled() || wake_at > self.at {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep_until(wake_at) => Ok(()),
        }
    }

    /// 在截止时间内运行 future，超时或取消时丢弃该 future
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Cancelled> {
        if self.is_expired() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep_until(self.at) => Err(Cancelled),
            out = fut => Ok(out),
        }
    }
}

/// 超出时钟可表示范围的时长视为约 30 年后
fn instant_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}
