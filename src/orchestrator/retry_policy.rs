//! 重试策略
//!
//! 纯函数：只根据"已尝试次数 + 错误分类"决定重试还是放弃，不涉及任何 I/O。
//!
//! - Permanent 错误立即放弃
//! - 总尝试次数不超过 `max_retries + 1`
//! - 等待时间 = `min(backoff_max, backoff_base * 2^(n-1))`，
//!   错误自带的建议等待时间更长时取建议值，但不超过 `hint_max`

use crate::error::ErrorKind;
use std::time::Duration;

/// 指数退避参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    /// 服务端建议等待时间（Retry-After、配额退避）的上限
    pub hint_max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            hint_max: Duration::from_secs(300),
        }
    }
}

impl Backoff {
    /// 第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// `attempts`：包括刚失败的这一次在内，已经执行的尝试次数
    pub fn decide(&self, attempts: u32, error: &ErrorKind) -> RetryDecision {
        if !error.is_transient() || attempts > self.max_retries {
            return RetryDecision::GiveUp;
        }

        let delay = self.backoff.delay(attempts);
        let delay = match error.retry_hint() {
            Some(hint) if hint > delay => hint.min(self.backoff.hint_max.max(delay)),
            _ => delay,
        };
        RetryDecision::Retry { delay }
    }
}
