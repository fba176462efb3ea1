//! 指数退避重试
//!
//! 对任意异步可失败操作执行最多 max_attempts 次；失败后休眠 current_delay（从 initial_delay 起，
//! 每次乘以 factor，封顶 max_delay）再重试。耗尽后返回 RetryError，不 panic、不向上抛出。

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// 退避参数
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration, factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            // NaN 也归为 1.0
            factor: if !(factor >= 1.0) { 1.0 } else { factor },
        }
    }

    /// LLM 调用的默认策略：4 次、1s 起、封顶 16s、倍数 2
    pub fn llm_default() -> Self {
        Self::new(4, Duration::from_secs(1), Duration::from_secs(16), 2.0)
    }

    /// 每两次尝试之间的休眠序列（长度 max_attempts - 1）
    pub fn delays(&self) -> Vec<Duration> {
        let mut out = Vec::new();
        let mut delay = self.initial_delay.min(self.max_delay);
        for _ in 1..self.max_attempts {
            out.push(delay);
            delay = self.next_delay(delay);
        }
        out
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let next = current.as_secs_f64() * self.factor;
        if !(next < self.max_delay.as_secs_f64()) {
            self.max_delay
        } else {
            Duration::from_secs_f64(next)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::llm_default()
    }
}

/// 重试失败
#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    /// 判定为不可重试的错误，提前放弃
    #[error("non-retryable error on attempt {attempt}: {error}")]
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// 所有错误均视为可重试
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(policy, op, |_| true).await
}

/// should_retry 返回 false 时立即放弃，返回 RetryError::Aborted
pub async fn retry_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut op: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delay = policy.initial_delay.min(policy.max_delay);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !should_retry(&err) {
                    tracing::warn!(attempt, error = %err, "non-retryable error");
                    return Err(RetryError::Aborted { attempt, error: err });
                }
                if attempt >= policy.max_attempts {
                    tracing::error!(attempts = attempt, error = %err, "operation failed after all retries");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}
