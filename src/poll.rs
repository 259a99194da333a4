//! 可取消、有上限的輪詢。
//!
//! 挑戰驗證與憑證下載都以同一套策略輪詢：固定間隔、最多嘗試次數、
//! 可選的整體逾時，並在每次等待時檢查 [`CancellationToken`]。

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::error::{AcmeError, Result};

/// 輪詢策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// 兩次嘗試之間的等待時間。
    pub interval: Duration,
    /// 最多嘗試次數（包含第一次）。
    pub max_attempts: u32,
    /// 整體逾時；`None` 表示只受 `max_attempts` 限制。
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL, Self::DEFAULT_MAX_ATTEMPTS)
    }
}

/// 單次嘗試的結果。
#[derive(Debug, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
}

/// 跨執行緒的取消訊號。
///
/// 複製出來的 token 共用同一個狀態；呼叫 [`cancel`](Self::cancel)
/// 會立即喚醒所有正在 [`sleep`](Self::sleep) 的輪詢。
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 等待 `duration`，期間被取消則提早返回 `true`。
    pub fn sleep(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = cvar
            .wait_timeout_while(guard, duration, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    /// 已取消時回傳 [`AcmeError::Cancelled`]。
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AcmeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// 依 `policy` 反覆呼叫 `attempt`，直到它回傳 [`Poll::Ready`] 或錯誤。
///
/// `attempt` 收到的參數是從 1 開始的嘗試序號。只有狀態檢查本身會被重試；
/// `attempt` 回傳的錯誤會立即中止輪詢。
///
/// # 錯誤
///
/// - 嘗試次數用盡或超過整體逾時：[`AcmeError::Timeout`]
/// - 等待期間被取消：[`AcmeError::Cancelled`]
pub fn poll<T, F>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    operation: &'static str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Result<Poll<T>>,
{
    let deadline = policy.timeout.map(|timeout| Instant::now() + timeout);
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        cancel.check()?;
        attempts += 1;
        if let Poll::Ready(value) = attempt(attempts)? {
            return Ok(value);
        }
        if attempts == policy.max_attempts {
            break;
        }

        let mut wait = policy.interval;
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || remaining < wait {
                break;
            }
            wait = wait.min(remaining);
        }
        if cancel.sleep(wait) {
            return Err(AcmeError::Cancelled);
        }
    }

    Err(AcmeError::Timeout {
        operation,
        attempts,
    })
}
