//! 滑动窗口限流器 - 基础设施层
//!
//! 进程内唯一的共享可变状态，所有 OCR 请求都要先在这里拿到准入。

use crate::config::RateLimitConfig;
use crate::error::{AppError, AppResult};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 滑动窗口限流器
///
/// 职责：
/// - 保证任意 `window` 长度的时间段内准入次数不超过 `limit`
/// - 内部加锁，调用方只能通过 [`RateLimiter::acquire`] 访问
/// - 不保证先来先得，唤醒后重新检查窗口
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

/// 一次成功的准入
///
/// 准入记录随窗口过期自动释放，不需要显式归还。
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub waited: Duration,
}

impl RateLimiter {
    /// 创建新的限流器，`limit` 至少为 1
    pub fn new(limit: usize, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.calls, config.window())
    }

    /// 等待直到可以在不超限的情况下准入
    ///
    /// # 返回
    /// - `Ok(Admission)`：已记入窗口
    /// - `Err(AppError::Cancelled)`：等待期间 `cancel` 被触发
    pub async fn acquire(&self, cancel: &CancellationToken) -> AppResult<Admission> {
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                self.evict_expired(&mut timestamps, now);

                if timestamps.len() < self.limit {
                    timestamps.push_back(now);
                    return Ok(Admission {
                        waited: now.duration_since(started),
                    });
                }

                match timestamps.front() {
                    Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!(
                "限流窗口已满 ({}/{:?})，等待 {:?} 后重试",
                self.limit, self.window, wait
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = sleep(wait) => {}
            }
        }
    }

    /// 当前窗口内的准入数量
    #[cfg(test)]
    pub(crate) async fn in_window(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        self.evict_expired(&mut timestamps, Instant::now());
        timestamps.len()
    }

    fn evict_expired(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_first_calls_admit_without_waiting() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let admission = assert_ok!(limiter.acquire(&cancel).await);
            assert_eq!(admission.waited, Duration::ZERO);
        }
        assert_eq!(limiter.in_window().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_over_limit_waits_for_oldest_to_expire() {
        let window = Duration::from_secs(1);
        let limiter = RateLimiter::new(2, window);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        assert_ok!(limiter.acquire(&cancel).await);
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_ok!(limiter.acquire(&cancel).await);

        let third = assert_ok!(limiter.acquire(&cancel).await);
        assert!(Instant::now().duration_since(start) >= window);
        assert!(third.waited >= window - Duration::from_millis(300));
        assert!(limiter.in_window().await <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_never_exceeds_limit_under_contention() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_millis(500)));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(&cancel).await.map(|_| Instant::now())
            }));
        }

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap().unwrap());
        }
        admitted.sort();

        // 任意连续 4 次准入的跨度都必须不小于窗口
        for pair in admitted.windows(4) {
            assert!(pair[3].duration_since(pair[0]) >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        assert_ok!(limiter.acquire(&cancel).await);

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_err!(limiter.acquire(&cancel).await);
        assert_eq!(limiter.in_window().await, 0);
    }
}
