//! Per-provider admission control
//!
//! Gates work under three constraints checked atomically: requests per
//! minute and tokens per minute over 60-second sliding windows, plus an
//! in-flight concurrency cap. Queued callers sleep until the oldest
//! window entry expires; cancellation while queued releases without
//! recording any usage.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::provider::ProviderLimits;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    max_requests: u32,
    max_tokens: u64,
    state: Mutex<Windows>,
    concurrency: Semaphore,
}

struct Windows {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
    token_sum: u64,
}

impl Windows {
    fn evict(&mut self, now: Instant) {
        while let Some(&front) = self.requests.front() {
            if now.duration_since(front) >= WINDOW {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        while let Some(&(front, tokens)) = self.tokens.front() {
            if now.duration_since(front) >= WINDOW {
                self.tokens.pop_front();
                self.token_sum -= tokens;
            } else {
                break;
            }
        }
    }

    /// Time until the next eviction frees capacity. Falls back to a
    /// short poll when both windows are somehow empty.
    fn retry_after(&self, now: Instant) -> Duration {
        let oldest = self
            .requests
            .front()
            .copied()
            .into_iter()
            .chain(self.tokens.front().map(|&(t, _)| t))
            .min();
        match oldest {
            Some(t) => WINDOW.saturating_sub(now.duration_since(t)) + Duration::from_millis(1),
            None => Duration::from_millis(50),
        }
    }
}

impl RateLimiter {
    pub fn new(limits: &ProviderLimits, concurrency: usize) -> Self {
        Self {
            max_requests: limits.max_requests_per_minute.max(1),
            max_tokens: limits.max_tokens_per_minute.max(1) as u64,
            state: Mutex::new(Windows {
                requests: VecDeque::new(),
                tokens: VecDeque::new(),
                token_sum: 0,
            }),
            concurrency: Semaphore::new(concurrency.max(1)),
        }
    }

    /// Run `work` once admission is granted. Returns `None` if the
    /// caller was cancelled while waiting; usage is recorded only at
    /// admission, so a cancelled wait leaves the windows untouched.
    pub async fn execute<T, Fut, F>(
        &self,
        estimated_tokens: usize,
        cancel: &CancellationToken,
        work: F,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _permit = tokio::select! {
            permit = self.concurrency.acquire() => {
                // The semaphore is never closed while the limiter lives
                permit.ok()?
            }
            _ = cancel.cancelled() => return None,
        };

        loop {
            let wait = {
                let mut windows = self.state.lock().unwrap_or_else(|p| p.into_inner());
                let now = Instant::now();
                windows.evict(now);

                let tokens = estimated_tokens as u64;
                let requests_ok = (windows.requests.len() as u32) < self.max_requests;
                // An oversized single request is admitted into an empty
                // window rather than waiting forever
                let tokens_ok =
                    windows.token_sum + tokens <= self.max_tokens || windows.token_sum == 0;

                if requests_ok && tokens_ok {
                    windows.requests.push_back(now);
                    windows.tokens.push_back((now, tokens));
                    windows.token_sum += tokens;
                    None
                } else {
                    Some(windows.retry_after(now))
                }
            };

            match wait {
                None => break,
                Some(delay) => {
                    tracing::trace!(delay_ms = delay.as_millis() as u64, "Rate limit backoff");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return None,
                    }
                }
            }
        }

        Some(work().await)
    }

    /// Requests currently counted in the sliding window (test hook and
    /// progress reporting).
    pub fn requests_in_window(&self) -> usize {
        let mut windows = self.state.lock().unwrap_or_else(|p| p.into_inner());
        windows.evict(Instant::now());
        windows.requests.len()
    }
}
