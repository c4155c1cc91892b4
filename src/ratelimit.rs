//! Per-client sliding-window rate limiter.
//!
//! Checked before intent classification so over-quota requests never reach
//! retrieval. Counters must be safe for concurrent increment/read across
//! simultaneous requests; a single async mutex over the per-key windows is
//! enough at this service's request rates.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::RateLimitConfig;

pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: Duration::from_secs(config.window_secs),
            max_requests: config.max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key` (client IP) and report whether it is
    /// within quota. Timestamps older than the window are pruned on touch.
    pub async fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let hits = windows.entry(key.to_string()).or_default();

        while let Some(front) = hits.front() {
            if now.duration_since(*front) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.max_requests {
            return false;
        }
        hits.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(window_secs: u64, max_requests: usize) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            window_secs,
            max_requests,
        })
    }

    #[tokio::test]
    async fn test_allows_up_to_quota_then_rejects() {
        let rl = limiter(60, 3);
        assert!(rl.allow("1.2.3.4").await);
        assert!(rl.allow("1.2.3.4").await);
        assert!(rl.allow("1.2.3.4").await);
        assert!(!rl.allow("1.2.3.4").await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let rl = limiter(60, 1);
        assert!(rl.allow("1.2.3.4").await);
        assert!(!rl.allow("1.2.3.4").await);
        assert!(rl.allow("5.6.7.8").await);
    }

    #[tokio::test]
    async fn test_window_expiry_frees_quota() {
        let rl = limiter(1, 1);
        assert!(rl.allow("1.2.3.4").await);
        assert!(!rl.allow("1.2.3.4").await);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(rl.allow("1.2.3.4").await);
    }

    #[tokio::test]
    async fn test_concurrent_increments_respect_quota() {
        use std::sync::Arc;
        let rl = Arc::new(limiter(60, 10));
        let mut handles = Vec::new();
        for _ in 0..25 {
            let rl = rl.clone();
            handles.push(tokio::spawn(async move { rl.allow("1.2.3.4").await }));
        }
        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }
}
