//! Sliding-window per-user rate limiting.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult};

/// Configurable knobs for [`RateLimiter`]. Defaults match the design spec's
/// §4.6: 100 req/s, 1000 req/min, 60s sliding window.
#[derive(Clone, Copy, Debug)]
pub struct RateLimiterConfig {
    pub max_per_second: usize,
    pub max_per_minute: usize,
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_second: 100,
            max_per_minute: 1000,
            window: Duration::from_millis(60_000),
        }
    }
}

const CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

struct Bucket {
    timestamps: Vec<Instant>,
    last_cleanup: Instant,
}

/// Per-user sliding-window token accounting, amortizing cleanup of stale
/// timestamps instead of pruning on every call.
pub struct RateLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if `user_id` is allowed to proceed, recording the
    /// attempt as a timestamp when it is.
    pub fn is_allowed(&self, user_id: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets.entry(user_id.to_string()).or_insert_with(|| Bucket {
            timestamps: Vec::new(),
            last_cleanup: now,
        });

        if now.duration_since(bucket.last_cleanup) >= CLEANUP_INTERVAL {
            let window = self.config.window;
            bucket.timestamps.retain(|&t| now.duration_since(t) < window);
            bucket.last_cleanup = now;
        }

        let one_second = Duration::from_millis(1000);
        let recent = bucket
            .timestamps
            .iter()
            .filter(|&&t| now.duration_since(t) < one_second)
            .count();
        if recent >= self.config.max_per_second {
            return false;
        }

        if bucket.timestamps.len() >= self.config.max_per_minute {
            return false;
        }

        bucket.timestamps.push(now);
        true
    }

    /// [`is_allowed`] raising [`CoreError::RateLimit`] on deny.
    pub fn check_and_record(&self, user_id: &str) -> CoreResult<()> {
        if self.is_allowed(user_id) {
            Ok(())
        } else {
            Err(CoreError::RateLimit {
                user_id: user_id.to_string(),
            })
        }
    }

    pub fn clear_user_limits(&self, user_id: &str) {
        self.buckets.lock().expect("rate limiter mutex poisoned").remove(user_id);
    }

    pub fn clear_all_limits(&self) {
        self.buckets.lock().expect("rate limiter mutex poisoned").clear();
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
