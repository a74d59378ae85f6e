//! Sliding-window rate limiter.
//!
//! Tracks request timestamps per opaque key (typically a client IP) over the
//! last 60 seconds. Keys are independent; a background task drops windows
//! that have gone quiet so the map can't grow without bound.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Window width in milliseconds.
pub const WINDOW_MS: i64 = 60_000;

/// How often empty windows are dropped.
const COMPACTION_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the window after this one.
    pub remaining: u32,
    /// Unix milliseconds when the window frees up (the earliest in-window
    /// timestamp plus the window width).
    pub reset_at: i64,
}

impl RateDecision {
    /// Seconds until `reset_at`, for a `Retry-After` header. At least 1.
    pub fn retry_after_secs(&self) -> i64 {
        ((self.reset_at - Utc::now().timestamp_millis()) / 1000).max(1)
    }
}

pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<String, Vec<i64>>>>,
    compactor: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Must run inside a tokio runtime (the compaction task is spawned here).
    pub fn new() -> Self {
        let windows: Arc<Mutex<HashMap<String, Vec<i64>>>> = Arc::default();
        let sweep_target = Arc::clone(&windows);
        let compactor = tokio::spawn(async move {
            let mut tick = tokio::time::interval(COMPACTION_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let cutoff = Utc::now().timestamp_millis() - WINDOW_MS;
                let mut windows = sweep_target.lock().unwrap_or_else(|e| e.into_inner());
                windows.retain(|_, stamps| stamps.last().is_some_and(|last| *last > cutoff));
            }
        });
        Self {
            windows,
            compactor: Mutex::new(Some(compactor)),
        }
    }

    /// Admit or reject one request for `key` under `limit` per minute.
    pub fn check(&self, key: &str, limit: u32) -> RateDecision {
        let now = Utc::now().timestamp_millis();
        let cutoff = now - WINDOW_MS;
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let stamps = windows.entry(key.to_string()).or_default();
        stamps.retain(|t| *t > cutoff);

        if stamps.len() >= limit as usize {
            let reset_at = stamps.first().copied().unwrap_or(now) + WINDOW_MS;
            trace!(key, limit, "Rate limit exceeded");
            return RateDecision {
                allowed: false,
                remaining: 0,
                reset_at,
            };
        }

        stamps.push(now);
        let used = stamps.len() as u32;
        let reset_at = stamps.first().copied().unwrap_or(now) + WINDOW_MS;
        RateDecision {
            allowed: true,
            remaining: limit - used,
            reset_at,
        }
    }

    /// Stop the compaction task. Safe to call repeatedly.
    pub fn destroy(&self) {
        if let Some(handle) = self.compactor.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_admits_exactly_limit() {
        let limiter = RateLimiter::new();
        let allowed = (0..10)
            .filter(|_| limiter.check("10.1.2.3", 4).allowed)
            .count();
        assert_eq!(allowed, 4);
    }

    #[tokio::test]
    async fn remaining_counts_down() {
        let limiter = RateLimiter::new();
        assert_eq!(limiter.check("k", 3).remaining, 2);
        assert_eq!(limiter.check("k", 3).remaining, 1);
        assert_eq!(limiter.check("k", 3).remaining, 0);
        assert!(!limiter.check("k", 3).allowed);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("a", 1).allowed);
        assert!(!limiter.check("a", 1).allowed);
        assert!(limiter.check("b", 1).allowed);
    }

    #[tokio::test]
    async fn rejection_reports_window_reset() {
        let limiter = RateLimiter::new();
        let before = Utc::now().timestamp_millis();
        limiter.check("k", 1);
        let denied = limiter.check("k", 1);
        assert!(!denied.allowed);
        assert!(denied.reset_at >= before + WINDOW_MS);
        assert!(denied.retry_after_secs() >= 1);
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let limiter = RateLimiter::new();
        limiter.destroy();
        limiter.destroy();
        // Checks still work; only compaction stopped
        assert!(limiter.check("k", 1).allowed);
    }
}
