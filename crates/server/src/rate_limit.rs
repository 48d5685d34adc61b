use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::profile::epoch_ms_now;

pub const ASK_RATE_LIMIT: u32 = 10;
pub const ASK_RATE_WINDOW: Duration = Duration::from_secs(60);
const MAX_KEYS: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Hit {
    count: u32,
    reset_at_ms: u64,
}

/// What one call to the limiter decided, with everything the HTTP layer
/// needs for the response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds since epoch when the window resets (ceiling).
    pub reset_at_secs: u64,
    /// Whole seconds until reset, at least 1; only meaningful when denied.
    pub retry_after_secs: u64,
}

/// Fixed-window counter keyed by caller identity. The table is hard-capped
/// at `max_keys`: expired windows go first, then the oldest live windows.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, Hit>>>,
    window_ms: u64,
    max: u32,
    max_keys: usize,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32, max_keys: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            window_ms: window.as_millis() as u64,
            max,
            max_keys: max_keys.max(1),
        }
    }

    pub fn hit(&self, key: &str) -> RateDecision {
        self.hit_at(key, epoch_ms_now())
    }

    fn hit_at(&self, key: &str, now_ms: u64) -> RateDecision {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entry = inner.entry(key.to_string()).or_insert(Hit {
            count: 0,
            reset_at_ms: 0,
        });
        if entry.reset_at_ms <= now_ms {
            entry.count = 1;
            entry.reset_at_ms = now_ms + self.window_ms;
        } else {
            entry.count += 1;
        }
        let hit = *entry;

        if inner.len() > self.max_keys {
            inner.retain(|_, h| h.reset_at_ms > now_ms);
        }
        if inner.len() > self.max_keys {
            let mut overflow = inner.len() - self.max_keys;
            let mut by_reset = inner
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, h)| (h.reset_at_ms, k.clone()))
                .collect::<Vec<_>>();
            by_reset.sort();
            for (_, stale) in by_reset {
                if overflow == 0 {
                    break;
                }
                if inner.remove(&stale).is_some() {
                    overflow -= 1;
                }
            }
        }

        let remaining_ms = hit.reset_at_ms.saturating_sub(now_ms);
        RateDecision {
            allowed: hit.count <= self.max,
            limit: self.max,
            remaining: self.max.saturating_sub(hit.count),
            reset_at_secs: hit.reset_at_ms.div_ceil(1000),
            retry_after_secs: remaining_ms.div_ceil(1000).max(1),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(ASK_RATE_WINDOW, ASK_RATE_LIMIT, MAX_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_th_request_passes_and_next_fails() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 10, 16);
        for i in 1..=10 {
            let decision = limiter.hit_at("ask:1.2.3.4", 1_000);
            assert!(decision.allowed, "request {} should pass", i);
            assert_eq!(decision.remaining, 10 - i);
        }
        let decision = limiter.hit_at("ask:1.2.3.4", 1_000);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after_secs >= 1);
    }

    #[test]
    fn window_expiry_resets_the_counter() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2, 16);
        assert!(limiter.hit_at("k", 0).allowed);
        assert!(limiter.hit_at("k", 1).allowed);
        assert!(!limiter.hit_at("k", 2).allowed);
        // reset_at = 0 + 60_000; one past it starts a fresh window
        let decision = limiter.hit_at("k", 60_000);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1, 16);
        assert!(limiter.hit_at("ask:a", 0).allowed);
        assert!(limiter.hit_at("ask:b", 0).allowed);
        assert!(!limiter.hit_at("ask:a", 1).allowed);
    }

    #[test]
    fn reset_header_value_is_ceiled_epoch_seconds() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 10, 16);
        let decision = limiter.hit_at("k", 1_500);
        assert_eq!(decision.reset_at_secs, 62); // 61_500 ms -> ceil 62 s
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let limiter = RateLimiter::new(Duration::from_millis(100), 0, 16);
        let decision = limiter.hit_at("k", 0);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_secs, 1);
    }

    #[test]
    fn live_keys_are_evicted_down_to_the_cap() {
        // Every key is inside the same 60s window, so nothing is expired;
        // the cap must still hold.
        let limiter = RateLimiter::new(Duration::from_secs(60), 10, 4);
        for i in 0..10 {
            limiter.hit_at(&format!("ask:10.0.0.{}", i), 1_000 + i);
        }
        let inner = limiter.inner.lock().unwrap();
        assert!(inner.len() <= 4, "table grew to {}", inner.len());
    }

    #[test]
    fn eviction_prefers_expired_then_oldest_windows() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 10, 2);
        limiter.hit_at("old", 0); // resets at 60_000
        limiter.hit_at("mid", 70_000); // resets at 130_000
        // "old" has expired by now; it goes before any live window does.
        limiter.hit_at("new", 80_000);
        let inner = limiter.inner.lock().unwrap();
        assert!(!inner.contains_key("old"));
        assert!(inner.contains_key("mid"));
        assert!(inner.contains_key("new"));
    }

    #[test]
    fn current_key_survives_forced_eviction() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 10, 1);
        limiter.hit_at("a", 1_000);
        limiter.hit_at("b", 1_001);
        let inner = limiter.inner.lock().unwrap();
        assert!(inner.contains_key("b"));
    }
}
