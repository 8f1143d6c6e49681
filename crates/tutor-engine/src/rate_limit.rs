//! Fixed-window rate limiting keyed by caller identifier.
//!
//! Each identifier owns a `{count, window_start}` pair. A check that arrives
//! after the window has elapsed starts a new window; otherwise the counter is
//! incremented and compared against the limit. Attempts over the limit still
//! count, so a caller that keeps retrying inside the window keeps failing.
//!
//! Window edges allow short bursts of up to twice the limit. This is accepted.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Result, TutorError};

/// Number of tracked identifiers above which expired windows are pruned.
pub const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: Instant,
}

/// Process-wide fixed-window counter shared by all request handlers.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Creates a limiter with the given window duration.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the window duration.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Counts one attempt for `identifier` and fails once `limit` is exceeded.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::RateLimitExceeded` when this attempt is number
    /// `limit + 1` or later in the current window.
    pub fn check(&self, limit: u32, identifier: &str) -> Result<()> {
        self.check_at(limit, identifier, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::RateLimitExceeded` when the limit is exceeded.
    pub fn check_at(&self, limit: u32, identifier: &str, now: Instant) -> Result<()> {
        if limit == 0 {
            return Err(TutorError::validation("rate limit must be greater than zero"));
        }

        // Increment-and-compare happens under one lock so concurrent checks
        // for the same identifier never observe a stale count.
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() > PRUNE_THRESHOLD {
            self.prune(&mut windows, now);
        }

        let entry = windows.entry(identifier.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.saturating_duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count > limit {
            let elapsed = now.saturating_duration_since(entry.started);
            let retry_after_secs = self.window.saturating_sub(elapsed).as_secs().max(1);
            tracing::warn!(
                identifier,
                limit,
                count = entry.count,
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(TutorError::RateLimitExceeded { retry_after_secs });
        }

        tracing::debug!(identifier, limit, count = entry.count, "Rate limit check passed");
        Ok(())
    }

    /// Current count for `identifier` in its window, if tracked.
    #[must_use]
    pub fn count(&self, identifier: &str) -> Option<u32> {
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows.get(identifier).map(|w| w.count)
    }

    /// Number of tracked identifiers.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn prune(&self, windows: &mut HashMap<String, Window>, now: Instant) {
        let before = windows.len();
        windows.retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        tracing::debug!(
            removed = before - windows.len(),
            remaining = windows.len(),
            "Pruned expired rate-limit windows"
        );
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_limit_calls_succeed_then_fail() {
        let limiter = RateLimiter::default();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.check_at(10, "turn:10.0.0.1", now).unwrap();
        }

        let err = limiter.check_at(10, "turn:10.0.0.1", now).unwrap_err();
        assert!(matches!(err, TutorError::RateLimitExceeded { .. }));
    }

    #[test]
    fn test_rejected_attempts_keep_counting() {
        let limiter = RateLimiter::default();
        let now = Instant::now();

        for _ in 0..5 {
            let _ = limiter.check_at(2, "id", now);
        }

        assert_eq!(limiter.count("id"), Some(5));
        assert!(limiter.check_at(2, "id", now).is_err());
    }

    #[test]
    fn test_window_boundary_resets_counter() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.check_at(3, "id", start).unwrap();
        }
        assert!(limiter.check_at(3, "id", start).is_err());

        let later = start + Duration::from_secs(60);
        limiter.check_at(3, "id", later).unwrap();
        assert_eq!(limiter.count("id"), Some(1));
    }

    #[test]
    fn test_identifiers_are_independent() {
        let limiter = RateLimiter::default();
        let now = Instant::now();

        limiter.check_at(1, "a", now).unwrap();
        assert!(limiter.check_at(1, "a", now).is_err());
        limiter.check_at(1, "b", now).unwrap();
    }

    #[test]
    fn test_retry_after_reflects_remaining_window() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();

        limiter.check_at(1, "id", start).unwrap();
        let err = limiter
            .check_at(1, "id", start + Duration::from_secs(45))
            .unwrap_err();

        match err {
            TutorError::RateLimitExceeded { retry_after_secs } => assert_eq!(retry_after_secs, 15),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_limit_rejected() {
        let limiter = RateLimiter::default();
        assert!(matches!(
            limiter.check(0, "id"),
            Err(TutorError::Validation { .. })
        ));
    }

    #[test]
    fn test_prunes_expired_windows_past_threshold() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        let start = Instant::now();

        for i in 0..=PRUNE_THRESHOLD {
            limiter.check_at(5, &format!("id-{i}"), start).unwrap();
        }
        assert_eq!(limiter.tracked(), PRUNE_THRESHOLD + 1);

        limiter
            .check_at(5, "fresh", start + Duration::from_secs(2))
            .unwrap();
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_concurrent_checks_are_counted_exactly() {
        let limiter = Arc::new(RateLimiter::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..25)
                        .filter(|_| limiter.check(100, "shared").is_ok())
                        .count()
                })
            })
            .collect();

        let passed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(passed, 100);
        assert_eq!(limiter.count("shared"), Some(200));
    }
}
