use std::time::Instant;

use dashmap::DashMap;

/// Route categories with independent per-IP budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateCategory {
    Login,
    Chat,
    Upload,
    Settings,
    Keys,
}

impl RateCategory {
    fn as_str(&self) -> &'static str {
        match self {
            RateCategory::Login => "login",
            RateCategory::Chat => "chat",
            RateCategory::Upload => "upload",
            RateCategory::Settings => "settings",
            RateCategory::Keys => "keys",
        }
    }
}

const WINDOW_SECS: u64 = 60;

/// Process-wide fixed-window per-IP limiter.
///
/// Counters live in a DashMap keyed by (category, ip); each entry tracks the
/// start of its current window. Good enough for a single-node deployment —
/// a shared store would be needed to limit across replicas.
pub struct RateLimiter {
    enabled: bool,
    counters: DashMap<(&'static str, String), (Instant, u32)>,
}

impl RateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            counters: DashMap::new(),
        }
    }

    /// Count one request. `Err(retry_after_secs)` when the window is full.
    pub fn check(&self, category: RateCategory, ip: &str, limit: u32) -> Result<(), u64> {
        if !self.enabled || limit == 0 {
            return Ok(());
        }

        let key = (category.as_str(), ip.to_string());
        let now = Instant::now();
        let mut entry = self.counters.entry(key).or_insert((now, 0));
        let (window_start, count) = *entry;

        let elapsed = now.duration_since(window_start).as_secs();
        if elapsed >= WINDOW_SECS {
            *entry = (now, 1);
            return Ok(());
        }

        if count >= limit {
            return Err(WINDOW_SECS - elapsed);
        }
        *entry = (window_start, count + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_per_ip_and_category() {
        let limiter = RateLimiter::new(true);
        for _ in 0..5 {
            assert!(limiter.check(RateCategory::Login, "1.2.3.4", 5).is_ok());
        }
        let retry = limiter.check(RateCategory::Login, "1.2.3.4", 5).unwrap_err();
        assert!(retry <= 60);

        // Another IP and another category are unaffected.
        assert!(limiter.check(RateCategory::Login, "5.6.7.8", 5).is_ok());
        assert!(limiter.check(RateCategory::Chat, "1.2.3.4", 30).is_ok());
    }

    #[test]
    fn disabled_limiter_always_passes() {
        let limiter = RateLimiter::new(false);
        for _ in 0..100 {
            assert!(limiter.check(RateCategory::Login, "1.2.3.4", 1).is_ok());
        }
    }
}
