//! Usage counters for fixed time windows.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::limit::Limited;

/// Tracks consumption against one [`Limited`] limit for one identity within
/// a fixed time window.
///
/// Quotas are handed out by the store as `Arc<Quota>`; all state sits behind
/// an internal mutex so concurrent consumers stay linearized even when a
/// handle outlives the quota's residence in the store.
#[derive(Debug)]
pub struct Quota {
    state: Mutex<QuotaState>,
}

#[derive(Debug)]
struct QuotaState {
    limit: Limited,
    used: u64,
    expires_at: Instant,
}

impl Quota {
    pub(crate) fn new(limit: &Limited) -> Self {
        Self {
            state: Mutex::new(QuotaState {
                limit: limit.clone(),
                used: 0,
                expires_at: Instant::now() + limit.period,
            }),
        }
    }

    /// Start a new window governed by `limit`: usage drops to zero and the
    /// window closes one period from now.
    pub(crate) fn reset(&self, limit: &Limited) {
        let mut state = self.state.lock();
        state.limit = limit.clone();
        state.used = 0;
        state.expires_at = Instant::now() + limit.period;
    }

    /// Record one request against the quota.
    pub(crate) fn consume(&self) {
        let mut state = self.state.lock();
        state.used = state.used.saturating_add(1);
    }

    /// The limit governing this quota.
    pub fn limit(&self) -> Limited {
        self.state.lock().limit.clone()
    }

    /// Maximum number of requests allowed within the current window.
    pub fn max_requests(&self) -> u64 {
        self.state.lock().limit.max_requests
    }

    /// Number of requests consumed in the current window.
    pub fn used(&self) -> u64 {
        self.state.lock().used
    }

    /// Number of requests left in the current window, saturating at zero.
    pub fn remaining(&self) -> u64 {
        let state = self.state.lock();
        state.limit.max_requests.saturating_sub(state.used)
    }

    /// Whether the current window has closed.
    pub fn expired(&self) -> bool {
        Instant::now() >= self.state.lock().expires_at
    }

    /// When the current window closes.
    pub fn expiration(&self) -> Instant {
        self.state.lock().expires_at
    }

    /// Time until the current window closes, saturating at zero.
    pub fn resets_in(&self) -> Duration {
        self.state
            .lock()
            .expires_at
            .saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::LimitPer;

    fn limited(max_requests: u64, period: Duration) -> Limited {
        Limited {
            resource: "resource".to_string(),
            action: "action".to_string(),
            per: LimitPer::Total,
            max_requests,
            period,
        }
    }

    #[test]
    fn reset_starts_a_new_window() {
        let quota = Quota::new(&limited(10, Duration::from_secs(60)));
        assert_eq!(quota.used(), 0);
        assert_eq!(quota.max_requests(), 10);

        quota.consume();
        quota.consume();
        assert_eq!(quota.used(), 2);

        quota.reset(&limited(50, Duration::from_secs(600)));
        assert_eq!(quota.used(), 0);
        assert_eq!(quota.max_requests(), 50);
    }

    #[test]
    fn consume_increments_used() {
        let quota = Quota::new(&limited(10, Duration::from_secs(60)));
        quota.consume();
        assert_eq!(quota.used(), 1);
        assert_eq!(quota.remaining(), 9);
    }

    #[test]
    fn expired_after_period_elapses() {
        let quota = Quota::new(&limited(10, Duration::from_millis(10)));
        assert!(!quota.expired());
        std::thread::sleep(Duration::from_millis(20));
        assert!(quota.expired());
    }

    #[test]
    fn remaining_saturates() {
        let cases = [
            ("remaining", 20, 10, 10),
            ("none", 20, 20, 0),
            ("overconsumed", 20, 21, 0),
            ("max_used", 20, u64::MAX, 0),
            ("max_max_requests", u64::MAX, u64::MAX - 1, 1),
            ("max_both", u64::MAX, u64::MAX, 0),
        ];

        for (name, max_requests, used, want) in cases {
            let quota = Quota::new(&limited(max_requests, Duration::from_secs(60)));
            quota.state.lock().used = used;
            assert_eq!(quota.remaining(), want, "{name}");
        }
    }

    #[test]
    fn resets_in_saturates_at_zero() {
        let quota = Quota::new(&limited(10, Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(quota.resets_in(), Duration::ZERO);
    }
}
