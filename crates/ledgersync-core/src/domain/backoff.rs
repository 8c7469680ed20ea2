//! Sync backoff policy
//!
//! Remote backends rate-limit, so after consecutive failures a device keeps
//! quiet for an exponentially growing period. The policy is a set of pure
//! functions over a small persistable state, which lets it survive process
//! restarts without a scheduler.

use serde::{Deserialize, Serialize};

/// Default first delay after a failure
pub const DEFAULT_INITIAL_DELAY_MS: i64 = 5_000;

/// Default upper bound of the delay (one hour)
pub const DEFAULT_MAX_DELAY_MS: i64 = 3_600_000;

/// Persisted failure bookkeeping of one backend configuration
///
/// Both fields are zero when the last remote call succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackoffState {
    /// Time of the most recent failure (epoch millis), 0 if none
    pub last_failure_ms: i64,
    /// Quiet period after `last_failure_ms`
    pub current_delay_ms: i64,
}

impl BackoffState {
    /// True if no failure is being tracked
    pub fn is_clear(&self) -> bool {
        self.last_failure_ms == 0 && self.current_delay_ms == 0
    }
}

/// Delay bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial_delay_ms: i64, max_delay_ms: i64) -> Self {
        Self {
            initial_delay_ms,
            max_delay_ms,
        }
    }

    /// True if a remote attempt is allowed at `now`
    pub fn should_attempt(&self, state: &BackoffState, now: i64) -> bool {
        state.last_failure_ms == 0 || now - state.last_failure_ms > state.current_delay_ms
    }

    /// Milliseconds until [`should_attempt`](Self::should_attempt) turns true, 0 if it already is
    pub fn remaining_ms(&self, state: &BackoffState, now: i64) -> i64 {
        if self.should_attempt(state, now) {
            0
        } else {
            state.last_failure_ms + state.current_delay_ms - now + 1
        }
    }

    /// Records a failure at `now`: the delay doubles, bounded by the policy
    #[must_use]
    pub fn on_failure(&self, state: &BackoffState, now: i64) -> BackoffState {
        let doubled = state.current_delay_ms.saturating_mul(2);
        BackoffState {
            last_failure_ms: now,
            current_delay_ms: doubled.max(self.initial_delay_ms).min(self.max_delay_ms),
        }
    }

    /// Records a success: everything is cleared
    #[must_use]
    pub fn on_success(&self, _state: &BackoffState) -> BackoffState {
        BackoffState::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_state_always_attempts() {
        let policy = BackoffPolicy::default();
        assert!(policy.should_attempt(&BackoffState::default(), 0));
        assert!(policy.should_attempt(&BackoffState::default(), 1_000_000));
    }

    #[test]
    fn test_delay_doubles_per_consecutive_failure() {
        let policy = BackoffPolicy::default();
        let mut state = BackoffState::default();
        let mut now = 1_000_000;

        for failures in 1..=4 {
            state = policy.on_failure(&state, now);
            let expected = DEFAULT_INITIAL_DELAY_MS * 2_i64.pow(failures - 1);
            assert_eq!(state.current_delay_ms, expected);

            assert!(!policy.should_attempt(&state, now + expected));
            assert!(policy.should_attempt(&state, now + expected + 1));
            now += expected + 1;
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::new(1_000, 3_000);
        let mut state = BackoffState::default();
        for i in 0..10 {
            state = policy.on_failure(&state, 10 + i);
        }
        assert_eq!(state.current_delay_ms, 3_000);
        assert_eq!(state.last_failure_ms, 19);
    }

    #[test]
    fn test_success_resets() {
        let policy = BackoffPolicy::default();
        let state = policy.on_failure(&BackoffState::default(), 42);
        let state = policy.on_failure(&state, 43);
        let state = policy.on_success(&state);
        assert!(state.is_clear());
        assert_eq!(
            policy.on_failure(&state, 100).current_delay_ms,
            DEFAULT_INITIAL_DELAY_MS
        );
    }

    #[test]
    fn test_remaining_ms() {
        let policy = BackoffPolicy::default();
        let state = policy.on_failure(&BackoffState::default(), 10_000);
        assert_eq!(policy.remaining_ms(&state, 10_000), 5_001);
        assert_eq!(policy.remaining_ms(&state, 15_001), 0);
    }
}
