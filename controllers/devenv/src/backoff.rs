//! # Fibonacci Backoff
//!
//! Retry delays for failed reconciliations. Delays grow along the Fibonacci
//! sequence (min, min, 2*min, 3*min, 5*min, ...) and are capped at a maximum,
//! which backs off more gently than doubling.
//!
//! `BackoffTracker` keeps one sequence per DevEnv (`namespace/name`) so a
//! failing environment does not slow down retries of the others.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator, in seconds.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// A sequence starting at `min_secs` and capped at `max_secs`.
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            prev_secs: 0,
            current_secs: min_secs.min(max_secs),
            max_secs,
        }
    }

    /// Returns the current delay and advances the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        Duration::from_secs(result)
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Per-object backoff sequences.
#[derive(Debug)]
pub struct BackoffTracker {
    min_secs: u64,
    max_secs: u64,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffTracker {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            max_secs,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failure of `key` and returns how long to wait before retrying.
    pub fn next(&self, key: &str) -> (Duration, u32) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(|| BackoffState {
            backoff: FibonacciBackoff::new(self.min_secs, self.max_secs),
            error_count: 0,
        });
        state.error_count += 1;
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forgets the failures of `key` after a successful reconcile; the next
    /// failure starts a fresh sequence.
    pub fn reset(&self, key: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(backoff: &mut FibonacciBackoff) -> u64 {
        backoff.next_backoff().as_secs()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(5, 300);
        let sequence: Vec<u64> = (0..10).map(|_| secs(&mut backoff)).collect();
        assert_eq!(sequence, vec![5, 5, 10, 15, 25, 40, 65, 105, 170, 275]);
        assert_eq!(secs(&mut backoff), 300);
        assert_eq!(secs(&mut backoff), 300);
    }

    #[test]
    fn test_min_above_max_is_capped() {
        let mut backoff = FibonacciBackoff::new(600, 60);
        assert_eq!(secs(&mut backoff), 60);
        assert_eq!(secs(&mut backoff), 60);
    }

    #[test]
    fn test_tracker_is_per_object() {
        let tracker = BackoffTracker::new(1, 10);
        assert_eq!(tracker.next("dev/a"), (Duration::from_secs(1), 1));
        assert_eq!(tracker.next("dev/a"), (Duration::from_secs(1), 2));
        assert_eq!(tracker.next("dev/a"), (Duration::from_secs(2), 3));
        assert_eq!(tracker.next("dev/b"), (Duration::from_secs(1), 1));

        tracker.reset("dev/a");
        assert_eq!(tracker.next("dev/a"), (Duration::from_secs(1), 1));
        assert_eq!(tracker.next("dev/a"), (Duration::from_secs(1), 2));
        assert_eq!(tracker.next("dev/a"), (Duration::from_secs(2), 3));
        // Unaffected by the reset of another object
        assert_eq!(tracker.next("dev/b"), (Duration::from_secs(1), 2));
    }
}
