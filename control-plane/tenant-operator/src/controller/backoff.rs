use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Per-object exponential backoff for failed passes: `base * 2^(n-1)`,
/// capped at `max`. The only state shared between passes.
///
/// A failing object is retried at least every `max`, so an entry untouched
/// for longer than twice that belongs to an object that no longer exists
/// and is dropped on the next failure.
#[derive(Clone, Debug)]
pub struct ErrorBackoff {
    attempts: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
    base: Duration,
    max: Duration,
}

impl ErrorBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            attempts: Arc::new(Mutex::new(HashMap::new())),
            base,
            max,
        }
    }

    /// Count a failure for `key` and return the attempt number with the
    /// delay before the next try.
    pub fn record_failure(&self, key: &str) -> (u32, Duration) {
        let now = Instant::now();
        let stale_after = self.max.saturating_mul(2);
        let mut attempts =
            self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.retain(|_, (_, at)| now.duration_since(*at) <= stale_after);
        let entry = attempts.entry(key.to_string()).or_insert((0, now));
        entry.0 = entry.0.saturating_add(1);
        entry.1 = now;
        let n = entry.0;
        (n, self.delay_for(n))
    }

    pub fn reset(&self, key: &str) {
        let mut attempts =
            self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.remove(key);
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_capped() {
        let b = ErrorBackoff::new(Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(b.record_failure("k"), (1, Duration::from_secs(2)));
        assert_eq!(b.record_failure("k"), (2, Duration::from_secs(4)));
        assert_eq!(b.record_failure("k"), (3, Duration::from_secs(8)));
        assert_eq!(b.record_failure("k"), (4, Duration::from_secs(10)));
        assert_eq!(b.record_failure("other"), (1, Duration::from_secs(2)));
    }

    #[test]
    fn reset_starts_over() {
        let b = ErrorBackoff::new(Duration::from_secs(1), Duration::from_secs(60));
        b.record_failure("k");
        b.record_failure("k");
        b.reset("k");
        assert_eq!(b.record_failure("k"), (1, Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_of_vanished_objects_are_dropped() {
        let b = ErrorBackoff::new(Duration::from_secs(1), Duration::from_secs(10));
        b.record_failure("gone");
        b.record_failure("gone");
        tokio::time::advance(Duration::from_secs(15)).await;
        b.record_failure("alive");
        assert_eq!(b.attempts.lock().unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(b.record_failure("alive"), (2, Duration::from_secs(2)));
        let attempts = b.attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(!attempts.contains_key("gone"));
    }
}
