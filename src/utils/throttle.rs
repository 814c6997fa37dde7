//! Log throttling
//!
//! A camera that drops off the bus fails on every frame; without throttling
//! that floods the log at the capture rate.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Limits how often a message with a given key is logged
///
/// ```rust
/// use std::time::Duration;
/// use g1_gateway::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("capture_read"));
/// assert!(!throttler.should_log("capture_read"));
/// ```
pub struct LogThrottler {
    last_logged: Mutex<HashMap<String, Instant>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_logged: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` and records the time if `key` has not been logged
    /// within the interval.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.last_logged.lock();
        match map.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Forget `key` so the next failure after a recovery is logged at once
    pub fn clear(&self, key: &str) {
        self.last_logged.lock().remove(key);
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_throttling_expires() {
        let throttler = LogThrottler::new(Duration::from_millis(100));
        assert!(throttler.should_log("read"));
        assert!(!throttler.should_log("read"));
        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("read"));
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("read"));
        assert!(throttler.should_log("encode"));
        assert!(!throttler.should_log("read"));
    }

    #[test]
    fn test_clear_rearms_key() {
        let throttler = LogThrottler::default();
        assert!(throttler.should_log("read"));
        throttler.clear("read");
        assert!(throttler.should_log("read"));
    }
}
