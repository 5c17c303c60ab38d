//! Per-key repeat limiting.
//!
//! Used to keep recurring notifications (low battery, expiring sensor) from
//! being raised on every reading cycle.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// A throttle that allows at most one event per `interval` for each key.
///
/// The first event for a key is always allowed. Time is read from the tokio
/// clock, so paused-time tests can advance it.
#[derive(Debug)]
pub struct Throttle<K> {
    interval: Duration,
    last_seen: HashMap<K, Instant>,
}

impl<K: Eq + Hash + Clone> Throttle<K> {
    /// Create a new throttle with the specified minimum interval between events.
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    /// use libre_transmitter::throttle::Throttle;
    ///
    /// let throttle: Throttle<&str> = Throttle::new(Duration::from_secs(3));
    /// ```
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_seen: HashMap::new(),
        }
    }

    /// Returns `true` and restarts the key's timer if enough time has passed
    /// since the last allowed event for `key`.
    pub fn should_emit(&mut self, key: &K) -> bool {
        let now = Instant::now();

        match self.last_seen.get(key) {
            Some(last) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.last_seen.insert(key.clone(), now);
                true
            }
        }
    }

    /// Forget `key` so its next event is allowed immediately.
    pub fn reset(&mut self, key: &K) {
        self.last_seen.remove(key);
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use libre_transmitter::throttle::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    if let Some(num) = src.strip_suffix("ms") {
        let millis: u64 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid milliseconds: {}", num))?;
        return Ok(Duration::from_millis(millis));
    }

    let (num, unit_secs, unit) = if let Some(num) = src.strip_suffix('h') {
        (num, 3600, "hours")
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60, "minutes")
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1, "seconds")
    } else {
        (src, 1, "duration")
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {}: {}", unit, num))?;
    Ok(Duration::from_secs(value * unit_secs))
}
