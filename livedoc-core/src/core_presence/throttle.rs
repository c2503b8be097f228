//! Leading-edge throttle with a trailing value
//!
//! The first value in a quiet period goes out at once. Values offered
//! while the throttle is closed replace each other; the newest one is
//! handed out by [`Throttle::flush`] once the interval has passed, so the
//! last cursor position always reaches peers.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Throttle {
            interval,
            last_emit: None,
            pending: None,
        }
    }

    fn open(&self, now: Instant) -> bool {
        self.last_emit
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Returns the value if it may be sent now, otherwise keeps it pending
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        if self.open(now) {
            self.last_emit = Some(now);
            self.pending = None;
            Some(value)
        } else {
            self.pending = Some(value);
            None
        }
    }

    /// Trailing value, once the interval allows it
    pub fn flush(&mut self, now: Instant) -> Option<T> {
        if self.pending.is_some() && self.open(now) {
            self.last_emit = Some(now);
            self.pending.take()
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending value and reopen the throttle
    pub fn reset(&mut self) {
        self.pending = None;
        self.last_emit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_value_then_trailing_flush() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(50));

        assert_eq!(throttle.offer(1, start), Some(1));
        assert_eq!(throttle.offer(2, start + Duration::from_millis(10)), None);
        assert_eq!(throttle.offer(3, start + Duration::from_millis(20)), None);
        assert_eq!(throttle.flush(start + Duration::from_millis(30)), None);

        assert_eq!(throttle.flush(start + Duration::from_millis(50)), Some(3));
        assert!(!throttle.has_pending());
        assert_eq!(throttle.flush(start + Duration::from_millis(200)), None);
    }

    #[test]
    fn test_reset_drops_pending() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_secs(1));
        throttle.offer("a", start);
        throttle.offer("b", start);
        throttle.reset();
        assert!(!throttle.has_pending());
        assert_eq!(throttle.offer("c", start), Some("c"));
    }
}
