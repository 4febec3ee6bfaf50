use std::time::Duration;

/// Trait for defining reconnection strategies
///
/// Implement this trait to control how the client should
/// behave when reconnecting after a disconnection.
pub trait ReconnectionStrategy: Send + Sync {
    /// Get the delay before the next reconnection attempt
    ///
    /// # Arguments
    /// * `attempt` - The reconnection attempt number (0-indexed)
    ///
    /// # Returns
    /// * `Some(duration)` - Wait this long before reconnecting
    /// * `None` - Stop reconnecting
    fn next_delay(&self, attempt: usize) -> Option<Duration>;

    /// Check if we should continue reconnecting
    fn should_reconnect(&self, attempt: usize) -> bool;
}

/// Exponential backoff reconnection strategy
///
/// Delays between reconnection attempts grow exponentially:
/// initial_delay * 2^attempt, capped at max_delay
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<usize>,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff strategy
    ///
    /// # Arguments
    /// * `initial_delay` - The initial delay before first reconnect
    /// * `max_delay` - The maximum delay between reconnects
    /// * `max_attempts` - Maximum number of attempts (None = unlimited)
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: Option<usize>) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
        }
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if !self.should_reconnect(attempt) {
            return None;
        }

        let exp = attempt.min(31) as u32;
        let delay = (self.initial_delay.as_millis() as u64).saturating_mul(2u64.saturating_pow(exp));
        let delay = Duration::from_millis(delay.min(self.max_delay.as_millis() as u64));
        Some(delay)
    }

    fn should_reconnect(&self, attempt: usize) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Fixed delay reconnection strategy
///
/// Always waits the same amount of time between reconnection attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<usize>,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: Option<usize>) -> Self {
        Self { delay, max_attempts }
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if !self.should_reconnect(attempt) {
            return None;
        }
        Some(self.delay)
    }

    fn should_reconnect(&self, attempt: usize) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Never reconnect strategy
///
/// The client will not attempt to reconnect after disconnection
#[derive(Debug, Clone)]
pub struct NeverReconnect;

impl ReconnectionStrategy for NeverReconnect {
    fn next_delay(&self, _attempt: usize) -> Option<Duration> {
        None
    }

    fn should_reconnect(&self, _attempt: usize) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        let strategy = ExponentialBackoff::new(
            Duration::from_secs(2),
            Duration::from_secs(60),
            Some(10),
        );

        assert_eq!(strategy.next_delay(0), Some(Duration::from_secs(2)));
        assert_eq!(strategy.next_delay(1), Some(Duration::from_secs(4)));
        assert_eq!(strategy.next_delay(2), Some(Duration::from_secs(8)));
        assert_eq!(strategy.next_delay(3), Some(Duration::from_secs(16)));
    }

    #[test]
    fn test_exponential_backoff_caps_at_max() {
        let strategy = ExponentialBackoff::new(
            Duration::from_secs(2),
            Duration::from_secs(60),
            None,
        );

        assert_eq!(strategy.next_delay(5), Some(Duration::from_secs(60)));
        assert_eq!(strategy.next_delay(20), Some(Duration::from_secs(60)));
        // Huge attempt numbers must not overflow
        assert_eq!(strategy.next_delay(500), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_exponential_backoff_stops_after_max_attempts() {
        let strategy = ExponentialBackoff::new(
            Duration::from_secs(2),
            Duration::from_secs(60),
            Some(3),
        );

        assert!(strategy.next_delay(2).is_some());
        assert_eq!(strategy.next_delay(3), None);
        assert!(!strategy.should_reconnect(3));
    }

    #[test]
    fn test_fixed_delay() {
        let strategy = FixedDelay::new(Duration::from_secs(5), Some(2));
        assert_eq!(strategy.next_delay(0), Some(Duration::from_secs(5)));
        assert_eq!(strategy.next_delay(1), Some(Duration::from_secs(5)));
        assert_eq!(strategy.next_delay(2), None);
    }

    #[test]
    fn test_never_reconnect() {
        let strategy = NeverReconnect;
        assert_eq!(strategy.next_delay(0), None);
        assert!(!strategy.should_reconnect(0));
    }
}
