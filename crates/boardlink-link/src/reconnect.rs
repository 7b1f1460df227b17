//! Reconnect backoff

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Bounded exponential backoff
///
/// Delays double from the base up to the cap. After `max_attempts` delays
/// the policy is exhausted.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    max_attempts: u32,
    current_attempt: u32,
}

impl ReconnectPolicy {
    /// Create a policy from configuration
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base_backoff_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms.max(config.base_backoff_ms),
            max_attempts: config.max_attempts,
            current_attempt: 0,
        }
    }

    /// Delay before the next attempt, `None` once exhausted
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let exp = 2u64.saturating_pow(self.current_attempt);
        self.current_attempt += 1;
        let backoff_ms = self.base_backoff_ms.saturating_mul(exp).min(self.max_backoff_ms);
        Some(Duration::from_millis(backoff_ms))
    }

    /// Attempts made so far
    pub fn attempt_number(&self) -> u32 {
        self.current_attempt
    }

    /// Whether no attempts are left
    pub fn is_exhausted(&self) -> bool {
        self.current_attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, max: u64, attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(&ReconnectConfig {
            base_backoff_ms: base,
            max_backoff_ms: max,
            max_attempts: attempts,
        })
    }

    #[test]
    fn test_exponential_backoff() {
        let mut p = policy(250, 4000, 6);
        let delays: Vec<_> = std::iter::from_fn(|| p.next_backoff())
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![250, 500, 1000, 2000, 4000, 4000]);
        assert!(p.is_exhausted());
    }

    #[test]
    fn test_zero_attempts_disables() {
        let mut p = policy(100, 1000, 0);
        assert!(p.is_exhausted());
        assert_eq!(p.next_backoff(), None);
    }

    #[test]
    fn test_large_attempt_counts_saturate() {
        let mut p = policy(1000, 60_000, 100);
        for _ in 0..99 {
            assert!(p.next_backoff().unwrap() <= Duration::from_millis(60_000));
        }
    }
}
