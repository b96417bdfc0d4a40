use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Exponential backoff schedule for one logical operation. `next_delay`
/// yields the wait before the next attempt, or `None` once the attempt or
/// total-wait budget is spent.
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    waited: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt: 0,
            waited: Duration::ZERO,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        // max_attempts counts tries, so there are max_attempts - 1 waits.
        if self.attempt + 1 >= self.config.max_attempts {
            return None;
        }

        let cap = Duration::from_millis(self.config.cap_total_ms);
        let remaining = cap.checked_sub(self.waited)?;
        if remaining.is_zero() {
            return None;
        }

        let base = self.config.base_ms as f64 * self.config.factor.powi(self.attempt as i32);
        let jitter = if self.config.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.config.jitter..=1.0 + self.config.jitter)
        } else {
            1.0
        };
        let delay = Duration::from_millis((base * jitter) as u64).min(remaining);

        self.attempt += 1;
        self.waited += delay;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_jitter() -> BackoffConfig {
        BackoffConfig {
            base_ms: 500,
            factor: 2.0,
            jitter: 0.0,
            max_attempts: 3,
            cap_total_ms: 10_000,
        }
    }

    #[test]
    fn doubles_until_attempts_are_spent() {
        let mut backoff = Backoff::new(config_without_jitter());
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn total_wait_is_capped() {
        let mut backoff = Backoff::new(BackoffConfig {
            base_ms: 4000,
            factor: 2.0,
            jitter: 0.0,
            max_attempts: 5,
            cap_total_ms: 10_000,
        });
        let mut total = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            total += delay;
        }
        assert!(total <= Duration::from_millis(10_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut config = config_without_jitter();
        config.jitter = 0.2;
        for _ in 0..50 {
            let mut backoff = Backoff::new(config.clone());
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(400), "{delay:?}");
            assert!(delay <= Duration::from_millis(600), "{delay:?}");
        }
    }
}
