//! Per-adapter circuit breaker. State transitions live behind a short
//! critical section; callers never hold the lock across I/O.

use std::{fmt, sync::Mutex, time::Duration};

use log::warn;
use tokio::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Consecutive failures within the current window.
    failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    /// Set on rate-limit failures; short-circuits all calls until it passes,
    /// independent of the state machine.
    blocked_until: Option<Instant>,
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerOpen {
    pub retry_in: Duration,
}

impl fmt::Display for BreakerOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circuit open, retry in {:?}", self.retry_in)
    }
}

impl std::error::Error for BreakerOpen {}

pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                window_start: None,
                opened_at: None,
                blocked_until: None,
            }),
        }
    }

    /// Checks whether a call may go out. Performs the open → half-open
    /// transition once the cooldown has elapsed.
    pub fn try_acquire(&self) -> Result<(), BreakerOpen> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        if let Some(blocked_until) = inner.blocked_until {
            if now < blocked_until {
                return Err(BreakerOpen {
                    retry_in: blocked_until - now,
                });
            }
            inner.blocked_until = None;
        }

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let cooldown = Duration::from_secs(self.config.cooldown_s);
                let opened_at = inner.opened_at.unwrap_or(now);
                if now >= opened_at + cooldown {
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(BreakerOpen {
                        retry_in: opened_at + cooldown - now,
                    })
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.window_start = None;
    }

    pub fn on_failure(&self, retry_after_s: Option<u64>) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("breaker lock poisoned");

        if let Some(retry_after_s) = retry_after_s {
            inner.blocked_until = Some(now + Duration::from_secs(retry_after_s));
        }

        match inner.state {
            CircuitState::HalfOpen => self.trip(&mut inner, now),
            CircuitState::Open => {}
            CircuitState::Closed => {
                let window = Duration::from_secs(self.config.window_s);
                match inner.window_start {
                    Some(start) if now - start <= window => inner.failures += 1,
                    _ => {
                        inner.window_start = Some(now);
                        inner.failures = 1;
                    }
                }
                if inner.failures >= self.config.failures {
                    self.trip(&mut inner, now);
                }
            }
        }
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        warn!("circuit breaker for '{}' opened", self.name);
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.failures = 0;
        inner.window_start = None;
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failures: 3,
                window_s: 60,
                cooldown_s: 30,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_consecutive_failures_within_window() {
        let breaker = breaker();
        for _ in 0..2 {
            assert!(breaker.try_acquire().is_ok());
            breaker.on_failure(None);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.on_failure(None);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_outside_the_window_do_not_accumulate() {
        let breaker = breaker();
        breaker.on_failure(None);
        breaker.on_failure(None);
        tokio::time::advance(Duration::from_secs(61)).await;
        breaker.on_failure(None);
        breaker.on_failure(None);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_after_cooldown_then_closes_on_success() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.on_failure(None);
        }
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.on_failure(None);
        }
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.try_acquire().is_ok());
        breaker.on_failure(None);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_blocks_even_while_closed() {
        let breaker = breaker();
        breaker.on_failure(Some(30));
        assert_eq!(breaker.state(), CircuitState::Closed);
        let error = breaker.try_acquire().unwrap_err();
        assert!(error.retry_in <= Duration::from_secs(30));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(breaker.try_acquire().is_ok());
    }
}
