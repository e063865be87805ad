use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Runtime circuit state for subscriber connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker thresholds and timers.
///
/// The breaker opens when the failure rate over the sliding window of the
/// most recent `window_size` recorded calls reaches `failure_rate_threshold`,
/// once at least `min_calls` outcomes have been recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    pub window_size: usize,
    pub failure_rate_threshold: f64,
    pub min_calls: usize,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            min_calls: 4,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    // true = failure, most recent at the back
    outcomes: VecDeque<bool>,
    opened_at: Option<Instant>,
}

impl CircuitInner {
    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|failed| **failed).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            outcomes: VecDeque::new(),
            opened_at: None,
        }
    }
}

/// Thread-safe circuit breaker guarding subscriber reconnect attempts.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    /// Whether a call may proceed. While open, returns false until the
    /// open timeout elapses, then transitions to half-open and allows a
    /// single probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let can_probe = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.open_timeout)
                    .unwrap_or(false);

                if can_probe {
                    inner.state = CircuitState::HalfOpen;
                    inner.opened_at = None;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        Self::push_outcome(&mut inner, self.config.window_size, false);
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        Self::push_outcome(&mut inner, self.config.window_size, true);

        let tripped = inner.outcomes.len() >= self.config.min_calls
            && inner.failure_rate() >= self.config.failure_rate_threshold;

        if inner.state == CircuitState::HalfOpen || tripped {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.state
    }

    /// Failure rate over the current sliding window.
    pub fn failure_rate(&self) -> f64 {
        let inner = self
            .inner
            .lock()
            .expect("circuit breaker lock is not poisoned");
        inner.failure_rate()
    }

    fn push_outcome(inner: &mut CircuitInner, window_size: usize, failed: bool) {
        inner.outcomes.push_back(failed);
        while inner.outcomes.len() > window_size.max(1) {
            inner.outcomes.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_calls: usize, threshold: f64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: 10,
            failure_rate_threshold: threshold,
            min_calls,
            open_timeout: Duration::from_millis(10),
        }
    }

    #[test]
    fn stays_closed_below_min_calls() {
        let breaker = CircuitBreaker::new(config(4, 0.5));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_once_failure_rate_reaches_threshold() {
        let breaker = CircuitBreaker::new(config(4, 0.5));

        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn old_outcomes_age_out_of_the_window() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            window_size: 4,
            failure_rate_threshold: 0.75,
            min_calls: 4,
            open_timeout: Duration::from_millis(10),
        });

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        // Two successes evict the oldest failure: window is [F F S S].
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.failure_rate() < 0.75);
    }

    #[test]
    fn transitions_to_half_open_after_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new(config(2, 0.5));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(12));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new(config(2, 0.5));

        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(12));
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }
}
