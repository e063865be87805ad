//! Supervised reconnection for subscriber adapters.
//!
//! On a fixed interval the supervisor health-checks every registered
//! adapter and reconnects the ones that report not-connected. Each
//! connect attempt goes through the adapter's circuit breaker: while the
//! breaker is open the attempt is short-circuited and logged without
//! invoking the adapter. Successive attempts against the same adapter
//! are additionally spaced by exponential backoff with jitter.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::retry::Backoff;
use crate::subscriber::{RateSubscriber, SubscriberStats};

#[derive(Debug, Default)]
struct ReconnectControl {
    attempt: u32,
    not_before: Option<Instant>,
}

struct Supervised {
    subscriber: Arc<dyn RateSubscriber>,
    breaker: CircuitBreaker,
    control: Mutex<ReconnectControl>,
}

/// Periodic health-check and reconnect loop over a set of adapters.
pub struct SubscriberSupervisor {
    adapters: Vec<Supervised>,
    check_interval: Duration,
    backoff: Backoff,
}

impl SubscriberSupervisor {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            adapters: Vec::new(),
            check_interval,
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Register an adapter for supervision.
    pub fn add(&mut self, subscriber: Arc<dyn RateSubscriber>, breaker_config: CircuitBreakerConfig) {
        self.adapters.push(Supervised {
            subscriber,
            breaker: CircuitBreaker::new(breaker_config),
            control: Mutex::new(ReconnectControl::default()),
        });
    }

    /// Snapshot of per-adapter runtime stats.
    pub fn stats(&self) -> Vec<SubscriberStats> {
        self.adapters
            .iter()
            .map(|entry| entry.subscriber.stats())
            .collect()
    }

    /// One supervision pass over every adapter.
    pub async fn check_once(&self) {
        for entry in &self.adapters {
            let platform = entry.subscriber.platform();
            if entry.subscriber.state().is_connected() {
                continue;
            }

            {
                let control = entry
                    .control
                    .lock()
                    .expect("supervisor lock is not poisoned");
                if let Some(not_before) = control.not_before {
                    if Instant::now() < not_before {
                        continue;
                    }
                }
            }

            if !entry.breaker.allow_request() {
                debug!(
                    %platform,
                    failure_rate = entry.breaker.failure_rate(),
                    "connect short-circuited, circuit open"
                );
                continue;
            }

            match entry.subscriber.connect().await {
                Ok(()) => {
                    entry.breaker.record_success();
                    let mut control = entry
                        .control
                        .lock()
                        .expect("supervisor lock is not poisoned");
                    control.attempt = 0;
                    control.not_before = None;
                    info!(%platform, "subscriber connected");
                }
                Err(error) => {
                    entry.breaker.record_failure();
                    let mut control = entry
                        .control
                        .lock()
                        .expect("supervisor lock is not poisoned");
                    let delay = self.backoff.delay(control.attempt);
                    control.attempt = control.attempt.saturating_add(1);
                    control.not_before = Some(Instant::now() + delay);
                    warn!(
                        %platform,
                        %error,
                        state = ?entry.breaker.state(),
                        retry_in_ms = delay.as_millis() as u64,
                        "subscriber connect failed"
                    );
                }
            }
        }
    }

    /// Breaker state for one platform, for diagnostics.
    pub fn breaker_state(&self, platform: &crate::PlatformId) -> Option<CircuitState> {
        self.adapters
            .iter()
            .find(|entry| entry.subscriber.platform() == *platform)
            .map(|entry| entry.breaker.state())
    }

    /// Run the supervision loop until shutdown flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.check_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }

            self.check_once().await;

            for stats in self.stats() {
                debug!(
                    platform = %stats.platform,
                    state = %stats.state,
                    ticks = stats.ticks_received,
                    attempts = stats.connect_attempts,
                    "subscriber stats"
                );
            }
        }

        for entry in &self.adapters {
            entry.subscriber.disconnect().await;
        }
        info!("subscriber supervisor stopped");
    }
}
