//! Simulation feed adapter.
//!
//! Wraps the stochastic engine behind the subscriber contract: a
//! scheduler task drives one engine cycle per configured interval and
//! emits every resulting quote to the listener. A configured maximum
//! update count (0 = unbounded) ends the feed after that many cycles;
//! the adapter then stays in the connected state with its workload
//! complete, so the supervisor does not restart it.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ratewire_core::config::RatewireConfig;
use ratewire_core::subscriber::{
    ConnectionState, RateListener, RateSubscriber, SubscriberError, SubscriberShared,
    SubscriberStats,
};
use ratewire_core::{PlatformId, RawTick, Symbol, UtcDateTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::StochasticRateEngine;

struct SimFeedInner {
    shared: SubscriberShared,
    listener: Arc<dyn RateListener>,
    engine: tokio::sync::Mutex<StochasticRateEngine>,
    interval: Duration,
    max_updates: u64,
    seen: Mutex<HashSet<Symbol>>,
}

impl SimFeedInner {
    async fn emit_cycle(&self) {
        let quotes = {
            let mut engine = self.engine.lock().await;
            engine.step(UtcDateTime::now())
        };

        for quote in quotes {
            let tick = match RawTick::new(
                self.shared.platform().clone(),
                quote.symbol.clone(),
                quote.bid,
                quote.ask,
                quote.ts,
            ) {
                Ok(tick) => tick,
                Err(error) => {
                    // The engine floors its outputs; a validation failure
                    // here indicates a config pathology worth surfacing.
                    let error = SubscriberError::protocol(format!(
                        "simulated quote for {} rejected: {error}",
                        quote.symbol
                    ));
                    self.listener
                        .on_rate_error(self.shared.platform(), &error)
                        .await;
                    continue;
                }
            };

            self.shared.record_tick();
            let first = self
                .seen
                .lock()
                .expect("seen-set lock is not poisoned")
                .insert(quote.symbol);
            if first {
                self.listener.on_rate_available(tick).await;
            } else {
                self.listener.on_rate_update(tick).await;
            }
        }
    }

    async fn scheduler_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let mut cycles: u64 = 0;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = stop.changed() => {
                    // A dropped sender also means stop.
                    if changed.is_err() || *stop.borrow() {
                        self.shared
                            .set_state(ConnectionState::Disconnected, &self.listener)
                            .await;
                        return;
                    }
                }
            }

            self.emit_cycle().await;

            cycles += 1;
            if self.max_updates > 0 && cycles >= self.max_updates {
                info!(
                    platform = %self.shared.platform(),
                    cycles,
                    "simulation feed reached max update count"
                );
                return;
            }
        }
    }
}

/// Adapter wrapping the stochastic engine as a tick source.
pub struct SimFeed {
    inner: Arc<SimFeedInner>,
    task: tokio::sync::Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl SimFeed {
    pub fn new(
        platform: PlatformId,
        config: &RatewireConfig,
        listener: Arc<dyn RateListener>,
    ) -> Self {
        Self::with_engine(
            platform,
            StochasticRateEngine::from_config(config),
            config.update_interval(),
            config.max_updates,
            listener,
        )
    }

    pub fn with_engine(
        platform: PlatformId,
        engine: StochasticRateEngine,
        interval: Duration,
        max_updates: u64,
        listener: Arc<dyn RateListener>,
    ) -> Self {
        Self {
            inner: Arc::new(SimFeedInner {
                shared: SubscriberShared::new(platform),
                listener,
                engine: tokio::sync::Mutex::new(engine),
                interval,
                max_updates,
                seen: Mutex::new(HashSet::new()),
            }),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Push a live configuration change into the running engine.
    pub async fn apply_config(&self, config: &RatewireConfig) {
        let mut engine = self.inner.engine.lock().await;
        engine.apply_config(config);
    }
}

impl RateSubscriber for SimFeed {
    fn platform(&self) -> PlatformId {
        self.inner.shared.platform().clone()
    }

    fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    fn connect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), SubscriberError>> + Send + 'a>> {
        Box::pin(async move {
            let mut task = self.task.lock().await;
            if self.inner.shared.state().is_connected() {
                return Ok(());
            }

            self.inner.shared.record_connect_attempt();
            self.inner
                .shared
                .set_state(ConnectionState::Connecting, &self.inner.listener)
                .await;

            let (stop_tx, stop_rx) = watch::channel(false);
            let handle = tokio::spawn(Arc::clone(&self.inner).scheduler_loop(stop_rx));
            *task = Some((stop_tx, handle));

            self.inner
                .shared
                .set_state(ConnectionState::Connected, &self.inner.listener)
                .await;
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut task = self.task.lock().await;
            if let Some((stop_tx, handle)) = task.take() {
                let _ = stop_tx.send(true);
                if let Err(error) = handle.await {
                    warn!(platform = %self.inner.shared.platform(), %error, "scheduler join failed");
                }
            }
            self.inner
                .shared
                .set_state(ConnectionState::Disconnected, &self.inner.listener)
                .await;
        })
    }

    fn stats(&self) -> SubscriberStats {
        self.inner.shared.stats()
    }
}
