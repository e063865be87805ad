//! Dependency-driven rate coordinator.
//!
//! The coordinator is the center of the pipeline: it caches the latest
//! raw rate per (platform, symbol), forwards every rate to the
//! distribution sinks, and recomputes each derived rate whose dependency
//! set includes the updated symbol.
//!
//! # Consistency
//!
//! Recalculation runs inline on the task that delivered the triggering
//! tick. When two dependencies of the same calc update concurrently, one
//! evaluation may read a slightly stale value for the other dependency;
//! this relaxed, eventually-consistent behavior is deliberate. Per-calc
//! evaluation errors are logged and isolated; they never block other
//! calcs or future ticks.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info, warn};

use crate::cache::RateCache;
use crate::calc::CalcSet;
use crate::publisher::PublisherSet;
use crate::subscriber::{ConnectionState, RateListener, SubscriberError};
use crate::{PlatformId, Rate, RawTick};

/// Caches raw rates, recomputes derived rates, forwards everything.
pub struct Coordinator {
    cache: RateCache,
    calcs: CalcSet,
    sinks: PublisherSet,
}

impl Coordinator {
    pub fn new(calcs: CalcSet, sinks: PublisherSet) -> Self {
        Self {
            cache: RateCache::new(),
            calcs,
            sinks,
        }
    }

    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    pub fn calcs(&self) -> &CalcSet {
        &self.calcs
    }

    fn forward(&self, rate: &Rate) {
        for sink in &self.sinks {
            sink.publish(rate);
        }
    }

    /// Full tick pipeline: cache, forward, recompute dependents.
    pub async fn process_tick(&self, tick: RawTick) {
        let raw = Rate::from_tick(&tick);
        self.cache
            .insert_raw(tick.platform.clone(), tick.symbol.clone(), raw.clone())
            .await;
        self.forward(&raw);

        for calc in self.calcs.dependents_of(&tick.symbol) {
            let Some(inputs) = self.cache.gather(calc.depends_on()).await else {
                // Not all dependencies cached yet; retried on the next
                // qualifying tick.
                debug!(calc = calc.name(), "recalculation deferred, missing dependency data");
                continue;
            };

            match calc.evaluate(&inputs) {
                Ok(derived) => {
                    self.cache.insert_derived(derived.clone()).await;
                    self.forward(&derived);
                }
                Err(error) => {
                    warn!(calc = calc.name(), %error, "derived rate evaluation failed");
                }
            }
        }
    }
}

impl RateListener for Coordinator {
    fn on_rate_available<'a>(
        &'a self,
        tick: RawTick,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            debug!(symbol = %tick.symbol, platform = %tick.platform, "first rate for symbol");
            self.process_tick(tick).await;
        })
    }

    fn on_rate_update<'a>(
        &'a self,
        tick: RawTick,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(self.process_tick(tick))
    }

    fn on_rate_status<'a>(
        &'a self,
        platform: &'a PlatformId,
        state: ConnectionState,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            info!(%platform, %state, "subscriber status changed");
        })
    }

    fn on_rate_error<'a>(
        &'a self,
        platform: &'a PlatformId,
        error: &'a SubscriberError,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            warn!(%platform, %error, "subscriber error");
        })
    }
}
