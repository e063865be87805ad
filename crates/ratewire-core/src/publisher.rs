//! Downstream rate sinks.
//!
//! Every raw and derived rate the coordinator processes is forwarded to
//! each registered [`RatePublisher`]. Publishers must not block: slow
//! consumers are handled by the publisher implementation (drop-on-lag),
//! never by stalling the tick path.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use crate::Rate;

/// Abstract downstream sink receiving every raw and derived rate.
pub trait RatePublisher: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Deliver one rate. Must return promptly; implementations queue or
    /// drop rather than block.
    fn publish(&self, rate: &Rate);
}

/// Publisher that emits each rate as a trace event.
#[derive(Debug, Default)]
pub struct TracingPublisher;

impl RatePublisher for TracingPublisher {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn publish(&self, rate: &Rate) {
        trace!(name = %rate.name, bid = rate.bid, ask = rate.ask, ts = %rate.ts, "rate");
    }
}

/// In-process message-bus publisher backed by a tokio broadcast channel.
///
/// External consumers subscribe for an independent receiver; a lagging
/// receiver loses the oldest rates (broadcast semantics) instead of
/// backpressuring the tick path. This is the seam an external message-bus
/// bridge plugs into.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Rate>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New independent receiver for every rate published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Rate> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl RatePublisher for BroadcastPublisher {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn publish(&self, rate: &Rate) {
        // Send fails only when no receiver is subscribed; that is not an
        // error for a bus.
        let _ = self.tx.send(rate.clone());
    }
}

/// Convenience alias for the sink list handed to the coordinator.
pub type PublisherSet = Vec<Arc<dyn RatePublisher>>;
