//! Subscriber adapter contract.
//!
//! A subscriber adapter wraps one tick source (the simulation engine, a
//! remote TCP feed, or a remote REST feed) behind a uniform
//! connect/subscribe/disconnect surface and emits normalized ticks to a
//! [`RateListener`].
//!
//! # Contract
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`platform`](RateSubscriber::platform) | Platform this adapter feeds from |
//! | [`state`](RateSubscriber::state) | Current connection state |
//! | [`connect`](RateSubscriber::connect) | Start the receive loop (idempotent while connected) |
//! | [`disconnect`](RateSubscriber::disconnect) | Stop the receive loop and notify the listener |
//! | [`stats`](RateSubscriber::stats) | Runtime counters for supervision |
//!
//! Adapters run their own receive loop on a spawned task; `connect`
//! returns once the transport is established. `disconnect` must unblock
//! a blocked receive loop.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{PlatformId, RawTick};

/// Adapter connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberErrorKind {
    ConnectFailed,
    Io,
    Protocol,
    Unavailable,
}

/// Structured subscriber error used by circuit-breaker accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberError {
    kind: SubscriberErrorKind,
    message: String,
    retryable: bool,
}

impl SubscriberError {
    pub fn connect_failed(message: impl Into<String>) -> Self {
        Self {
            kind: SubscriberErrorKind::ConnectFailed,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self {
            kind: SubscriberErrorKind::Io,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: SubscriberErrorKind::Protocol,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SubscriberErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub const fn kind(&self) -> SubscriberErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SubscriberErrorKind::ConnectFailed => "subscriber.connect_failed",
            SubscriberErrorKind::Io => "subscriber.io",
            SubscriberErrorKind::Protocol => "subscriber.protocol",
            SubscriberErrorKind::Unavailable => "subscriber.unavailable",
        }
    }
}

impl Display for SubscriberError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SubscriberError {}

/// Runtime counters exposed per adapter for supervision and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberStats {
    pub platform: PlatformId,
    pub state: ConnectionState,
    pub ticks_received: u64,
    pub connect_attempts: u64,
}

/// Callback surface invoked by adapter receive loops.
///
/// Callbacks run inline on the adapter's receive task: tick processing
/// (caching, recalculation, forwarding) happens on the task that produced
/// the tick, with no intermediate queue.
pub trait RateListener: Send + Sync {
    /// First tick observed for a symbol on this platform.
    fn on_rate_available<'a>(
        &'a self,
        tick: RawTick,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Subsequent tick for an already-seen symbol.
    fn on_rate_update<'a>(
        &'a self,
        tick: RawTick,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Connection state transition.
    fn on_rate_status<'a>(
        &'a self,
        platform: &'a PlatformId,
        state: ConnectionState,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Adapter-level failure that did not produce a tick.
    fn on_rate_error<'a>(
        &'a self,
        platform: &'a PlatformId,
        error: &'a SubscriberError,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Subscriber adapter contract.
///
/// Implementations must be `Send + Sync`; the supervisor shares them
/// across tasks behind an `Arc`.
pub trait RateSubscriber: Send + Sync {
    /// Platform this adapter feeds from.
    fn platform(&self) -> PlatformId;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Establish the transport and start the receive loop.
    ///
    /// Must be idempotent while connected: a second `connect` on a
    /// connected adapter returns `Ok(())` without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError`] when the transport cannot be
    /// established; the supervisor records the outcome against the
    /// adapter's circuit breaker.
    fn connect<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(), SubscriberError>> + Send + 'a>>;

    /// Signal the receive loop to stop and notify the listener.
    fn disconnect<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

    /// Runtime counters for supervision.
    fn stats(&self) -> SubscriberStats;
}

/// Shared adapter bookkeeping: connection state plus counters.
///
/// Concrete adapters embed one of these so state transitions, listener
/// notification, and stats stay uniform across implementations.
#[derive(Debug)]
pub struct SubscriberShared {
    platform: PlatformId,
    state: AtomicU8,
    ticks_received: AtomicU64,
    connect_attempts: AtomicU64,
}

impl SubscriberShared {
    pub fn new(platform: PlatformId) -> Self {
        Self {
            platform,
            state: AtomicU8::new(state_to_u8(ConnectionState::Disconnected)),
            ticks_received: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
        }
    }

    pub fn platform(&self) -> &PlatformId {
        &self.platform
    }

    pub fn state(&self) -> ConnectionState {
        state_from_u8(self.state.load(Ordering::Acquire))
    }

    /// Transition state and notify the listener when it actually changed.
    pub async fn set_state(&self, state: ConnectionState, listener: &Arc<dyn RateListener>) {
        let previous = self.state.swap(state_to_u8(state), Ordering::AcqRel);
        if state_from_u8(previous) != state {
            listener.on_rate_status(&self.platform, state).await;
        }
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SubscriberStats {
        SubscriberStats {
            platform: self.platform.clone(),
            state: self.state(),
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
        }
    }
}

const fn state_to_u8(state: ConnectionState) -> u8 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
        ConnectionState::Error => 3,
    }
}

const fn state_from_u8(value: u8) -> ConnectionState {
    match value {
        1 => ConnectionState::Connecting,
        2 => ConnectionState::Connected,
        3 => ConnectionState::Error,
        _ => ConnectionState::Disconnected,
    }
}
