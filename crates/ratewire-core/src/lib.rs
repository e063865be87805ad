//! # Ratewire Core
//!
//! Core contracts and coordination logic for the ratewire quote
//! simulation and distribution system.
//!
//! ## Overview
//!
//! This crate provides the foundational components for ratewire:
//!
//! - **Canonical domain models** for symbols, platforms, ticks, and rates
//! - **Subscriber contract** wrapping tick sources behind a uniform
//!   connect/disconnect surface
//! - **Supervised reconnection** with circuit-breaker protection
//! - **Platform rate cache** with last-writer-wins per key
//! - **Formula engine**: a sandboxed arithmetic evaluator for derived
//!   rates
//! - **Coordinator** caching raw rates and recomputing dependents
//! - **Market calendar** for weekend/holiday gating
//! - **Configuration** model with validation and polling hot reload
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Remote feed adapters (TCP, REST) and the kind registry |
//! | [`cache`] | Latest-rate cache per platform and symbol |
//! | [`calc`] | Derived-rate definitions and dependency index |
//! | [`calendar`] | Weekend and holiday gating |
//! | [`circuit_breaker`] | Sliding-window failure-rate circuit breaker |
//! | [`config`] | Configuration model, validation, hot reload |
//! | [`coordinator`] | Tick pipeline: cache, recompute, forward |
//! | [`domain`] | Domain models (Symbol, PlatformId, Rate, RawTick) |
//! | [`formula`] | Arithmetic expression compiler and evaluator |
//! | [`publisher`] | Downstream rate sinks |
//! | [`retry`] | Reconnect backoff |
//! | [`subscriber`] | Subscriber adapter contract |
//! | [`supervisor`] | Periodic health-check and reconnect loop |
//!
//! ## Error Handling
//!
//! Nothing in the tick-processing path terminates the process: formula
//! failures are isolated per calc definition, adapter failures feed the
//! circuit breaker and are retried, and numeric instability in upstream
//! values is rejected at the domain boundary. Only startup configuration
//! errors are fatal.

pub mod adapters;
pub mod cache;
pub mod calc;
pub mod calendar;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod formula;
pub mod publisher;
pub mod retry;
pub mod subscriber;
pub mod supervisor;

// Re-export commonly used types at crate root for convenience

// Domain models
pub use domain::{PlatformId, Rate, RawTick, Symbol, UtcDateTime, MIN_TICK};

// Error types
pub use error::{CoreError, ValidationError};

// Circuit breaker
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

// Caching
pub use cache::RateCache;

// Calc definitions and formulas
pub use calc::{CalcDef, CalcEngineKind, CalcError, CalcSet};
pub use formula::{Formula, FormulaError, FormulaSlot};

// Calendar
pub use calendar::{HolidayWindow, MarketCalendar, WeekendSchedule};

// Subscriber contract
pub use subscriber::{
    ConnectionState, RateListener, RateSubscriber, SubscriberError, SubscriberErrorKind,
    SubscriberStats,
};

// Adapters and registry
pub use adapters::{RestFeedSubscriber, SubscriberFactory, SubscriberRegistry, TcpFeedSubscriber};

// Supervision
pub use retry::Backoff;
pub use supervisor::SubscriberSupervisor;

// Coordination and publishing
pub use coordinator::Coordinator;
pub use publisher::{BroadcastPublisher, PublisherSet, RatePublisher, TracingPublisher};

// Configuration
pub use config::{ConfigError, ConfigWatcher, RatewireConfig, SubscriberSpec};
