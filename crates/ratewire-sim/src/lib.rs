//! # Ratewire Sim
//!
//! Stochastic tick generation for ratewire.
//!
//! ## Model chain
//!
//! Per instrument, each cycle combines (additively in log space):
//!
//! | Step | Component |
//! |------|-----------|
//! | 1 | GARCH(1,1) or EGARCH volatility recursion |
//! | 2 | Volatility regime scaling (duration or Markov switching) |
//! | 3 | Session hour multipliers and macro sensitivity |
//! | 4 | Correlated standard-normal shock (Cholesky factor) |
//! | 5 | Annualized drift |
//! | 6 | Poisson-triggered jumps |
//! | 7 | Ornstein-Uhlenbeck mean reversion |
//! | 8 | Scheduled event shocks |
//!
//! Spreads derive symmetrically from the new price, scaled by the active
//! shock level; day open/high/low/volume roll per trading day; the
//! market calendar freezes state while closed and applies a single gap
//! jump on reopen.
//!
//! The [`SimFeed`] adapter exposes the engine through the core
//! subscriber contract.

pub mod correlate;
pub mod engine;
pub mod feed;
pub mod garch;
pub mod regime;
pub mod shock;
pub mod state;

pub use correlate::CorrelatedNormals;
pub use engine::{SimQuote, StochasticRateEngine, PRICE_FLOOR};
pub use feed::SimFeed;
pub use garch::{egarch_sigma, garch_sigma, SIGMA_FLOOR, VARIANCE_FLOOR};
pub use regime::RegimeMachine;
pub use shock::{ShockEngine, ShockState};
pub use state::AssetState;
