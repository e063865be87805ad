//! Stochastic rate engine.
//!
//! Each update cycle advances every instrument through the full model
//! chain: volatility recursion, regime scaling, session multipliers,
//! correlated random shock, drift, Poisson jumps, mean reversion,
//! scheduled event shocks, spread derivation, and day rollups, gated by
//! the market calendar.
//!
//! The engine never errors outward: a cycle that produces a non-finite
//! price or sigma keeps the last valid state and logs at debug level.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use ratewire_core::config::{
    EventShock, GapConfig, InstrumentConfig, MacroConfig, RatewireConfig, SessionWindow, VolModel,
};
use ratewire_core::{MarketCalendar, Symbol, UtcDateTime, MIN_TICK};
use tracing::debug;

use crate::correlate::CorrelatedNormals;
use crate::garch::{egarch_sigma, garch_sigma};
use crate::regime::RegimeMachine;
use crate::shock::ShockEngine;
use crate::state::{config_signature, AssetState};

const SECONDS_PER_YEAR: f64 = 31_557_600.0;

/// Lower bound on simulated prices.
pub const PRICE_FLOOR: f64 = 1e-6;

/// Scheduled event shocks fire within this distance of their timestamp.
const EVENT_WINDOW: Duration = Duration::from_secs(30);

/// One simulated bid/ask observation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimQuote {
    pub symbol: Symbol,
    pub bid: f64,
    pub ask: f64,
    pub ts: UtcDateTime,
}

/// Per-instrument price/volatility state machine producing ticks.
pub struct StochasticRateEngine {
    instruments: Vec<InstrumentConfig>,
    calendar: MarketCalendar,
    sessions: Vec<SessionWindow>,
    macro_env: Option<MacroConfig>,
    gap: GapConfig,
    events: Vec<EventShock>,
    fired_events: Vec<HashSet<usize>>,
    correlated: CorrelatedNormals,
    regimes: Vec<RegimeMachine>,
    shocks: ShockEngine,
    states: HashMap<Symbol, AssetState>,
    expected_interval: Duration,
    rng: StdRng,
}

impl StochasticRateEngine {
    pub fn from_config(config: &RatewireConfig) -> Self {
        Self::with_seed(config, rand::rngs::OsRng.gen())
    }

    /// Deterministic construction for tests and replayable simulations.
    pub fn with_seed(config: &RatewireConfig, seed: u64) -> Self {
        let correlated = match &config.correlation {
            Some(matrix) => CorrelatedNormals::from_matrix(matrix),
            None => CorrelatedNormals::identity(config.instruments.len()),
        };
        let regimes = config
            .instruments
            .iter()
            .map(|_| RegimeMachine::new(&config.regimes))
            .collect();

        Self {
            instruments: config.instruments.clone(),
            calendar: MarketCalendar::new(config.weekend, config.holidays.clone()),
            sessions: config.sessions.clone(),
            macro_env: config.macro_env,
            gap: config.weekend_gap,
            fired_events: vec![HashSet::new(); config.events.len()],
            events: config.events.clone(),
            correlated,
            regimes,
            shocks: ShockEngine::new(config.shocks),
            states: HashMap::new(),
            expected_interval: config.update_interval(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// State snapshot for one instrument, if it has ticked.
    pub fn state(&self, symbol: &Symbol) -> Option<&AssetState> {
        self.states.get(symbol)
    }

    /// Apply a live configuration change. Instruments whose tunables
    /// changed get a partial re-initialization (sigma re-derived, price
    /// and day rollups preserved); everything parameter-shaped is
    /// rebuilt.
    pub fn apply_config(&mut self, config: &RatewireConfig) {
        for instrument in &config.instruments {
            if let Some(state) = self.states.get_mut(&instrument.symbol) {
                if state.config_signature != config_signature(instrument) {
                    debug!(symbol = %instrument.symbol, "instrument tunables changed, partial re-init");
                    state.apply_config_change(instrument);
                }
            }
        }

        self.instruments = config.instruments.clone();
        self.calendar = MarketCalendar::new(config.weekend, config.holidays.clone());
        self.sessions = config.sessions.clone();
        self.macro_env = config.macro_env;
        self.gap = config.weekend_gap;
        self.fired_events = vec![HashSet::new(); config.events.len()];
        self.events = config.events.clone();
        self.correlated = match &config.correlation {
            Some(matrix) => CorrelatedNormals::from_matrix(matrix),
            None => CorrelatedNormals::identity(config.instruments.len()),
        };
        self.regimes = config
            .instruments
            .iter()
            .map(|_| RegimeMachine::new(&config.regimes))
            .collect();
        self.shocks = ShockEngine::new(config.shocks);
        self.expected_interval = config.update_interval();
    }

    /// Advance every instrument one cycle and return the resulting
    /// quotes.
    pub fn step(&mut self, now: UtcDateTime) -> Vec<SimQuote> {
        let draws = self.correlated.sample(&mut self.rng);
        let mut quotes = Vec::with_capacity(self.instruments.len());
        let closed = self.calendar.is_closed(now);

        for index in 0..self.instruments.len() {
            let quote = self.step_instrument(index, now, closed, draws[index]);
            quotes.push(quote);
        }
        quotes
    }

    fn step_instrument(
        &mut self,
        index: usize,
        now: UtcDateTime,
        closed: bool,
        z: f64,
    ) -> SimQuote {
        let instrument = self.instruments[index].clone();
        let symbol = instrument.symbol.clone();

        // Take the state out for the duration of the cycle; every exit
        // path below re-inserts it.
        let mut state = self
            .states
            .remove(&symbol)
            .unwrap_or_else(|| AssetState::new(&instrument, now));

        // While the market is closed the state does not advance; the
        // first open cycle afterwards applies one gap jump instead of a
        // normal step.
        if closed {
            state.pending_gap = true;
            state.last_update = now;
            let price = state.price;
            self.states.insert(symbol.clone(), state);
            let shock_level = self.shocks.state(&symbol).level;
            return quote_from_price(&instrument, price, shock_level, now);
        }

        let dt_secs = {
            let elapsed = now.abs_diff(state.last_update).as_secs_f64();
            if elapsed > 0.0 {
                elapsed
            } else {
                self.expected_interval.as_secs_f64()
            }
        };
        let dt_years = dt_secs / SECONDS_PER_YEAR;

        let (new_price, new_sigma, log_return, shock_level) = if state.pending_gap {
            // Gap jump: a single Gaussian move sized by the weekend-gap
            // parameters.
            let gap_z: f64 = StandardNormal.sample(&mut self.rng);
            let log_return = self.gap.mean + self.gap.sigma * gap_z;
            let price = (state.price * log_return.exp()).max(PRICE_FLOOR);
            (price, state.sigma, log_return, 1.0)
        } else {
            // 1. Volatility recursion.
            let sigma = match instrument.vol_model {
                VolModel::Garch => garch_sigma(&instrument.garch, state.last_return, state.sigma),
                VolModel::Egarch => match &instrument.egarch {
                    Some(params) => egarch_sigma(params, state.last_return, state.sigma),
                    None => garch_sigma(&instrument.garch, state.last_return, state.sigma),
                },
            };

            // 2. Regime scaling.
            let regime_scale = self.regimes[index].step(&mut self.rng);

            // 3. Session and macro multipliers.
            let session_scale = session_sigma_scale(&self.sessions, now);
            let (macro_drift, macro_sigma) =
                macro_adjustments(self.macro_env, instrument.macro_sensitivity);

            // Shock level scales sigma and, later, the spread.
            let shock_level = self.shocks.step(&symbol, &mut self.rng);

            let sigma_eff = sigma * regime_scale * session_scale * macro_sigma * shock_level;

            // 4. Correlated random shock.
            let random = sigma_eff * dt_years.sqrt() * z;

            // 5. Drift.
            let drift = (instrument.drift + macro_drift) * dt_years;

            // 6. Poisson jump.
            let jump = match &instrument.jumps {
                Some(params) => {
                    let probability = 1.0 - (-params.lambda * dt_years).exp();
                    if probability > 0.0 && self.rng.gen_bool(probability.clamp(0.0, 1.0)) {
                        let jump_z: f64 = StandardNormal.sample(&mut self.rng);
                        params.mean + params.sigma * jump_z
                    } else {
                        0.0
                    }
                }
                None => 0.0,
            };

            // 7. Mean reversion in log-price space.
            let reversion = match &instrument.mean_reversion {
                Some(params) if state.price > 0.0 && params.theta > 0.0 => {
                    params.kappa * (params.theta.ln() - state.price.ln()) * dt_years
                }
                _ => 0.0,
            };

            // 8. Scheduled event shocks.
            let event = self.event_shock(index, &symbol, now);

            // 9. Combine additively in log space.
            let log_return = random + drift + jump + reversion + event;
            let price = (state.price * log_return.exp()).max(PRICE_FLOOR);
            (price, sigma, log_return, shock_level)
        };

        // Numeric guard: a non-finite result keeps the last valid state.
        if !new_price.is_finite() || !new_sigma.is_finite() {
            debug!(%symbol, "non-finite simulation result clamped to last state");
            state.last_update = now;
            let price = state.price;
            self.states.insert(symbol.clone(), state);
            let shock_level = self.shocks.state(&symbol).level;
            return quote_from_price(&instrument, price, shock_level, now);
        }

        state.price = new_price;
        state.sigma = new_sigma;
        state.last_return = log_return;
        state.pending_gap = false;

        // 11. Day rollups.
        if now.date() != state.current_day {
            state.roll_day(now.date());
        } else {
            state.track_range();
        }
        let interval_ratio =
            (dt_secs / self.expected_interval.as_secs_f64().max(1e-9)).clamp(1.0, 5.0);
        let volume_draw: f64 = self.rng.gen_range(0.5..1.5);
        state.day_volume +=
            volume_draw * instrument.expected_volume * (dt_secs / 86_400.0) * interval_ratio;

        state.last_update = now;

        let price = state.price;
        self.states.insert(symbol, state);
        quote_from_price(&instrument, price, shock_level, now)
    }

    fn event_shock(&mut self, instrument_index: usize, symbol: &Symbol, now: UtcDateTime) -> f64 {
        let mut total = 0.0;
        for (event_index, event) in self.events.iter().enumerate() {
            if self.fired_events[event_index].contains(&instrument_index) {
                continue;
            }
            if !event.symbols.is_empty() && !event.symbols.contains(symbol) {
                continue;
            }
            if now.abs_diff(event.at) > EVENT_WINDOW {
                continue;
            }

            let event_z: f64 = StandardNormal.sample(&mut self.rng);
            total += event.mean + event.sigma * event_z;
            self.fired_events[event_index].insert(instrument_index);
            debug!(%symbol, at = %event.at, "scheduled event shock applied");
        }
        total
    }
}

/// Hour-of-day sigma multiplier; first matching window wins, 1.0 when
/// none matches.
fn session_sigma_scale(sessions: &[SessionWindow], now: UtcDateTime) -> f64 {
    let hour = now.into_inner().hour();
    sessions
        .iter()
        .find(|window| window.start_hour <= hour && hour < window.end_hour.min(24))
        .map(|window| window.sigma_scale)
        .unwrap_or(1.0)
}

fn macro_adjustments(macro_env: Option<MacroConfig>, sensitivity: f64) -> (f64, f64) {
    match macro_env {
        Some(env) if sensitivity != 0.0 => (
            env.drift_adjustment * sensitivity,
            1.0 + (env.sigma_scale - 1.0) * sensitivity,
        ),
        _ => (0.0, 1.0),
    }
}

/// 10. Spread derivation: base spread scaled by the shock level, bid/ask
/// symmetric around price, clamped so bid stays positive and ask clears
/// bid.
fn quote_from_price(
    instrument: &InstrumentConfig,
    price: f64,
    shock_level: f64,
    ts: UtcDateTime,
) -> SimQuote {
    let spread_fraction = instrument.spread * shock_level.max(1.0);
    let half = price * spread_fraction / 2.0;

    let bid = (price - half).max(PRICE_FLOOR);
    let mut ask = price + half;
    if ask < bid + MIN_TICK {
        ask = bid + MIN_TICK;
    }

    SimQuote {
        symbol: instrument.symbol.clone(),
        bid,
        ask,
        ts,
    }
}

#[cfg(test)]
mod tests {
    use ratewire_core::RatewireConfig;

    use super::*;

    fn config(extra: serde_json::Value) -> RatewireConfig {
        let mut value = serde_json::json!({
            "update_interval_ms": 1000,
            "instruments": [{
                "symbol": "EURUSD",
                "initial_price": 1.2,
                "drift": 0.02,
                "initial_sigma": 0.1,
                "spread": 0.0002,
                "garch": {"omega": 1e-6, "alpha": 0.05, "beta": 0.90}
            }, {
                "symbol": "GBPUSD",
                "initial_price": 1.27,
                "drift": 0.0,
                "initial_sigma": 0.1,
                "spread": 0.0002,
                "garch": {"omega": 1e-6, "alpha": 0.05, "beta": 0.90}
            }]
        });
        if let (Some(base), Some(add)) = (value.as_object_mut(), extra.as_object()) {
            for (key, entry) in add {
                base.insert(key.clone(), entry.clone());
            }
        }
        RatewireConfig::from_json(&value.to_string()).expect("valid config")
    }

    fn ts(value: &str) -> UtcDateTime {
        UtcDateTime::parse(value).expect("valid timestamp")
    }

    #[test]
    fn quotes_always_satisfy_ask_above_bid_above_zero() {
        let mut engine = StochasticRateEngine::with_seed(&config(serde_json::json!({})), 42);
        let start = ts("2024-01-03T12:00:00Z").unix_seconds();

        for cycle in 0..500 {
            let now = UtcDateTime::from_offset_datetime(
                time::OffsetDateTime::from_unix_timestamp(start + cycle)
                    .expect("valid timestamp"),
            )
            .expect("utc");
            for quote in engine.step(now) {
                assert!(quote.bid > 0.0, "bid={}", quote.bid);
                assert!(quote.ask > quote.bid, "bid={} ask={}", quote.bid, quote.ask);
            }
        }
    }

    #[test]
    fn same_seed_is_deterministic() {
        let cfg = config(serde_json::json!({}));
        let mut a = StochasticRateEngine::with_seed(&cfg, 7);
        let mut b = StochasticRateEngine::with_seed(&cfg, 7);
        let now = ts("2024-01-03T12:00:00Z");

        for _ in 0..50 {
            assert_eq!(a.step(now), b.step(now));
        }
    }

    #[test]
    fn closed_market_does_not_move_price() {
        let cfg = config(serde_json::json!({
            "weekend": {
                "close_day": "Friday", "close_hour": 22,
                "open_day": "Sunday", "open_hour": 22
            }
        }));
        let mut engine = StochasticRateEngine::with_seed(&cfg, 5);

        // Prime state during open hours.
        engine.step(ts("2024-01-05T12:00:00Z"));
        let open_price = engine
            .state(&Symbol::parse("EURUSD").expect("valid"))
            .expect("state exists")
            .price;

        // Saturday cycles: price frozen.
        let saturday = engine.step(ts("2024-01-06T12:00:00Z"));
        let saturday_again = engine.step(ts("2024-01-06T12:00:01Z"));
        assert_eq!(saturday[0].bid, saturday_again[0].bid);
        assert_eq!(
            engine
                .state(&Symbol::parse("EURUSD").expect("valid"))
                .expect("state exists")
                .price,
            open_price
        );
    }

    #[test]
    fn reopen_applies_at_most_one_gap_jump() {
        let cfg = config(serde_json::json!({
            "weekend": {
                "close_day": "Friday", "close_hour": 22,
                "open_day": "Sunday", "open_hour": 22
            },
            "weekend_gap": {"mean": 0.01, "sigma": 0.0}
        }));
        let mut engine = StochasticRateEngine::with_seed(&cfg, 5);
        let symbol = Symbol::parse("EURUSD").expect("valid");

        engine.step(ts("2024-01-05T12:00:00Z"));
        let friday_price = engine.state(&symbol).expect("state").price;

        engine.step(ts("2024-01-06T12:00:00Z"));
        assert!(engine.state(&symbol).expect("state").pending_gap);

        // First open cycle: exactly the deterministic gap factor.
        engine.step(ts("2024-01-07T22:00:30Z"));
        let reopened = engine.state(&symbol).expect("state").price;
        assert!((reopened - friday_price * 0.01f64.exp()).abs() < 1e-12);
        assert!(!engine.state(&symbol).expect("state").pending_gap);
    }

    #[test]
    fn day_transition_resets_rollups() {
        let mut engine = StochasticRateEngine::with_seed(&config(serde_json::json!({})), 9);
        let symbol = Symbol::parse("EURUSD").expect("valid");

        engine.step(ts("2024-01-03T23:59:00Z"));
        engine.step(ts("2024-01-03T23:59:30Z"));
        assert!(engine.state(&symbol).expect("state").day_volume > 0.0);

        engine.step(ts("2024-01-04T00:00:30Z"));
        let state = engine.state(&symbol).expect("state");
        assert_eq!(state.current_day, ts("2024-01-04T00:00:30Z").date());
        // Open/high/low restart from the first price of the new day.
        assert_eq!(state.day_open, state.price);
        assert_eq!(state.day_high, state.price);
        assert_eq!(state.day_low, state.price);
    }

    #[test]
    fn scheduled_event_fires_once_inside_window() {
        let cfg = config(serde_json::json!({
            "events": [{
                "at": "2024-01-03T12:00:00Z",
                "symbols": ["EURUSD"],
                "mean": 0.05,
                "sigma": 0.0
            }]
        }));
        let mut engine = StochasticRateEngine::with_seed(&cfg, 11);
        let symbol = Symbol::parse("EURUSD").expect("valid");

        // Outside the +/-30s window: no event contribution tracked.
        engine.step(ts("2024-01-03T11:58:00Z"));
        assert!(engine.fired_events[0].is_empty());

        // Inside the window: fires exactly once.
        engine.step(ts("2024-01-03T12:00:10Z"));
        assert_eq!(engine.fired_events[0].len(), 1);

        engine.step(ts("2024-01-03T12:00:20Z"));
        assert_eq!(engine.fired_events[0].len(), 1);
    }

    #[test]
    fn config_change_reinitializes_changed_instrument_only() {
        let cfg = config(serde_json::json!({}));
        let mut engine = StochasticRateEngine::with_seed(&cfg, 13);
        let symbol = Symbol::parse("EURUSD").expect("valid");

        engine.step(ts("2024-01-03T12:00:00Z"));
        engine.step(ts("2024-01-03T12:00:01Z"));
        let price_before = engine.state(&symbol).expect("state").price;

        let mut updated = cfg.clone();
        updated.instruments[0].initial_sigma = 0.25;
        engine.apply_config(&updated);

        let state = engine.state(&symbol).expect("state");
        assert_eq!(state.price, price_before);
        assert_eq!(state.sigma, 0.25);
    }
}
