//! Probabilistic shock injection.

use std::collections::HashMap;

use rand::Rng;
use ratewire_core::config::{ShockBand, ShockConfig};
use ratewire_core::Symbol;
use tracing::debug;

/// Per-instrument shock state. The level is a multiplier applied to
/// sigma and spread; 1.0 means no shock. While active it decays
/// geometrically toward 1.0 each cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShockState {
    pub active: bool,
    pub steps_left: u32,
    pub level: f64,
}

impl Default for ShockState {
    fn default() -> Self {
        Self {
            active: false,
            steps_left: 0,
            level: 1.0,
        }
    }
}

/// Injects probabilistic shocks into instrument state.
///
/// Each cycle an inactive instrument may activate a big, medium, or
/// small shock (checked in that order); an active shock decays until its
/// duration expires.
#[derive(Debug)]
pub struct ShockEngine {
    config: ShockConfig,
    states: HashMap<Symbol, ShockState>,
}

impl ShockEngine {
    pub fn new(config: ShockConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
        }
    }

    pub fn state(&self, symbol: &Symbol) -> ShockState {
        self.states.get(symbol).copied().unwrap_or_default()
    }

    /// Advance one cycle for an instrument and return the current shock
    /// level multiplier (1.0 when inactive).
    pub fn step<R: Rng + ?Sized>(&mut self, symbol: &Symbol, rng: &mut R) -> f64 {
        let state = self.states.entry(symbol.clone()).or_default();

        if state.active {
            state.level = 1.0 + (state.level - 1.0) * self.config.decay;
            state.steps_left = state.steps_left.saturating_sub(1);
            if state.steps_left == 0 {
                *state = ShockState::default();
            }
            return state.level;
        }

        let bands = [
            ("big", &self.config.big),
            ("medium", &self.config.medium),
            ("small", &self.config.small),
        ];
        for (label, band) in bands {
            if Self::triggers(band, rng) {
                state.active = true;
                state.steps_left = self.config.duration_steps.max(1);
                state.level = rng.gen_range(band.min_magnitude..=band.max_magnitude);
                debug!(%symbol, shock = label, level = state.level, "shock activated");
                return state.level;
            }
        }

        1.0
    }

    fn triggers<R: Rng + ?Sized>(band: &ShockBand, rng: &mut R) -> bool {
        band.probability > 0.0 && rng.gen_bool(band.probability.clamp(0.0, 1.0))
    }
}
