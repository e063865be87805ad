//! Volatility regime switching.

use rand::Rng;
use ratewire_core::config::{RegimeConfig, RegimeLevel};

/// Per-instrument regime state machine.
///
/// Transitions either by minimum-duration-then-probabilistic switching
/// over the configured levels, or by a Markov transition matrix when one
/// is configured. Switching resets steps-in-regime to zero.
#[derive(Debug, Clone)]
pub struct RegimeMachine {
    levels: Vec<RegimeLevel>,
    markov: Option<Vec<Vec<f64>>>,
    current: usize,
    steps_in_regime: u32,
}

impl RegimeMachine {
    pub fn new(config: &RegimeConfig) -> Self {
        Self {
            levels: config.levels.clone(),
            markov: config.markov.clone(),
            current: 0,
            steps_in_regime: 0,
        }
    }

    pub fn current_level(&self) -> Option<&RegimeLevel> {
        self.levels.get(self.current)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn steps_in_regime(&self) -> u32 {
        self.steps_in_regime
    }

    /// Advance one cycle and return the effective sigma scale.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        if self.levels.is_empty() {
            return 1.0;
        }

        let next = match &self.markov {
            Some(matrix) => self.markov_next(matrix, rng),
            None => self.duration_next(rng),
        };

        if next != self.current {
            self.current = next;
            self.steps_in_regime = 0;
        } else {
            self.steps_in_regime = self.steps_in_regime.saturating_add(1);
        }

        self.levels[self.current].sigma_scale
    }

    fn duration_next<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let level = &self.levels[self.current];
        if self.steps_in_regime < level.min_duration_steps {
            return self.current;
        }
        if !rng.gen_bool(level.switch_probability.clamp(0.0, 1.0)) {
            return self.current;
        }

        if self.levels.len() == 1 {
            return self.current;
        }
        // Uniform choice over the other levels.
        let mut pick = rng.gen_range(0..self.levels.len() - 1);
        if pick >= self.current {
            pick += 1;
        }
        pick
    }

    fn markov_next<R: Rng + ?Sized>(&self, matrix: &[Vec<f64>], rng: &mut R) -> usize {
        let row = &matrix[self.current];
        let draw: f64 = rng.gen_range(0.0..1.0);
        let mut cumulative = 0.0;
        for (index, probability) in row.iter().enumerate() {
            cumulative += probability;
            if draw < cumulative {
                return index;
            }
        }
        row.len() - 1
    }
}
