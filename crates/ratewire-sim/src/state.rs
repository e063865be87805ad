//! Per-instrument mutable simulation state.

use ratewire_core::config::InstrumentConfig;
use ratewire_core::UtcDateTime;
use time::Date;

/// Mutable state owned exclusively by the engine, one per instrument.
/// Created on the first cycle, mutated every cycle, never deleted.
#[derive(Debug, Clone)]
pub struct AssetState {
    pub price: f64,
    pub sigma: f64,
    pub last_return: f64,
    pub day_open: f64,
    pub day_high: f64,
    pub day_low: f64,
    pub day_volume: f64,
    pub last_update: UtcDateTime,
    pub current_day: Date,
    /// Hash of the instrument's tunable parameters; a change triggers a
    /// partial re-initialization instead of a full reset.
    pub config_signature: u64,
    /// Set while the calendar reports closed; the first open cycle
    /// afterwards applies one gap jump instead of a normal step.
    pub pending_gap: bool,
}

impl AssetState {
    pub fn new(config: &InstrumentConfig, now: UtcDateTime) -> Self {
        Self {
            price: config.initial_price,
            sigma: config.initial_sigma,
            last_return: 0.0,
            day_open: config.initial_price,
            day_high: config.initial_price,
            day_low: config.initial_price,
            day_volume: 0.0,
            last_update: now,
            current_day: now.date(),
            config_signature: config_signature(config),
            pending_gap: false,
        }
    }

    /// Re-derive parameter-dependent fields after a live config change,
    /// preserving price continuity and day rollups.
    pub fn apply_config_change(&mut self, config: &InstrumentConfig) {
        self.sigma = config.initial_sigma;
        self.last_return = 0.0;
        self.config_signature = config_signature(config);
    }

    /// Roll the trading day: reset open/high/low/volume.
    pub fn roll_day(&mut self, day: Date) {
        self.current_day = day;
        self.day_open = self.price;
        self.day_high = self.price;
        self.day_low = self.price;
        self.day_volume = 0.0;
    }

    /// Update day high/low for the current price.
    pub fn track_range(&mut self) {
        if self.price > self.day_high {
            self.day_high = self.price;
        }
        if self.price < self.day_low {
            self.day_low = self.price;
        }
    }
}

/// FNV-1a hash over the instrument's serialized tunables.
pub fn config_signature(config: &InstrumentConfig) -> u64 {
    let serialized =
        serde_json::to_string(config).unwrap_or_else(|_| config.symbol.as_str().to_owned());

    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in serialized.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
