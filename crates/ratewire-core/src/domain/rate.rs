use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{PlatformId, Symbol, UtcDateTime, ValidationError};

/// Smallest representable bid/ask increment. Every emitted quote must
/// satisfy `ask >= bid + MIN_TICK`.
pub const MIN_TICK: f64 = 1e-9;

/// Raw inbound quote as produced by a subscriber adapter.
///
/// Immutable once emitted; the constructor enforces the quote invariants
/// so downstream code never re-checks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub platform: PlatformId,
    pub symbol: Symbol,
    pub bid: f64,
    pub ask: f64,
    pub ts: UtcDateTime,
    /// Optional venue metadata (session id, feed sequence, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl RawTick {
    pub fn new(
        platform: PlatformId,
        symbol: Symbol,
        bid: f64,
        ask: f64,
        ts: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        validate_quote(bid, ask)?;

        Ok(Self {
            platform,
            symbol,
            bid,
            ask,
            ts,
            meta: BTreeMap::new(),
        })
    }

    /// Attach a venue metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

/// Normalized rate flowing through the coordinator, formula engine,
/// distribution server, and publishers.
///
/// `name` is a raw symbol for raw rates and a calc definition name for
/// derived rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub name: String,
    pub bid: f64,
    pub ask: f64,
    pub ts: UtcDateTime,
}

impl Rate {
    pub fn new(
        name: impl Into<String>,
        bid: f64,
        ask: f64,
        ts: UtcDateTime,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyRateName);
        }
        validate_quote(bid, ask)?;

        Ok(Self { name, bid, ask, ts })
    }

    pub fn from_tick(tick: &RawTick) -> Self {
        Self {
            name: tick.symbol.as_str().to_owned(),
            bid: tick.bid,
            ask: tick.ask,
            ts: tick.ts,
        }
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

fn validate_quote(bid: f64, ask: f64) -> Result<(), ValidationError> {
    if !bid.is_finite() {
        return Err(ValidationError::NonFiniteValue { field: "bid" });
    }
    if !ask.is_finite() {
        return Err(ValidationError::NonFiniteValue { field: "ask" });
    }
    if bid <= 0.0 {
        return Err(ValidationError::NonPositiveValue { field: "bid" });
    }
    if ask < bid + MIN_TICK {
        return Err(ValidationError::CrossedQuote { bid, ask });
    }
    Ok(())
}
