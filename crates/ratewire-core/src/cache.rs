//! In-memory caching of the latest rates per platform and symbol.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{PlatformId, Rate, Symbol};

#[derive(Debug, Default)]
struct SymbolEntry {
    // First-seen platform order, used when a formula needs one value
    // for a symbol quoted by several platforms.
    order: Vec<PlatformId>,
    rates: HashMap<PlatformId, Rate>,
}

impl SymbolEntry {
    fn insert(&mut self, platform: PlatformId, rate: Rate) {
        if !self.rates.contains_key(&platform) {
            self.order.push(platform.clone());
        }
        self.rates.insert(platform, rate);
    }

    fn first_seen(&self) -> Option<&Rate> {
        self.order.first().and_then(|platform| self.rates.get(platform))
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    by_symbol: HashMap<Symbol, SymbolEntry>,
    latest: HashMap<Symbol, Rate>,
    derived: HashMap<String, Rate>,
}

/// Thread-safe cache of the most recent rates.
///
/// Raw rates are kept per (symbol, platform) with last-writer-wins
/// semantics per key, plus a symbol-level latest entry. Derived rates are
/// kept by calc name.
#[derive(Debug, Clone, Default)]
pub struct RateCache {
    inner: Arc<tokio::sync::RwLock<CacheInner>>,
}

impl RateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw rate under (symbol, platform) and as the symbol's latest.
    pub async fn insert_raw(&self, platform: PlatformId, symbol: Symbol, rate: Rate) {
        let mut store = self.inner.write().await;
        store
            .by_symbol
            .entry(symbol.clone())
            .or_default()
            .insert(platform, rate.clone());
        store.latest.insert(symbol, rate);
    }

    /// Store a derived rate under its calc name.
    pub async fn insert_derived(&self, rate: Rate) {
        let mut store = self.inner.write().await;
        store.derived.insert(rate.name.clone(), rate);
    }

    /// Latest rate for a symbol regardless of platform (last writer wins).
    pub async fn latest(&self, symbol: &Symbol) -> Option<Rate> {
        let store = self.inner.read().await;
        store.latest.get(symbol).cloned()
    }

    /// Latest rate for a symbol on one platform.
    pub async fn latest_for_platform(
        &self,
        symbol: &Symbol,
        platform: &PlatformId,
    ) -> Option<Rate> {
        let store = self.inner.read().await;
        store
            .by_symbol
            .get(symbol)
            .and_then(|entry| entry.rates.get(platform))
            .cloned()
    }

    /// Value used for formula evaluation: the first-seen platform's rate.
    ///
    /// Formulas reference symbols, not platforms, so when several
    /// platforms quote a symbol an arbitrary-but-stable one is used.
    pub async fn formula_input(&self, symbol: &Symbol) -> Option<Rate> {
        let store = self.inner.read().await;
        store
            .by_symbol
            .get(symbol)
            .and_then(SymbolEntry::first_seen)
            .cloned()
    }

    /// Gather formula inputs for a dependency set. Returns `None` when any
    /// dependency has no cached value yet.
    pub async fn gather(&self, symbols: &[Symbol]) -> Option<HashMap<Symbol, Rate>> {
        let store = self.inner.read().await;
        let mut values = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let rate = store.by_symbol.get(symbol).and_then(SymbolEntry::first_seen)?;
            values.insert(symbol.clone(), rate.clone());
        }
        Some(values)
    }

    /// Latest derived rate by calc name.
    pub async fn derived(&self, name: &str) -> Option<Rate> {
        let store = self.inner.read().await;
        store.derived.get(name).cloned()
    }

    /// Whether any rate (raw or derived) is known under this name.
    pub async fn contains_name(&self, name: &str) -> bool {
        let store = self.inner.read().await;
        if store.derived.contains_key(name) {
            return true;
        }
        Symbol::parse(name)
            .ok()
            .is_some_and(|symbol| store.latest.contains_key(&symbol))
    }

    /// Number of symbols with at least one raw rate.
    pub async fn symbol_count(&self) -> usize {
        let store = self.inner.read().await;
        store.by_symbol.len()
    }
}
