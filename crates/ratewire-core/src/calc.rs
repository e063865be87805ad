//! Derived-rate calculation definitions and their dependency index.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::formula::{ask_token, bid_token, FormulaError, FormulaSlot};
use crate::{Rate, Symbol, UtcDateTime, ValidationError};

/// Errors raised while loading or evaluating a calc definition.
#[derive(Debug, Error)]
pub enum CalcError {
    #[error("calc '{name}': {source}")]
    Formula {
        name: String,
        #[source]
        source: FormulaError,
    },
    #[error("calc '{name}' references unsatisfiable inputs: {}", .names.iter().cloned().collect::<Vec<_>>().join(", "))]
    UnsatisfiableInputs { name: String, names: BTreeSet<String> },
    #[error("calc '{name}' has no dependencies")]
    NoDependencies { name: String },
    #[error("calc '{name}' uses unsupported engine '{engine}'")]
    UnsupportedEngine { name: String, engine: String },
    #[error("calc '{name}' produced an invalid rate: {source}")]
    InvalidRate {
        name: String,
        #[source]
        source: ValidationError,
    },
}

/// Formula engine kind for a calc definition.
///
/// The runtime supports a single sandboxed arithmetic evaluator; the kind
/// is kept explicit so configurations name what they run on and unknown
/// kinds fail at load rather than at tick time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcEngineKind {
    Arithmetic,
}

impl CalcEngineKind {
    pub fn parse(name: &str, value: &str) -> Result<Self, CalcError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "arithmetic" | "expr" => Ok(Self::Arithmetic),
            other => Err(CalcError::UnsupportedEngine {
                name: name.to_owned(),
                engine: other.to_owned(),
            }),
        }
    }
}

/// One derived rate: bid/ask formulas over named dependency fields plus
/// helper constants. Immutable once loaded.
#[derive(Debug)]
pub struct CalcDef {
    name: String,
    engine: CalcEngineKind,
    bid: FormulaSlot,
    ask: FormulaSlot,
    constants: HashMap<String, f64>,
    depends_on: Vec<Symbol>,
}

impl CalcDef {
    pub fn new(
        name: impl Into<String>,
        engine: CalcEngineKind,
        bid: FormulaSlot,
        ask: FormulaSlot,
        constants: HashMap<String, f64>,
        depends_on: Vec<Symbol>,
    ) -> Result<Self, CalcError> {
        let name = name.into();
        if depends_on.is_empty() {
            return Err(CalcError::NoDependencies { name });
        }

        let def = Self {
            name,
            engine,
            bid,
            ask,
            constants,
            depends_on,
        };
        def.validate()?;
        Ok(def)
    }

    /// Compile both formulas and check every referenced name is
    /// satisfiable by the dependency set or the helper constants.
    fn validate(&self) -> Result<(), CalcError> {
        let mut unsatisfied = BTreeSet::new();
        for slot in [&self.bid, &self.ask] {
            let formula = slot.get().map_err(|source| CalcError::Formula {
                name: self.name.clone(),
                source,
            })?;
            for token in formula.names() {
                if !self.is_satisfiable(token) {
                    unsatisfied.insert(token.clone());
                }
            }
        }

        if !unsatisfied.is_empty() {
            return Err(CalcError::UnsatisfiableInputs {
                name: self.name.clone(),
                names: unsatisfied,
            });
        }
        Ok(())
    }

    fn is_satisfiable(&self, token: &str) -> bool {
        if self.constants.contains_key(token) {
            return true;
        }
        self.depends_on.iter().any(|symbol| {
            token == bid_token(symbol.as_str()) || token == ask_token(symbol.as_str())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn engine(&self) -> CalcEngineKind {
        self.engine
    }

    pub fn depends_on(&self) -> &[Symbol] {
        &self.depends_on
    }

    /// Evaluate both sides against gathered dependency rates and stamp the
    /// result with the evaluation time.
    pub fn evaluate(&self, inputs: &HashMap<Symbol, Rate>) -> Result<Rate, CalcError> {
        let mut vars = HashMap::with_capacity(self.depends_on.len() * 2 + self.constants.len());
        for (symbol, rate) in inputs {
            vars.insert(bid_token(symbol.as_str()), rate.bid);
            vars.insert(ask_token(symbol.as_str()), rate.ask);
        }
        for (name, value) in &self.constants {
            vars.insert(name.clone(), *value);
        }

        let bid = self.eval_side(&self.bid, &vars)?;
        let ask = self.eval_side(&self.ask, &vars)?;

        Rate::new(self.name.clone(), bid, ask, UtcDateTime::now()).map_err(|source| {
            CalcError::InvalidRate {
                name: self.name.clone(),
                source,
            }
        })
    }

    fn eval_side(
        &self,
        slot: &FormulaSlot,
        vars: &HashMap<String, f64>,
    ) -> Result<f64, CalcError> {
        let formula = slot.get().map_err(|source| CalcError::Formula {
            name: self.name.clone(),
            source,
        })?;
        formula.eval(vars).map_err(|source| CalcError::Formula {
            name: self.name.clone(),
            source,
        })
    }
}

/// Immutable set of calc definitions with a symbol → calcs index.
///
/// The index is the bipartite dependency graph from raw symbols to
/// derived rate names; all dependencies are raw symbols, so no
/// derived-on-derived chaining exists.
#[derive(Debug, Default, Clone)]
pub struct CalcSet {
    calcs: Vec<Arc<CalcDef>>,
    by_dependency: HashMap<Symbol, Vec<Arc<CalcDef>>>,
}

impl CalcSet {
    pub fn new(calcs: Vec<CalcDef>) -> Self {
        let calcs: Vec<Arc<CalcDef>> = calcs.into_iter().map(Arc::new).collect();
        let mut by_dependency: HashMap<Symbol, Vec<Arc<CalcDef>>> = HashMap::new();
        for calc in &calcs {
            for symbol in calc.depends_on() {
                by_dependency
                    .entry(symbol.clone())
                    .or_default()
                    .push(Arc::clone(calc));
            }
        }
        Self {
            calcs,
            by_dependency,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calcs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calcs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CalcDef>> {
        self.calcs.iter()
    }

    /// Calc definitions whose dependency set includes the symbol.
    pub fn dependents_of(&self, symbol: &Symbol) -> &[Arc<CalcDef>] {
        self.by_dependency
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a name is a known derived rate.
    pub fn contains_name(&self, name: &str) -> bool {
        self.calcs.iter().any(|calc| calc.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(s: &str) -> Symbol {
        Symbol::parse(s).expect("valid symbol")
    }

    fn rate(name: &str, bid: f64, ask: f64) -> Rate {
        Rate::new(name, bid, ask, UtcDateTime::now()).expect("valid rate")
    }

    fn margin_calc() -> CalcDef {
        CalcDef::new(
            "EURUSD-MARGIN",
            CalcEngineKind::Arithmetic,
            FormulaSlot::inline("EURUSD_bid*1.1"),
            FormulaSlot::inline("EURUSD_ask*1.1"),
            HashMap::new(),
            vec![symbol("EURUSD")],
        )
        .expect("valid calc")
    }

    #[test]
    fn evaluates_margin_calc() {
        let calc = margin_calc();
        let mut inputs = HashMap::new();
        inputs.insert(symbol("EURUSD"), rate("EURUSD", 1.2000, 1.2002));

        let derived = calc.evaluate(&inputs).expect("evaluates");
        assert_eq!(derived.name, "EURUSD-MARGIN");
        assert!((derived.bid - 1.32).abs() < 1e-9);
        assert!(derived.ask > derived.bid);
    }

    #[test]
    fn rejects_unsatisfiable_token_at_load() {
        let err = CalcDef::new(
            "BROKEN",
            CalcEngineKind::Arithmetic,
            FormulaSlot::inline("GBPUSD_bid*1.1"),
            FormulaSlot::inline("GBPUSD_ask*1.1"),
            HashMap::new(),
            vec![symbol("EURUSD")],
        )
        .expect_err("must fail");

        match err {
            CalcError::UnsatisfiableInputs { names, .. } => {
                assert!(names.contains("GBPUSD_bid"));
                assert!(names.contains("GBPUSD_ask"));
            }
            other => panic!("expected UnsatisfiableInputs, got {other:?}"),
        }
    }

    #[test]
    fn helper_constants_satisfy_tokens() {
        let mut constants = HashMap::new();
        constants.insert("pad".to_owned(), 0.0005);

        let calc = CalcDef::new(
            "EURUSD-PADDED",
            CalcEngineKind::Arithmetic,
            FormulaSlot::inline("EURUSD_bid + pad"),
            FormulaSlot::inline("EURUSD_ask + pad"),
            constants,
            vec![symbol("EURUSD")],
        )
        .expect("valid calc");

        let mut inputs = HashMap::new();
        inputs.insert(symbol("EURUSD"), rate("EURUSD", 1.2000, 1.2002));
        let derived = calc.evaluate(&inputs).expect("evaluates");
        assert!((derived.bid - 1.2005).abs() < 1e-9);
    }

    #[test]
    fn rejects_empty_dependency_set() {
        let err = CalcDef::new(
            "NO-DEPS",
            CalcEngineKind::Arithmetic,
            FormulaSlot::inline("1.0"),
            FormulaSlot::inline("1.1"),
            HashMap::new(),
            Vec::new(),
        )
        .expect_err("must fail");
        assert!(matches!(err, CalcError::NoDependencies { .. }));
    }

    #[test]
    fn dependency_index_finds_dependents() {
        let set = CalcSet::new(vec![margin_calc()]);
        assert_eq!(set.dependents_of(&symbol("EURUSD")).len(), 1);
        assert!(set.dependents_of(&symbol("GBPUSD")).is_empty());
        assert!(set.contains_name("EURUSD-MARGIN"));
    }

    #[test]
    fn parses_engine_kind() {
        assert_eq!(
            CalcEngineKind::parse("X", "arithmetic").expect("ok"),
            CalcEngineKind::Arithmetic
        );
        assert!(CalcEngineKind::parse("X", "groovy").is_err());
    }
}
