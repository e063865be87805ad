//! Sandboxed arithmetic formula engine for derived rates.
//!
//! Formulas are compiled ahead of use into a small AST supporting
//! arithmetic and named-variable substitution only: no function calls,
//! no assignment, no arbitrary code. Variables follow the
//! `SYMBOL_bid` / `SYMBOL_ask` convention for dependency fields plus
//! named helper constants.
//!
//! # Grammar
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | IDENT | '(' expr ')'
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use thiserror::Error;

/// Formula compilation and evaluation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("unknown variable '{name}'")]
    UnknownVariable { name: String },
    #[error("missing inputs: {}", format_names(.names))]
    MissingInputs { names: BTreeSet<String> },
    #[error("division by zero")]
    DivideByZero,
    #[error("result is not finite")]
    NonFiniteResult,
    #[error("cannot read formula file '{path}': {message}")]
    SourceUnavailable { path: String, message: String },
}

fn format_names(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Variable name for a dependency's bid side.
pub fn bid_token(symbol: &str) -> String {
    format!("{symbol}_bid")
}

/// Variable name for a dependency's ask side.
pub fn ask_token(symbol: &str) -> String {
    format!("{symbol}_ask")
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Rem(Box<Expr>, Box<Expr>),
}

/// A compiled formula: AST plus the set of variable names it references.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    ast: Expr,
    names: BTreeSet<String>,
}

impl Formula {
    /// Compile a formula source string.
    pub fn compile(source: &str) -> Result<Self, FormulaError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(FormulaError::Empty);
        }

        let mut parser = Parser::new(trimmed);
        let ast = parser.expr()?;
        parser.expect_end()?;

        let mut names = BTreeSet::new();
        collect_names(&ast, &mut names);

        Ok(Self {
            source: trimmed.to_owned(),
            ast,
            names,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Variable names referenced by this formula.
    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// Names referenced by the formula but absent from `available`.
    ///
    /// Reported as a named set for diagnostics rather than a generic
    /// error.
    pub fn missing_from<'a>(
        &self,
        available: impl Iterator<Item = &'a String>,
    ) -> BTreeSet<String> {
        let supplied: BTreeSet<&String> = available.collect();
        self.names
            .iter()
            .filter(|name| !supplied.contains(name))
            .cloned()
            .collect()
    }

    /// Evaluate against a variable map, validating inputs first.
    pub fn eval(&self, vars: &HashMap<String, f64>) -> Result<f64, FormulaError> {
        let missing = self.missing_from(vars.keys());
        if !missing.is_empty() {
            return Err(FormulaError::MissingInputs { names: missing });
        }

        let value = eval_expr(&self.ast, vars)?;
        if !value.is_finite() {
            return Err(FormulaError::NonFiniteResult);
        }
        Ok(value)
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn collect_names(expr: &Expr, names: &mut BTreeSet<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Var(name) => {
            names.insert(name.clone());
        }
        Expr::Neg(inner) => collect_names(inner, names),
        Expr::Add(lhs, rhs)
        | Expr::Sub(lhs, rhs)
        | Expr::Mul(lhs, rhs)
        | Expr::Div(lhs, rhs)
        | Expr::Rem(lhs, rhs) => {
            collect_names(lhs, names);
            collect_names(rhs, names);
        }
    }
}

fn eval_expr(expr: &Expr, vars: &HashMap<String, f64>) -> Result<f64, FormulaError> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Var(name) => vars
            .get(name)
            .copied()
            .ok_or_else(|| FormulaError::UnknownVariable { name: name.clone() }),
        Expr::Neg(inner) => Ok(-eval_expr(inner, vars)?),
        Expr::Add(lhs, rhs) => Ok(eval_expr(lhs, vars)? + eval_expr(rhs, vars)?),
        Expr::Sub(lhs, rhs) => Ok(eval_expr(lhs, vars)? - eval_expr(rhs, vars)?),
        Expr::Mul(lhs, rhs) => Ok(eval_expr(lhs, vars)? * eval_expr(rhs, vars)?),
        Expr::Div(lhs, rhs) => {
            let denom = eval_expr(rhs, vars)?;
            if denom == 0.0 {
                return Err(FormulaError::DivideByZero);
            }
            Ok(eval_expr(lhs, vars)? / denom)
        }
        Expr::Rem(lhs, rhs) => {
            let denom = eval_expr(rhs, vars)?;
            if denom == 0.0 {
                return Err(FormulaError::DivideByZero);
            }
            Ok(eval_expr(lhs, vars)? % denom)
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> FormulaError {
        FormulaError::Parse {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Some(b'-') => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.unary()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    lhs = Expr::Mul(Box::new(lhs), Box::new(rhs));
                }
                Some(b'/') => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    lhs = Expr::Div(Box::new(lhs), Box::new(rhs));
                }
                Some(b'%') => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    lhs = Expr::Rem(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if self.peek() == Some(b'-') {
            self.pos += 1;
            let inner = self.unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(ch) if ch.is_ascii_digit() || ch == b'.' => self.number(),
            Some(ch) if ch.is_ascii_alphabetic() || ch == b'_' => Ok(Expr::Var(self.ident())),
            Some(ch) => Err(self.error(format!("unexpected character '{}'", ch as char))),
            None => Err(self.error("unexpected end of formula")),
        }
    }

    fn number(&mut self) -> Result<Expr, FormulaError> {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let ch = self.bytes[self.pos];
            let numeric = ch.is_ascii_digit()
                || ch == b'.'
                || ch == b'e'
                || ch == b'E'
                || ((ch == b'+' || ch == b'-')
                    && matches!(self.bytes.get(self.pos - 1), Some(b'e') | Some(b'E')));
            if !numeric {
                break;
            }
            self.pos += 1;
        }

        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(Expr::Number)
            .map_err(|_| FormulaError::Parse {
                offset: start,
                message: format!("invalid number '{text}'"),
            })
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let ch = self.bytes[self.pos];
            if ch.is_ascii_alphanumeric() || ch == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.input[start..self.pos].to_owned()
    }

    fn expect_end(&mut self) -> Result<(), FormulaError> {
        if self.peek().is_some() {
            return Err(self.error("trailing input after expression"));
        }
        Ok(())
    }
}

/// Where a formula's text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaOrigin {
    /// Text held in configuration.
    Inline(String),
    /// Text read from a file; re-checked by modification time.
    File(PathBuf),
}

/// Lazily compiled formula with hot reload for file-backed sources.
///
/// Inline sources compile once. File-backed sources are re-read and
/// re-compiled when the file's modification time changes; a failed
/// re-compile keeps the previously compiled formula and surfaces the
/// error to the caller of that evaluation only.
#[derive(Debug)]
pub struct FormulaSlot {
    origin: FormulaOrigin,
    cached: Mutex<Option<CachedFormula>>,
}

#[derive(Debug, Clone)]
struct CachedFormula {
    modified: Option<SystemTime>,
    formula: Arc<Formula>,
}

impl FormulaSlot {
    pub fn inline(source: impl Into<String>) -> Self {
        Self {
            origin: FormulaOrigin::Inline(source.into()),
            cached: Mutex::new(None),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            origin: FormulaOrigin::File(path.into()),
            cached: Mutex::new(None),
        }
    }

    pub fn origin(&self) -> &FormulaOrigin {
        &self.origin
    }

    /// Current compiled formula, recompiling a stale file-backed source.
    pub fn get(&self) -> Result<Arc<Formula>, FormulaError> {
        let mut cached = self
            .cached
            .lock()
            .expect("formula slot lock is not poisoned");

        match &self.origin {
            FormulaOrigin::Inline(source) => {
                if let Some(entry) = cached.as_ref() {
                    return Ok(Arc::clone(&entry.formula));
                }
                let formula = Arc::new(Formula::compile(source)?);
                *cached = Some(CachedFormula {
                    modified: None,
                    formula: Arc::clone(&formula),
                });
                Ok(formula)
            }
            FormulaOrigin::File(path) => {
                let modified = std::fs::metadata(path)
                    .and_then(|meta| meta.modified())
                    .map_err(|err| FormulaError::SourceUnavailable {
                        path: path.display().to_string(),
                        message: err.to_string(),
                    })?;

                if let Some(entry) = cached.as_ref() {
                    if entry.modified == Some(modified) {
                        return Ok(Arc::clone(&entry.formula));
                    }
                }

                let source = std::fs::read_to_string(path).map_err(|err| {
                    FormulaError::SourceUnavailable {
                        path: path.display().to_string(),
                        message: err.to_string(),
                    }
                })?;
                let formula = Arc::new(Formula::compile(&source)?);
                *cached = Some(CachedFormula {
                    modified: Some(modified),
                    formula: Arc::clone(&formula),
                });
                Ok(formula)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries
            .iter()
            .map(|(name, value)| ((*name).to_owned(), *value))
            .collect()
    }

    #[test]
    fn evaluates_dependency_scaling() {
        let formula = Formula::compile("EURUSD_bid*1.1").expect("compiles");
        let result = formula
            .eval(&vars(&[("EURUSD_bid", 1.2000)]))
            .expect("evaluates");
        assert!((result - 1.32).abs() < 1e-12);
    }

    #[test]
    fn respects_precedence_and_parentheses() {
        let formula = Formula::compile("2 + 3 * 4").expect("compiles");
        assert_eq!(formula.eval(&HashMap::new()).expect("evaluates"), 14.0);

        let formula = Formula::compile("(2 + 3) * 4").expect("compiles");
        assert_eq!(formula.eval(&HashMap::new()).expect("evaluates"), 20.0);
    }

    #[test]
    fn handles_unary_minus_and_scientific_notation() {
        let formula = Formula::compile("-2e-2 + x").expect("compiles");
        let result = formula.eval(&vars(&[("x", 0.05)])).expect("evaluates");
        assert!((result - 0.03).abs() < 1e-12);
    }

    #[test]
    fn cross_pair_formula_evaluates() {
        let formula = Formula::compile("EURUSD_bid / USDJPY_ask + margin").expect("compiles");
        let result = formula
            .eval(&vars(&[
                ("EURUSD_bid", 1.2),
                ("USDJPY_ask", 150.0),
                ("margin", 0.001),
            ]))
            .expect("evaluates");
        assert!((result - (1.2 / 150.0 + 0.001)).abs() < 1e-12);
    }

    #[test]
    fn reports_missing_inputs_as_named_set() {
        let formula = Formula::compile("EURUSD_bid + GBPUSD_ask + spread_pad").expect("compiles");
        let err = formula
            .eval(&vars(&[("EURUSD_bid", 1.2)]))
            .expect_err("must fail");

        match err {
            FormulaError::MissingInputs { names } => {
                assert_eq!(
                    names.into_iter().collect::<Vec<_>>(),
                    vec!["GBPUSD_ask".to_owned(), "spread_pad".to_owned()]
                );
            }
            other => panic!("expected MissingInputs, got {other:?}"),
        }
    }

    #[test]
    fn rejects_division_by_zero() {
        let formula = Formula::compile("1 / x").expect("compiles");
        let err = formula.eval(&vars(&[("x", 0.0)])).expect_err("must fail");
        assert_eq!(err, FormulaError::DivideByZero);
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = Formula::compile("1 + 2 )").expect_err("must fail");
        assert!(matches!(err, FormulaError::Parse { .. }));
    }

    #[test]
    fn rejects_function_call_syntax() {
        let err = Formula::compile("max(1, 2)").expect_err("must fail");
        assert!(matches!(err, FormulaError::Parse { .. }));
    }

    #[test]
    fn rejects_empty_source() {
        assert_eq!(Formula::compile("   "), Err(FormulaError::Empty));
    }

    #[test]
    fn inline_slot_compiles_once() {
        let slot = FormulaSlot::inline("a + b");
        let first = slot.get().expect("compiles");
        let second = slot.get().expect("compiles");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn file_slot_reloads_on_mtime_change() {
        use std::io::Write;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("margin.formula");
        std::fs::write(&path, "EURUSD_bid * 1.1").expect("write");

        let slot = FormulaSlot::file(&path);
        let first = slot.get().expect("compiles");
        assert_eq!(first.source(), "EURUSD_bid * 1.1");

        // Rewrite with a bumped mtime so the change is observable.
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut file = std::fs::File::create(&path).expect("recreate");
        file.write_all(b"EURUSD_bid * 1.2").expect("write");
        file.sync_all().expect("sync");
        drop(file);

        let second = slot.get().expect("recompiles");
        assert_eq!(second.source(), "EURUSD_bid * 1.2");
    }
}
