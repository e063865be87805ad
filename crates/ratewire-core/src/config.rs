//! Configuration model, loading, validation, and hot reload.
//!
//! Configuration is a single JSON document loaded at startup. A load
//! failure at startup is fatal; once running, the [`ConfigWatcher`]
//! re-loads on file change and keeps the previous configuration when the
//! new one fails to load or validate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::calc::{CalcDef, CalcEngineKind, CalcError, CalcSet};
use crate::calendar::{HolidayWindow, WeekendSchedule};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::formula::FormulaSlot;
use crate::{PlatformId, Symbol, UtcDateTime};

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config field '{field}': {reason}")]
    Invalid { field: String, reason: String },
    #[error(transparent)]
    Calc(#[from] CalcError),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Volatility model selection per instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolModel {
    Garch,
    Egarch,
}

/// GARCH(1,1) parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GarchParams {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
}

/// EGARCH parameters (log-variance recursion with asymmetry).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EgarchParams {
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

/// Ornstein-Uhlenbeck mean reversion in log-price space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanReversionParams {
    /// Reversion speed kappa.
    pub kappa: f64,
    /// Long-run level theta (price units).
    pub theta: f64,
}

/// Poisson jump-diffusion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JumpParams {
    /// Annualized jump intensity.
    pub lambda: f64,
    /// Mean log-jump size.
    pub mean: f64,
    /// Log-jump volatility.
    pub sigma: f64,
}

/// One simulated instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub symbol: Symbol,
    pub initial_price: f64,
    /// Annualized drift.
    #[serde(default)]
    pub drift: f64,
    /// Initial per-step volatility.
    pub initial_sigma: f64,
    /// Base half-spread as a fraction of price.
    pub spread: f64,
    /// Expected ticks per day, drives pseudo-random volume accumulation.
    #[serde(default = "default_expected_volume")]
    pub expected_volume: f64,
    #[serde(default = "default_vol_model")]
    pub vol_model: VolModel,
    pub garch: GarchParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egarch: Option<EgarchParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_reversion: Option<MeanReversionParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jumps: Option<JumpParams>,
    /// Macro/news sensitivity factor; scales macro drift and sigma
    /// adjustments for this instrument. Zero disables.
    #[serde(default)]
    pub macro_sensitivity: f64,
}

fn default_expected_volume() -> f64 {
    10_000.0
}

fn default_vol_model() -> VolModel {
    VolModel::Garch
}

/// One volatility regime level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeLevel {
    pub name: String,
    pub sigma_scale: f64,
    /// Minimum steps before a probabilistic switch is considered.
    pub min_duration_steps: u32,
    /// Per-step switch probability once the minimum duration has passed.
    pub switch_probability: f64,
}

/// Regime switching configuration: either minimum-duration probabilistic
/// switching over the levels, or a Markov transition matrix.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegimeConfig {
    #[serde(default)]
    pub levels: Vec<RegimeLevel>,
    /// Optional row-stochastic transition matrix, one row per level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markov: Option<Vec<Vec<f64>>>,
}

/// Session volatility multiplier for an hour-of-day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start_hour: u8,
    pub end_hour: u8,
    pub sigma_scale: f64,
}

/// Macro environment adjustment applied to sensitive instruments.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacroConfig {
    pub drift_adjustment: f64,
    pub sigma_scale: f64,
}

/// Probability and magnitude band for one shock size class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShockBand {
    /// Per-cycle activation probability.
    pub probability: f64,
    pub min_magnitude: f64,
    pub max_magnitude: f64,
}

/// Probabilistic shock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShockConfig {
    pub small: ShockBand,
    pub medium: ShockBand,
    pub big: ShockBand,
    /// Geometric decay factor applied to the shock level each cycle.
    pub decay: f64,
    /// Cycles a shock stays active before expiring.
    pub duration_steps: u32,
}

impl Default for ShockConfig {
    fn default() -> Self {
        Self {
            small: ShockBand {
                probability: 0.01,
                min_magnitude: 1.2,
                max_magnitude: 1.5,
            },
            medium: ShockBand {
                probability: 0.003,
                min_magnitude: 1.5,
                max_magnitude: 2.5,
            },
            big: ShockBand {
                probability: 0.0005,
                min_magnitude: 2.5,
                max_magnitude: 5.0,
            },
            decay: 0.9,
            duration_steps: 30,
        }
    }
}

/// One scheduled event shock: a one-shot Gaussian jump applied within
/// +/- 30 seconds of `at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventShock {
    pub at: UtcDateTime,
    /// Affected symbols; empty = all instruments.
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    pub mean: f64,
    pub sigma: f64,
}

/// Weekend gap jump parameters applied on the first open cycle after a
/// closed period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapConfig {
    pub mean: f64,
    pub sigma: f64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            mean: 0.0,
            sigma: 0.003,
        }
    }
}

/// One derived rate definition as configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcConfig {
    pub name: String,
    #[serde(default = "default_calc_engine")]
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid_formula_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask_formula_file: Option<PathBuf>,
    #[serde(default)]
    pub constants: HashMap<String, f64>,
    pub depends_on: Vec<Symbol>,
}

fn default_calc_engine() -> String {
    "arithmetic".to_owned()
}

/// Adapter kind and connection settings for one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberSpec {
    /// Registry kind: `simulation`, `tcp`, or `rest`.
    pub kind: String,
    pub platform: PlatformId,
    /// Remote endpoint (`host:port` for tcp, URL for rest). Unused by
    /// the simulation kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Symbols to subscribe to on remote feeds.
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    /// Poll interval for the rest kind.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

/// Distribution server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Per-session outbound queue depth before the session is treated as
    /// dead.
    #[serde(default = "default_session_queue")]
    pub session_queue: usize,
}

fn default_bind() -> String {
    "127.0.0.1:5050".to_owned()
}

fn default_max_connections() -> usize {
    256
}

fn default_session_queue() -> usize {
    512
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_connections: default_max_connections(),
            session_queue: default_session_queue(),
        }
    }
}

/// Supervisor and circuit-breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_breaker_window")]
    pub breaker_window: usize,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_failure_rate: f64,
    #[serde(default = "default_breaker_min_calls")]
    pub breaker_min_calls: usize,
    #[serde(default = "default_breaker_open_secs")]
    pub breaker_open_secs: u64,
}

fn default_check_interval_ms() -> u64 {
    5_000
}

fn default_breaker_window() -> usize {
    10
}

fn default_breaker_threshold() -> f64 {
    0.5
}

fn default_breaker_min_calls() -> usize {
    4
}

fn default_breaker_open_secs() -> u64 {
    30
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: default_check_interval_ms(),
            breaker_window: default_breaker_window(),
            breaker_failure_rate: default_breaker_threshold(),
            breaker_min_calls: default_breaker_min_calls(),
            breaker_open_secs: default_breaker_open_secs(),
        }
    }
}

impl SupervisorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(100))
    }

    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            window_size: self.breaker_window,
            failure_rate_threshold: self.breaker_failure_rate,
            min_calls: self.breaker_min_calls,
            open_timeout: Duration::from_secs(self.breaker_open_secs),
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatewireConfig {
    /// Simulation cycle interval in milliseconds.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    /// Maximum number of simulation cycles; 0 = unbounded.
    #[serde(default)]
    pub max_updates: u64,
    pub instruments: Vec<InstrumentConfig>,
    /// Correlation matrix over `instruments`, in declaration order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub sessions: Vec<SessionWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macro_env: Option<MacroConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekend: Option<WeekendSchedule>,
    #[serde(default)]
    pub holidays: Vec<HolidayWindow>,
    #[serde(default)]
    pub weekend_gap: GapConfig,
    #[serde(default)]
    pub regimes: RegimeConfig,
    #[serde(default)]
    pub shocks: ShockConfig,
    #[serde(default)]
    pub events: Vec<EventShock>,
    #[serde(default)]
    pub calcs: Vec<CalcConfig>,
    #[serde(default)]
    pub subscribers: Vec<SubscriberSpec>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

fn default_update_interval_ms() -> u64 {
    1_000
}

impl RatewireConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate from a JSON string.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(1))
    }

    /// Cross-field validation. Field names in errors refer to the JSON
    /// document paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() && self.subscribers.iter().any(|s| s.kind == "simulation") {
            return Err(ConfigError::invalid(
                "instruments",
                "simulation subscriber configured but no instruments defined",
            ));
        }

        for (index, instrument) in self.instruments.iter().enumerate() {
            let field = |name: &str| format!("instruments[{index}].{name}");
            if instrument.initial_price <= 0.0 {
                return Err(ConfigError::invalid(field("initial_price"), "must be > 0"));
            }
            if instrument.initial_sigma <= 0.0 {
                return Err(ConfigError::invalid(field("initial_sigma"), "must be > 0"));
            }
            if instrument.spread <= 0.0 {
                return Err(ConfigError::invalid(field("spread"), "must be > 0"));
            }
            let garch = &instrument.garch;
            if garch.omega <= 0.0 || garch.alpha < 0.0 || garch.beta < 0.0 {
                return Err(ConfigError::invalid(
                    field("garch"),
                    "omega must be > 0 and alpha/beta >= 0",
                ));
            }
            if garch.alpha + garch.beta >= 1.0 {
                return Err(ConfigError::invalid(
                    field("garch"),
                    "alpha + beta must be < 1 for a stationary process",
                ));
            }
            if instrument.vol_model == VolModel::Egarch && instrument.egarch.is_none() {
                return Err(ConfigError::invalid(
                    field("egarch"),
                    "egarch parameters required when vol_model is egarch",
                ));
            }
        }

        if let Some(matrix) = &self.correlation {
            let n = self.instruments.len();
            if matrix.len() != n {
                return Err(ConfigError::invalid(
                    "correlation",
                    format!("matrix has {} rows, expected {n}", matrix.len()),
                ));
            }
            for (i, row) in matrix.iter().enumerate() {
                if row.len() != n {
                    return Err(ConfigError::invalid(
                        format!("correlation[{i}]"),
                        format!("row has {} entries, expected {n}", row.len()),
                    ));
                }
                if (row[i] - 1.0).abs() > 1e-9 {
                    return Err(ConfigError::invalid(
                        format!("correlation[{i}][{i}]"),
                        "diagonal entries must be 1",
                    ));
                }
                for (j, value) in row.iter().enumerate() {
                    if (*value - matrix[j][i]).abs() > 1e-9 {
                        return Err(ConfigError::invalid(
                            format!("correlation[{i}][{j}]"),
                            "matrix must be symmetric",
                        ));
                    }
                    if !(-1.0..=1.0).contains(value) {
                        return Err(ConfigError::invalid(
                            format!("correlation[{i}][{j}]"),
                            "entries must be within [-1, 1]",
                        ));
                    }
                }
            }
        }

        for (index, session) in self.sessions.iter().enumerate() {
            if session.start_hour > 23 || session.end_hour > 24 {
                return Err(ConfigError::invalid(
                    format!("sessions[{index}]"),
                    "hours must be within 0..=23 (end up to 24)",
                ));
            }
            if session.sigma_scale <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("sessions[{index}].sigma_scale"),
                    "must be > 0",
                ));
            }
        }

        if let Some(markov) = &self.regimes.markov {
            let n = self.regimes.levels.len();
            if n == 0 {
                return Err(ConfigError::invalid(
                    "regimes.levels",
                    "markov matrix configured but no regime levels defined",
                ));
            }
            if markov.len() != n {
                return Err(ConfigError::invalid(
                    "regimes.markov",
                    format!("matrix has {} rows, expected {n}", markov.len()),
                ));
            }
            for (i, row) in markov.iter().enumerate() {
                if row.len() != n {
                    return Err(ConfigError::invalid(
                        format!("regimes.markov[{i}]"),
                        format!("row has {} entries, expected {n}", row.len()),
                    ));
                }
                let sum: f64 = row.iter().sum();
                if (sum - 1.0).abs() > 1e-6 || row.iter().any(|p| *p < 0.0) {
                    return Err(ConfigError::invalid(
                        format!("regimes.markov[{i}]"),
                        "rows must be non-negative and sum to 1",
                    ));
                }
            }
        }

        for (index, level) in self.regimes.levels.iter().enumerate() {
            if level.sigma_scale <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("regimes.levels[{index}].sigma_scale"),
                    "must be > 0",
                ));
            }
            if !(0.0..=1.0).contains(&level.switch_probability) {
                return Err(ConfigError::invalid(
                    format!("regimes.levels[{index}].switch_probability"),
                    "must be within [0, 1]",
                ));
            }
        }

        if !(0.0..1.0).contains(&self.shocks.decay) {
            return Err(ConfigError::invalid(
                "shocks.decay",
                "must be within [0, 1)",
            ));
        }

        for (index, spec) in self.subscribers.iter().enumerate() {
            match spec.kind.as_str() {
                "simulation" => {}
                "tcp" | "rest" => {
                    if spec.endpoint.as_deref().unwrap_or("").is_empty() {
                        return Err(ConfigError::invalid(
                            format!("subscribers[{index}].endpoint"),
                            format!("required for kind '{}'", spec.kind),
                        ));
                    }
                    if spec.symbols.is_empty() {
                        return Err(ConfigError::invalid(
                            format!("subscribers[{index}].symbols"),
                            format!("required for kind '{}'", spec.kind),
                        ));
                    }
                }
                other => {
                    return Err(ConfigError::invalid(
                        format!("subscribers[{index}].kind"),
                        format!("unknown subscriber kind '{other}'"),
                    ));
                }
            }
        }

        if self.server.max_connections == 0 {
            return Err(ConfigError::invalid(
                "server.max_connections",
                "must be > 0",
            ));
        }

        // Calc definitions validate by construction (formula compile +
        // token satisfiability).
        self.build_calc_set()?;

        Ok(())
    }

    /// Materialize the configured calc definitions into a validated set.
    pub fn build_calc_set(&self) -> Result<CalcSet, ConfigError> {
        let mut calcs = Vec::with_capacity(self.calcs.len());
        for calc in &self.calcs {
            let engine = CalcEngineKind::parse(&calc.name, &calc.engine)?;
            let bid = formula_slot(&calc.name, "bid", &calc.bid_formula, &calc.bid_formula_file)?;
            let ask = formula_slot(&calc.name, "ask", &calc.ask_formula, &calc.ask_formula_file)?;
            calcs.push(CalcDef::new(
                calc.name.clone(),
                engine,
                bid,
                ask,
                calc.constants.clone(),
                calc.depends_on.clone(),
            )?);
        }
        Ok(CalcSet::new(calcs))
    }

    /// Symbols the simulation engine produces.
    pub fn simulated_symbols(&self) -> Vec<Symbol> {
        self.instruments
            .iter()
            .map(|instrument| instrument.symbol.clone())
            .collect()
    }
}

fn formula_slot(
    calc: &str,
    side: &str,
    inline: &Option<String>,
    file: &Option<PathBuf>,
) -> Result<FormulaSlot, ConfigError> {
    match (inline, file) {
        (Some(source), None) => Ok(FormulaSlot::inline(source.clone())),
        (None, Some(path)) => Ok(FormulaSlot::file(path.clone())),
        (Some(_), Some(_)) => Err(ConfigError::invalid(
            format!("calcs.{calc}.{side}_formula"),
            "specify either inline formula or formula file, not both",
        )),
        (None, None) => Err(ConfigError::invalid(
            format!("calcs.{calc}.{side}_formula"),
            "missing formula",
        )),
    }
}

/// Polling configuration watcher.
///
/// Change detection is by file modification time on a fixed interval,
/// the portable fallback that works on every platform and filesystem. A
/// reload that fails to parse or validate keeps the previous
/// configuration and logs a warning.
pub struct ConfigWatcher {
    path: PathBuf,
    poll_interval: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    /// Spawn the watch loop. The returned receiver yields the current
    /// configuration and updates on every successful reload; the loop
    /// stops when `shutdown` flips to true.
    pub fn spawn(
        self,
        initial: Arc<RatewireConfig>,
        mut shutdown: watch::Receiver<bool>,
    ) -> (
        watch::Receiver<Arc<RatewireConfig>>,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = watch::channel(initial);

        let handle = tokio::spawn(async move {
            let mut last_modified = modification_time(&self.path);

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }

                let modified = modification_time(&self.path);
                if modified == last_modified {
                    continue;
                }
                last_modified = modified;

                match RatewireConfig::load(&self.path) {
                    Ok(config) => {
                        info!(path = %self.path.display(), "configuration reloaded");
                        let _ = tx.send(Arc::new(config));
                    }
                    Err(error) => {
                        warn!(
                            path = %self.path.display(),
                            %error,
                            "configuration reload failed, keeping previous"
                        );
                    }
                }
            }
        });

        (rx, handle)
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> serde_json::Value {
        serde_json::json!({
            "instruments": [{
                "symbol": "EURUSD",
                "initial_price": 1.2,
                "initial_sigma": 0.02,
                "spread": 0.0001,
                "garch": {"omega": 1e-6, "alpha": 0.05, "beta": 0.90}
            }],
            "subscribers": [{"kind": "simulation", "platform": "sim"}]
        })
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config =
            RatewireConfig::from_json(&minimal_config().to_string()).expect("valid config");
        assert_eq!(config.update_interval_ms, 1_000);
        assert_eq!(config.max_updates, 0);
        assert_eq!(config.server.max_connections, 256);
        assert_eq!(config.instruments.len(), 1);
    }

    #[test]
    fn rejects_nonstationary_garch() {
        let mut value = minimal_config();
        value["instruments"][0]["garch"]["beta"] = serde_json::json!(0.96);
        let err = RatewireConfig::from_json(&value.to_string()).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err:?}");
    }

    #[test]
    fn rejects_asymmetric_correlation() {
        let mut value = minimal_config();
        value["instruments"] = serde_json::json!([
            value["instruments"][0],
            {
                "symbol": "GBPUSD",
                "initial_price": 1.27,
                "initial_sigma": 0.02,
                "spread": 0.0001,
                "garch": {"omega": 1e-6, "alpha": 0.05, "beta": 0.90}
            }
        ]);
        value["correlation"] = serde_json::json!([[1.0, 0.5], [0.4, 1.0]]);
        let err = RatewireConfig::from_json(&value.to_string()).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_unknown_subscriber_kind() {
        let mut value = minimal_config();
        value["subscribers"] = serde_json::json!([{"kind": "reflection", "platform": "x"}]);
        let err = RatewireConfig::from_json(&value.to_string()).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_remote_subscriber_without_endpoint() {
        let mut value = minimal_config();
        value["subscribers"] = serde_json::json!([
            {"kind": "tcp", "platform": "upstream", "symbols": ["EURUSD"]}
        ]);
        let err = RatewireConfig::from_json(&value.to_string()).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_calc_with_unsatisfiable_tokens() {
        let mut value = minimal_config();
        value["calcs"] = serde_json::json!([{
            "name": "X",
            "bid_formula": "GBPUSD_bid*1.1",
            "ask_formula": "GBPUSD_ask*1.1",
            "depends_on": ["EURUSD"]
        }]);
        let err = RatewireConfig::from_json(&value.to_string()).expect_err("must fail");
        assert!(matches!(err, ConfigError::Calc(_)));
    }

    #[test]
    fn rejects_bad_markov_rows() {
        let mut value = minimal_config();
        value["regimes"] = serde_json::json!({
            "levels": [
                {"name": "low", "sigma_scale": 0.7, "min_duration_steps": 10, "switch_probability": 0.05},
                {"name": "high", "sigma_scale": 1.8, "min_duration_steps": 10, "switch_probability": 0.05}
            ],
            "markov": [[0.9, 0.2], [0.1, 0.9]]
        });
        let err = RatewireConfig::from_json(&value.to_string()).expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[tokio::test]
    async fn watcher_reloads_on_change_and_keeps_previous_on_bad_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ratewire.json");
        std::fs::write(&path, minimal_config().to_string()).expect("write");

        let initial = Arc::new(RatewireConfig::load(&path).expect("valid config"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watcher = ConfigWatcher::new(&path, Duration::from_millis(20));
        let (mut rx, handle) = watcher.spawn(initial, shutdown_rx);

        // Valid update is picked up.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let mut updated = minimal_config();
        updated["update_interval_ms"] = serde_json::json!(250);
        std::fs::write(&path, updated.to_string()).expect("write");

        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("reload observed")
            .expect("watcher alive");
        assert_eq!(rx.borrow().update_interval_ms, 250);

        // Broken update keeps the previous configuration.
        tokio::time::sleep(Duration::from_millis(30)).await;
        std::fs::write(&path, "{ not json").expect("write");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rx.borrow().update_interval_ms, 250);

        shutdown_tx.send(true).expect("signal shutdown");
        handle.await.expect("watcher stops");
    }
}
