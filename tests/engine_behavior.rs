//! Behavior-driven tests for the stochastic rate engine.
//!
//! These tests verify HOW the engine behaves across cycles: quote
//! invariants, volatility model properties, calendar gating, and regime
//! dynamics.

use ratewire_core::config::{EgarchParams, GarchParams};
use ratewire_core::{Symbol, UtcDateTime};
use ratewire_sim::{egarch_sigma, garch_sigma, StochasticRateEngine, SIGMA_FLOOR};
use ratewire_tests::{base_config_value, config_from};

fn ts(value: &str) -> UtcDateTime {
    UtcDateTime::parse(value).expect("valid timestamp")
}

// =============================================================================
// Volatility models
// =============================================================================

#[test]
fn garch_reproduces_the_reference_calculation() {
    // Given: the documented parameter set
    let params = GarchParams {
        omega: 1e-6,
        alpha: 0.05,
        beta: 0.90,
    };

    // When: updating from r=0.01, sigma=0.02
    let sigma = garch_sigma(&params, 0.01, 0.02);

    // Then: sigma^2 = 1e-6 + 0.05*0.0001 + 0.90*0.0004 = 0.000366
    assert!((sigma * sigma - 0.000366).abs() < 1e-12);
    assert!((sigma - 0.019131).abs() < 1e-6);
}

#[test]
fn garch_sigma_is_real_and_floored_for_all_inputs() {
    let params = GarchParams {
        omega: 1e-6,
        alpha: 0.05,
        beta: 0.90,
    };

    for (last_return, last_sigma) in [
        (0.0, 0.0),
        (-0.5, 0.001),
        (10.0, 100.0),
        (1e-30, 1e-30),
        (-1e6, 1e-20),
    ] {
        let sigma = garch_sigma(&params, last_return, last_sigma);
        assert!(sigma.is_finite(), "r={last_return} s={last_sigma}");
        assert!(sigma >= SIGMA_FLOOR * 0.999, "r={last_return} s={last_sigma}");
    }
}

#[test]
fn egarch_stays_finite_under_stress() {
    let params = EgarchParams {
        omega: -0.1,
        alpha: 0.1,
        beta: 0.97,
        gamma: -0.08,
    };

    for (last_return, last_sigma) in [(0.0, 0.0), (5.0, 1e-8), (-5.0, 1e-8), (0.5, 10.0)] {
        let sigma = egarch_sigma(&params, last_return, last_sigma);
        assert!(sigma.is_finite() && sigma > 0.0, "r={last_return} s={last_sigma}");
    }
}

// =============================================================================
// Quote invariants
// =============================================================================

#[tokio::test]
async fn every_generated_quote_has_positive_bid_below_ask() {
    let mut value = base_config_value();
    value["instruments"] = serde_json::json!([
        value["instruments"][0],
        {
            "symbol": "USDJPY",
            "initial_price": 150.0,
            "drift": -0.01,
            "initial_sigma": 0.2,
            "spread": 0.0003,
            "vol_model": "egarch",
            "garch": {"omega": 1e-6, "alpha": 0.05, "beta": 0.90},
            "egarch": {"omega": -0.1, "alpha": 0.1, "beta": 0.97, "gamma": -0.08},
            "jumps": {"lambda": 50.0, "mean": 0.0, "sigma": 0.01},
            "mean_reversion": {"kappa": 2.0, "theta": 150.0}
        }
    ]);
    value["correlation"] = serde_json::json!([[1.0, -0.3], [-0.3, 1.0]]);

    let mut engine = StochasticRateEngine::with_seed(&config_from(value), 1234);
    let base = ts("2024-01-03T00:00:00Z").into_inner();

    for cycle in 0..2_000u64 {
        let now = UtcDateTime::from_offset_datetime(
            base + std::time::Duration::from_secs(cycle),
        )
        .expect("utc");
        for quote in engine.step(now) {
            assert!(quote.bid > 0.0);
            assert!(quote.ask > quote.bid);
        }
    }
}

// =============================================================================
// Calendar gating
// =============================================================================

#[tokio::test]
async fn price_is_frozen_while_the_market_is_closed() {
    let mut value = base_config_value();
    value["weekend"] = serde_json::json!({
        "close_day": "Friday", "close_hour": 22,
        "open_day": "Sunday", "open_hour": 22
    });
    let mut engine = StochasticRateEngine::with_seed(&config_from(value), 99);
    let eurusd = Symbol::parse("EURUSD").expect("valid");

    engine.step(ts("2024-01-05T20:00:00Z"));
    engine.step(ts("2024-01-05T21:00:00Z"));
    let friday_close = engine.state(&eurusd).expect("state").price;

    // Saturday: several cycles, no movement.
    for minute in 0..30 {
        let now = ts("2024-01-06T10:00:00Z").into_inner()
            + std::time::Duration::from_secs(minute * 60);
        engine.step(UtcDateTime::from_offset_datetime(now).expect("utc"));
    }
    assert_eq!(engine.state(&eurusd).expect("state").price, friday_close);
}

#[tokio::test]
async fn reopening_applies_exactly_one_gap_jump() {
    let mut value = base_config_value();
    value["weekend"] = serde_json::json!({
        "close_day": "Friday", "close_hour": 22,
        "open_day": "Sunday", "open_hour": 22
    });
    // Deterministic gap: sigma 0 means the jump is exactly exp(mean).
    value["weekend_gap"] = serde_json::json!({"mean": 0.02, "sigma": 0.0});

    let mut engine = StochasticRateEngine::with_seed(&config_from(value), 7);
    let eurusd = Symbol::parse("EURUSD").expect("valid");

    engine.step(ts("2024-01-05T21:00:00Z"));
    let before_close = engine.state(&eurusd).expect("state").price;

    engine.step(ts("2024-01-06T10:00:00Z"));
    engine.step(ts("2024-01-07T10:00:00Z"));

    engine.step(ts("2024-01-07T22:00:30Z"));
    let reopened = engine.state(&eurusd).expect("state").price;
    assert!((reopened - before_close * 0.02f64.exp()).abs() < 1e-12);

    // The gap fires once; the next cycle is a normal stochastic step.
    assert!(!engine.state(&eurusd).expect("state").pending_gap);
}

// =============================================================================
// Regime and shock dynamics
// =============================================================================

#[tokio::test]
async fn markov_regimes_change_realized_volatility() {
    // Two configs, identical except the regime table pins everything to
    // a single high-scale (resp. low-scale) regime.
    let volatility_for_scale = |scale: f64| -> f64 {
        let mut value = base_config_value();
        value["regimes"] = serde_json::json!({
            "levels": [{
                "name": "pinned",
                "sigma_scale": scale,
                "min_duration_steps": 1,
                "switch_probability": 0.0
            }]
        });
        let mut engine = StochasticRateEngine::with_seed(&config_from(value), 31);
        let eurusd = Symbol::parse("EURUSD").expect("valid");
        let base = ts("2024-01-03T00:00:00Z").into_inner();

        let mut returns = Vec::new();
        let mut last_price = None::<f64>;
        for cycle in 0..1_000u64 {
            let now = UtcDateTime::from_offset_datetime(
                base + std::time::Duration::from_secs(cycle),
            )
            .expect("utc");
            engine.step(now);
            let price = engine.state(&eurusd).expect("state").price;
            if let Some(previous) = last_price {
                returns.push((price / previous).ln());
            }
            last_price = Some(price);
        }

        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        (returns
            .iter()
            .map(|r| (r - mean) * (r - mean))
            .sum::<f64>()
            / returns.len() as f64)
            .sqrt()
    };

    let calm = volatility_for_scale(0.5);
    let stressed = volatility_for_scale(3.0);
    assert!(
        stressed > calm * 2.0,
        "stressed={stressed} calm={calm}: regime scaling had no effect"
    );
}
