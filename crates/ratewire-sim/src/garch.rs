//! Volatility recursions.
//!
//! Both models operate on the previous cycle's log return and sigma.
//! Variance is floored at `VARIANCE_FLOOR` so sigma stays real and
//! strictly positive for every input.

use ratewire_core::config::{EgarchParams, GarchParams};

/// Lower bound on conditional variance.
pub const VARIANCE_FLOOR: f64 = 1e-16;

/// Lower bound on sigma, the square root of the variance floor.
pub const SIGMA_FLOOR: f64 = 1e-8;

/// E|z| for a standard normal, sqrt(2/pi).
const EXPECTED_ABS_Z: f64 = 0.797_884_560_802_865_4;

/// GARCH(1,1): sigma^2_t = omega + alpha * r^2 + beta * sigma^2_{t-1}.
pub fn garch_sigma(params: &GarchParams, last_return: f64, last_sigma: f64) -> f64 {
    let variance = params.omega
        + params.alpha * last_return * last_return
        + params.beta * last_sigma * last_sigma;
    variance.max(VARIANCE_FLOOR).sqrt()
}

/// EGARCH log-variance recursion with an asymmetry term:
/// ln sigma^2_t = omega + beta * ln sigma^2_{t-1}
///              + alpha * (|z| - E|z|) + gamma * z,  z = r / sigma_{t-1}.
pub fn egarch_sigma(params: &EgarchParams, last_return: f64, last_sigma: f64) -> f64 {
    let sigma = last_sigma.max(SIGMA_FLOOR);
    let z = last_return / sigma;
    let log_variance = params.omega
        + params.beta * (sigma * sigma).ln()
        + params.alpha * (z.abs() - EXPECTED_ABS_Z)
        + params.gamma * z;
    // Clamp the recursion before exponentiating so a degenerate input
    // cannot overflow to infinity.
    let log_variance = log_variance.clamp(VARIANCE_FLOOR.ln(), MAX_LOG_VARIANCE);
    log_variance.exp().max(VARIANCE_FLOOR).sqrt()
}

/// Upper clamp on the EGARCH log-variance recursion.
const MAX_LOG_VARIANCE: f64 = 10.0;
