//! Standard normal helpers shared by the pricing and delta modules.

use statrs::function::erf::{erf_inv, erfc};

const SQRT_2: f64 = std::f64::consts::SQRT_2;

/// Standard normal cumulative distribution function `Φ(x)`.
pub(crate) fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Standard normal density `φ(x)`.
pub(crate) fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Inverse standard normal CDF `Φ⁻¹(p)` for `p` in `(0, 1)`.
pub(crate) fn normal_inv_cdf(p: f64) -> f64 {
    SQRT_2 * erf_inv(2.0 * p - 1.0)
}
