//! SVI (Stochastic Volatility Inspired) smile model.
//!
//! The SVI parameterization models total implied variance as:
//!
//! ```text
//! w(k) = a + b·[ρ(k − m) + √((k − m)² + σ²)]
//! ```
//!
//! where `k = ln(K/F)` is log-moneyness and `(a, b, ρ, m, σ)` are the five
//! SVI parameters.
//!
//! # References
//! - Gatheral, J. "The Volatility Surface: A Practitioner's Guide" (2006)
//! - Gatheral, J. & Jacquier, A. "Arbitrage-free SVI Volatility Surfaces" (2014)
//! - Zeliade Systems, "Quasi-Explicit Calibration of Gatheral's SVI Model" (2009)

use serde::{Deserialize, Serialize};

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use crate::error::{self, FxVolError};
use crate::math::normal_pdf;
use crate::optim::{self, Termination};
use crate::smile::arbitrage::{ArbitrageReport, ButterflyViolation};
use crate::smile::SmileSection;
use crate::types::Vol;
use crate::validate::validate_positive;

/// Optional pins for individual SVI parameters during a fit.
///
/// A `Some` value removes that parameter from the optimization and holds it
/// fixed. Pinned `(a, b, ρ)` shrink the inner linear solve; pinned `(m, σ)`
/// shrink the outer simplex search.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SviFixedParams {
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub rho: Option<f64>,
    pub m: Option<f64>,
    pub sigma: Option<f64>,
}

/// Options controlling [`SviSmile::fit`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SviFitOptions {
    /// Weight residuals by Black vega, emphasizing near-ATM quotes.
    pub vega_weighted: bool,
    /// Parameters held fixed during the fit.
    pub fixed: SviFixedParams,
}

impl Default for SviFitOptions {
    fn default() -> Self {
        SviFitOptions {
            vega_weighted: true,
            fixed: SviFixedParams::default(),
        }
    }
}

/// Diagnostics of a completed fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SviFitReport {
    /// Root-mean-square error in vol space over the input quotes.
    pub rms_error: f64,
    /// Largest absolute error in vol space over the input quotes.
    pub max_error: f64,
    /// Stopping condition of the simplex search; `None` when every outer
    /// parameter was pinned and no iterative search ran.
    pub termination: Option<Termination>,
}

/// SVI volatility smile with 5 parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SviSmileRaw", into = "SviSmileRaw")]
pub struct SviSmile {
    forward: f64,
    expiry: f64,
    /// Minimum variance level.
    a: f64,
    /// Variance slope (controls skew magnitude).
    b: f64,
    /// Skew direction ρ ∈ \[−1, 1\].
    rho: f64,
    /// Moneyness shift.
    m: f64,
    /// Curvature (smile convexity).
    sigma: f64,
    min_strike: f64,
    max_strike: f64,
    report: Option<SviFitReport>,
}

#[derive(Serialize, Deserialize)]
struct SviSmileRaw {
    forward: f64,
    expiry: f64,
    a: f64,
    b: f64,
    rho: f64,
    m: f64,
    sigma: f64,
}

impl TryFrom<SviSmileRaw> for SviSmile {
    type Error = FxVolError;
    fn try_from(raw: SviSmileRaw) -> Result<Self, Self::Error> {
        Self::new(
            raw.forward,
            raw.expiry,
            raw.a,
            raw.b,
            raw.rho,
            raw.m,
            raw.sigma,
        )
    }
}

impl From<SviSmile> for SviSmileRaw {
    fn from(s: SviSmile) -> Self {
        Self {
            forward: s.forward,
            expiry: s.expiry,
            a: s.a,
            b: s.b,
            rho: s.rho,
            m: s.m,
            sigma: s.sigma,
        }
    }
}

/// Result of the inner linear solve for fixed (m, σ).
struct LinearFit {
    a: f64,
    b: f64,
    rho: f64,
    rss: f64,
}

impl SviSmile {
    /// Create an SVI smile from known parameters.
    ///
    /// Validates the Gatheral-Jacquier no-arbitrage conditions:
    /// - `b ≥ 0` (non-negative slope)
    /// - `|ρ| < 1` (strict)
    /// - `σ > 0` (positive curvature)
    /// - `a + bσ√(1 − ρ²) ≥ 0` (non-negative minimum variance)
    ///
    /// # Errors
    /// Returns [`FxVolError::InvalidInput`] if parameters violate these
    /// conditions or if forward/expiry are non-positive.
    pub fn new(
        forward: f64,
        expiry: f64,
        a: f64,
        b: f64,
        rho: f64,
        m: f64,
        sigma: f64,
    ) -> error::Result<Self> {
        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        if b < 0.0 || b.is_nan() {
            return Err(FxVolError::InvalidInput {
                message: format!("b must be non-negative, got {b}"),
            });
        }
        if rho.abs() >= 1.0 || rho.is_nan() {
            return Err(FxVolError::InvalidInput {
                message: format!("|rho| must be less than 1, got {rho}"),
            });
        }
        if sigma <= 0.0 || sigma.is_nan() {
            return Err(FxVolError::InvalidInput {
                message: format!("sigma must be positive, got {sigma}"),
            });
        }
        if !m.is_finite() {
            return Err(FxVolError::InvalidInput {
                message: format!("m must be finite, got {m}"),
            });
        }
        if !a.is_finite() {
            return Err(FxVolError::InvalidInput {
                message: format!("a must be finite, got {a}"),
            });
        }
        let min_variance = a + b * sigma * (1.0 - rho * rho).sqrt();
        if min_variance < 0.0 || min_variance.is_nan() {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "minimum variance is negative: a + b*sigma*sqrt(1-rho^2) = {min_variance}"
                ),
            });
        }

        Ok(Self {
            forward,
            expiry,
            a,
            b,
            rho,
            m,
            sigma,
            min_strike: 0.0,
            max_strike: f64::INFINITY,
            report: None,
        })
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn m(&self) -> f64 {
        self.m
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Fit diagnostics; `None` for smiles built directly from parameters.
    pub fn fit_report(&self) -> Option<&SviFitReport> {
        self.report.as_ref()
    }

    /// Calibrate SVI parameters to market strike/vol quotes.
    ///
    /// Uses the Zeliade (2009) quasi-explicit method: for fixed (m, σ), the
    /// remaining parameters (a, b·ρ, b) enter linearly and are solved via
    /// least-squares; a grid search plus Nelder-Mead optimizes (m, σ).
    /// With only three quotes the inner solve is exactly determined, which is
    /// the minimum an FX smile row provides.
    ///
    /// # Errors
    /// Returns [`FxVolError::InvalidInput`] for insufficient data,
    /// [`FxVolError::CalibrationError`] if no valid parameter set is found.
    pub fn fit(
        forward: f64,
        expiry: f64,
        strikes: &[f64],
        vols: &[f64],
        options: &SviFitOptions,
    ) -> error::Result<Self> {
        #[cfg(feature = "logging")]
        tracing::debug!(
            forward,
            expiry,
            n_quotes = strikes.len(),
            "SVI calibration started"
        );

        /// Minimum market quotes: (a, bρ, b) need three equations.
        const MIN_POINTS: usize = 3;
        /// Grid search resolution for (m, sigma) initialization.
        const GRID_N: usize = 15;
        /// Nelder-Mead iteration limit.
        const NM_MAX_ITER: usize = 300;
        /// Simplex diameter convergence threshold.
        const NM_DIAMETER_TOL: f64 = 1e-8;
        /// Objective value spread convergence threshold.
        const NM_FVALUE_TOL: f64 = 1e-12;

        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        if strikes.len() != vols.len() {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "got {} strikes but {} vols",
                    strikes.len(),
                    vols.len()
                ),
            });
        }
        if strikes.len() < MIN_POINTS {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "at least {MIN_POINTS} market points required, got {}",
                    strikes.len()
                ),
            });
        }
        for (&strike, &vol) in strikes.iter().zip(vols) {
            validate_positive(strike, "strike")?;
            validate_positive(vol, "implied vol")?;
        }

        let fixed = options.fixed;

        // Log-moneyness / total-variance coordinates
        let k_vals: Vec<f64> = strikes.iter().map(|&s| (s / forward).ln()).collect();
        let w_vals: Vec<f64> = vols.iter().map(|&v| v * v * expiry).collect();

        // Vega weights emphasize the quotes that matter for hedging; uniform
        // weights otherwise.
        let sqrt_t = expiry.sqrt();
        let weights: Vec<f64> = if options.vega_weighted {
            let raw: Vec<f64> = k_vals
                .iter()
                .zip(vols)
                .map(|(&k, &v)| {
                    let d1 = (-k + 0.5 * v * v * expiry) / (v * sqrt_t);
                    (forward * normal_pdf(d1) * sqrt_t).max(1e-12)
                })
                .collect();
            let total: f64 = raw.iter().sum();
            raw.iter().map(|w| w / total).collect()
        } else {
            vec![1.0 / k_vals.len() as f64; k_vals.len()]
        };

        let k_min = k_vals.iter().cloned().fold(f64::INFINITY, f64::min);
        let k_max = k_vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let k_range = (k_max - k_min).max(0.1);

        let solve = |m: f64, sigma: f64| inner_solve(&k_vals, &w_vals, &weights, m, sigma, &fixed);

        // Objective: weighted RSS with penalties for invalid params
        let objective = |m: f64, sigma: f64| -> f64 {
            if sigma <= 0.0 {
                return f64::MAX;
            }
            match solve(m, sigma) {
                None => f64::MAX,
                Some(fit) => {
                    if fit.b < -1e-10 || fit.rho.abs() > 0.999 {
                        return f64::MAX;
                    }
                    let b = fit.b.max(0.0);
                    let min_var = fit.a + b * sigma * (1.0 - fit.rho * fit.rho).sqrt();
                    if min_var < -1e-10 {
                        return f64::MAX;
                    }
                    fit.rss
                }
            }
        };

        // Grid search over the free outer parameters
        let m_lo = k_min - 0.5 * k_range;
        let m_hi = k_max + 0.5 * k_range;
        let sigma_lo = 0.01_f64;
        let sigma_hi = k_range.max(0.5);

        let m_candidates: Vec<f64> = match fixed.m {
            Some(m) => vec![m],
            None => (0..GRID_N)
                .map(|i| m_lo + (m_hi - m_lo) * (i as f64) / ((GRID_N - 1) as f64))
                .collect(),
        };
        let sigma_candidates: Vec<f64> = match fixed.sigma {
            Some(s) => vec![s],
            None => (0..GRID_N)
                .map(|i| sigma_lo + (sigma_hi - sigma_lo) * (i as f64) / ((GRID_N - 1) as f64))
                .collect(),
        };

        let mut best_m = fixed.m.unwrap_or(0.0);
        let mut best_sigma = fixed.sigma.unwrap_or(0.1);
        let mut best_rss = f64::MAX;
        for &m in &m_candidates {
            for &sigma in &sigma_candidates {
                let rss = objective(m, sigma);
                if rss < best_rss {
                    best_rss = rss;
                    best_m = m;
                    best_sigma = sigma;
                }
            }
        }

        if best_rss >= f64::MAX {
            return Err(FxVolError::CalibrationError {
                message: "grid search found no valid starting point".into(),
                model: "SVI",
                rms_error: None,
            });
        }

        // Nelder-Mead over whichever of (m, sigma) is free
        let step_m = (m_hi - m_lo) / (GRID_N as f64) * 0.5;
        let step_s = ((sigma_hi - sigma_lo) / (GRID_N as f64) * 0.5).max(0.001);
        let nm_config = optim::NelderMeadConfig {
            max_iter: NM_MAX_ITER,
            diameter_tol: NM_DIAMETER_TOL,
            fvalue_tol: NM_FVALUE_TOL,
        };

        let mut x0 = Vec::new();
        let mut steps = Vec::new();
        if fixed.m.is_none() {
            x0.push(best_m);
            steps.push(step_m);
        }
        if fixed.sigma.is_none() {
            x0.push(best_sigma);
            steps.push(step_s);
        }

        let (opt_m, opt_sigma, termination) = if x0.is_empty() {
            (best_m, best_sigma, None)
        } else {
            let unpack = |x: &[f64]| -> (f64, f64) {
                let mut iter = x.iter();
                let m = fixed.m.unwrap_or_else(|| iter.next().copied().unwrap_or(best_m));
                let sigma = fixed
                    .sigma
                    .unwrap_or_else(|| iter.next().copied().unwrap_or(best_sigma));
                (m, sigma)
            };
            let nm_result = optim::nelder_mead(
                |x| {
                    let (m, sigma) = unpack(x);
                    objective(m, sigma)
                },
                &x0,
                &steps,
                &nm_config,
            );
            let (m, sigma) = unpack(&nm_result.x);
            (m, sigma, Some(nm_result.termination))
        };

        let fit = solve(opt_m, opt_sigma).ok_or_else(|| FxVolError::CalibrationError {
            message: "linear solve failed at optimal (m, sigma)".into(),
            model: "SVI",
            rms_error: None,
        })?;

        let b = fit.b.max(0.0);
        let rho = fit.rho.clamp(-0.999, 0.999);

        #[cfg(feature = "logging")]
        tracing::debug!(
            a = fit.a,
            b,
            rho,
            m = opt_m,
            sigma = opt_sigma,
            "SVI calibration complete"
        );

        let mut smile = Self::new(forward, expiry, fit.a, b, rho, opt_m, opt_sigma.max(1e-6))
            .map_err(|e| FxVolError::CalibrationError {
                message: format!("calibrated params invalid: {e}"),
                model: "SVI",
                rms_error: None,
            })?;

        // Fit errors in vol space
        let mut sum_sq = 0.0;
        let mut max_error = 0.0_f64;
        for (&k, &v) in k_vals.iter().zip(vols) {
            let w = smile.total_variance_at_k(k).max(0.0);
            let err = (w / expiry).sqrt() - v;
            sum_sq += err * err;
            max_error = max_error.max(err.abs());
        }
        let rms_error = (sum_sq / k_vals.len() as f64).sqrt();

        smile.min_strike = strikes.iter().cloned().fold(f64::INFINITY, f64::min);
        smile.max_strike = strikes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        smile.report = Some(SviFitReport {
            rms_error,
            max_error,
            termination,
        });
        Ok(smile)
    }

    /// Evaluate the raw SVI total variance w(k) at log-moneyness k.
    ///
    /// ```text
    /// w(k) = a + b·[ρ(k − m) + √((k − m)² + σ²)]
    /// ```
    pub(crate) fn total_variance_at_k(&self, k: f64) -> f64 {
        let dk = k - self.m;
        self.a + self.b * (self.rho * dk + (dk * dk + self.sigma * self.sigma).sqrt())
    }

    /// First derivative of total variance: w'(k) = b·[ρ + (k−m)/√((k−m)² + σ²)].
    fn w_prime(&self, k: f64) -> f64 {
        let dk = k - self.m;
        let r = (dk * dk + self.sigma * self.sigma).sqrt();
        self.b * (self.rho + dk / r)
    }

    /// Second derivative of total variance: w''(k) = b·σ²/((k−m)² + σ²)^(3/2).
    fn w_double_prime(&self, k: f64) -> f64 {
        let dk = k - self.m;
        let r2 = dk * dk + self.sigma * self.sigma;
        self.b * self.sigma * self.sigma / (r2 * r2.sqrt())
    }

    /// Gatheral g-function for butterfly arbitrage detection.
    ///
    /// g(k) ≥ 0 everywhere implies no butterfly arbitrage.
    ///
    /// # Reference
    /// Gatheral & Jacquier (2014), Definition 4.1.
    fn g_function(&self, k: f64) -> f64 {
        let w = self.total_variance_at_k(k);
        if w <= 0.0 {
            return f64::NEG_INFINITY;
        }
        let wp = self.w_prime(k);
        let wpp = self.w_double_prime(k);
        let term1 = 1.0 - k * wp / (2.0 * w);
        term1 * term1 - wp * wp / 4.0 * (1.0 / w + 0.25) + wpp / 2.0
    }
}

/// Solve the inner weighted least-squares problem for fixed (m, σ).
///
/// Free coefficients among (a, b·ρ, b) form the design matrix; pinned
/// coefficients move to the right-hand side. Rows are scaled by the square
/// root of their weight.
fn inner_solve(
    k_vals: &[f64],
    w_vals: &[f64],
    weights: &[f64],
    m: f64,
    sigma: f64,
    fixed: &SviFixedParams,
) -> Option<LinearFit> {
    let n = k_vals.len();
    let a_free = fixed.a.is_none();

    // Column layout after the optional intercept: either (bρ, b), or a single
    // combined/slope column when one of b, ρ is pinned.
    #[derive(Clone, Copy)]
    enum Block {
        BRhoAndB,
        BGivenRho(f64),
        RhoGivenB(f64),
        Neither { b: f64, rho: f64 },
    }
    let block = match (fixed.b, fixed.rho) {
        (None, None) => Block::BRhoAndB,
        (None, Some(rho)) => Block::BGivenRho(rho),
        (Some(b), None) => Block::RhoGivenB(b),
        (Some(b), Some(rho)) => Block::Neither { b, rho },
    };
    let n_cols = usize::from(a_free)
        + match block {
            Block::BRhoAndB => 2,
            Block::BGivenRho(_) | Block::RhoGivenB(_) => 1,
            Block::Neither { .. } => 0,
        };

    let row = |i: usize| -> (Vec<f64>, f64) {
        let dk = k_vals[i] - m;
        let root = (dk * dk + sigma * sigma).sqrt();
        let mut cols = Vec::with_capacity(n_cols);
        let mut rhs = w_vals[i];
        if a_free {
            cols.push(1.0);
        } else if let Some(a) = fixed.a {
            rhs -= a;
        }
        match block {
            Block::BRhoAndB => {
                cols.push(dk);
                cols.push(root);
            }
            Block::BGivenRho(rho) => cols.push(rho * dk + root),
            Block::RhoGivenB(b) => {
                cols.push(b * dk);
                rhs -= b * root;
            }
            Block::Neither { b, rho } => rhs -= b * (rho * dk + root),
        }
        let scale = weights[i].sqrt();
        (cols.iter().map(|c| c * scale).collect(), rhs * scale)
    };

    let (x, rss) = if n_cols == 0 {
        let rss: f64 = (0..n).map(|i| row(i).1.powi(2)).sum();
        (DVector::zeros(0), rss)
    } else {
        let a_mat = DMatrix::<f64>::from_fn(n, n_cols, |i, j| row(i).0[j]);
        let b_vec = DVector::from_fn(n, |i, _| row(i).1);
        let ata = a_mat.transpose() * &a_mat;
        let atb = a_mat.transpose() * &b_vec;
        let x = ata.qr().solve(&atb)?;
        let residual = &a_mat * &x - &b_vec;
        let rss = residual.dot(&residual);
        (x, rss)
    };

    let mut idx = 0;
    let a = if a_free {
        let v = x[idx];
        idx += 1;
        v
    } else {
        fixed.a.unwrap_or(0.0)
    };
    let (b, rho) = match block {
        Block::BRhoAndB => {
            let b_rho = x[idx];
            let b = x[idx + 1];
            let rho = if b.abs() < 1e-10 { 0.0 } else { b_rho / b };
            (b, rho)
        }
        Block::BGivenRho(rho) => (x[idx], rho),
        Block::RhoGivenB(b) => (b, x[idx]),
        Block::Neither { b, rho } => (b, rho),
    };

    if !a.is_finite() || !b.is_finite() || !rho.is_finite() {
        return None;
    }
    Some(LinearFit { a, b, rho, rss })
}

impl SmileSection for SviSmile {
    fn volatility(&self, strike: f64) -> error::Result<Vol> {
        validate_positive(strike, "strike")?;
        let k = (strike / self.forward).ln();
        let w = self.total_variance_at_k(k);
        if w < 0.0 {
            return Err(FxVolError::NumericalError {
                message: format!("SVI total variance is negative: w({k}) = {w}"),
            });
        }
        Ok(Vol((w / self.expiry).sqrt()))
    }

    fn min_strike(&self) -> f64 {
        self.min_strike
    }

    fn max_strike(&self) -> f64 {
        self.max_strike
    }

    fn atm_level(&self) -> f64 {
        self.forward
    }

    fn expiry(&self) -> f64 {
        self.expiry
    }

    /// Risk-neutral density q(K) via the Gatheral g-function.
    ///
    /// Uses the analytical formula:
    /// ```text
    /// q(K) = g(k) · n(d₂) / (K · √w)
    /// ```
    /// where k = ln(K/F), d₂ = −k/√w − √w/2, and n(·) is the standard
    /// normal PDF.
    ///
    /// # Reference
    /// Breeden & Litzenberger (1978); Gatheral & Jacquier (2014), §4.
    fn density(&self, strike: f64) -> error::Result<f64> {
        validate_positive(strike, "strike")?;
        let k = (strike / self.forward).ln();
        let w = self.total_variance_at_k(k);
        if w <= 0.0 {
            return Err(FxVolError::NumericalError {
                message: format!("SVI total variance is non-positive at k={k}: w={w}"),
            });
        }
        let g = self.g_function(k);
        let sqrt_w = w.sqrt();
        let d2 = -k / sqrt_w - sqrt_w / 2.0;
        let n_d2 = (-d2 * d2 / 2.0).exp() / (2.0 * PI).sqrt();
        Ok(g * n_d2 / (strike * sqrt_w))
    }

    /// Check butterfly arbitrage by scanning the Gatheral g-function.
    ///
    /// Evaluates g(k) on a grid of 200 points over k ∈ \[−3, 3\].
    /// Points where g(k) < −tol are recorded as [`ButterflyViolation`]s
    /// with the actual risk-neutral density q(K) = g(k)·n(d₂)/(K·√w).
    ///
    /// # Reference
    /// Gatheral & Jacquier (2014), Theorem 4.1.
    fn is_arbitrage_free(&self) -> error::Result<ArbitrageReport> {
        /// Number of grid points for g-function arbitrage scan.
        const N: usize = 200;
        /// Minimum log-moneyness for arbitrage scan.
        const K_MIN: f64 = -3.0;
        /// Maximum log-moneyness for arbitrage scan.
        const K_MAX: f64 = 3.0;
        /// Tolerance for g-function negativity detection.
        const TOL: f64 = 1e-10;

        let mut violations = Vec::new();

        for i in 0..N {
            let k = K_MIN + (K_MAX - K_MIN) * (i as f64) / ((N - 1) as f64);
            let g = self.g_function(k);
            if g < -TOL {
                let strike = self.forward * k.exp();
                let d = match self.density(strike) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                violations.push(ButterflyViolation {
                    strike,
                    density: d,
                    magnitude: d.abs(),
                });
            }
        }

        if violations.is_empty() {
            Ok(ArbitrageReport::clean())
        } else {
            Ok(ArbitrageReport {
                is_free: false,
                butterfly_violations: violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // FX-like SVI slice: 9-month EURUSD with a mild skew.
    const F: f64 = 1.1172;
    const T: f64 = 0.75;
    const A: f64 = 0.0016;
    const B: f64 = 0.04;
    const RHO: f64 = -0.3;
    const M: f64 = 0.0;
    const SIGMA: f64 = 0.1;

    fn make_smile() -> SviSmile {
        SviSmile::new(F, T, A, B, RHO, M, SIGMA).unwrap()
    }

    #[test]
    fn new_validates_parameters() {
        assert!(SviSmile::new(F, T, A, B, RHO, M, SIGMA).is_ok());
        assert!(SviSmile::new(-1.0, T, A, B, RHO, M, SIGMA).is_err());
        assert!(SviSmile::new(F, 0.0, A, B, RHO, M, SIGMA).is_err());
        assert!(SviSmile::new(F, T, A, -0.1, RHO, M, SIGMA).is_err());
        assert!(SviSmile::new(F, T, A, B, 1.0, M, SIGMA).is_err());
        assert!(SviSmile::new(F, T, A, B, RHO, M, 0.0).is_err());
        assert!(SviSmile::new(F, T, f64::NAN, B, RHO, M, SIGMA).is_err());
        // a + b*sigma*sqrt(1-rho^2) < 0
        assert!(SviSmile::new(F, T, -1.0, B, RHO, M, SIGMA).is_err());
    }

    #[test]
    fn vol_at_atm_matches_formula() {
        let smile = make_smile();
        let w_atm = A + B * (RHO * -M + (M * M + SIGMA * SIGMA).sqrt());
        let expected = (w_atm / T).sqrt();
        assert_abs_diff_eq!(smile.volatility(F).unwrap().0, expected, epsilon = 1e-12);
    }

    #[test]
    fn variance_is_vol_squared_times_expiry() {
        let smile = make_smile();
        let v = smile.volatility(1.05).unwrap().0;
        let w = smile.variance(1.05).unwrap().0;
        assert_abs_diff_eq!(w, v * v * T, epsilon = 1e-12);
    }

    #[test]
    fn negative_rho_skews_put_wing_up() {
        let smile = make_smile();
        let put_wing = smile.volatility(F * 0.9).unwrap().0;
        let call_wing = smile.volatility(F * 1.1).unwrap().0;
        assert!(put_wing > call_wing);
    }

    #[test]
    fn density_integrates_to_one() {
        let smile = make_smile();
        let n = 2000;
        let lo = F * (-4.0_f64).exp();
        let hi = F * (2.0_f64).exp();
        let dk = (hi - lo) / n as f64;
        let mut total = 0.0;
        for i in 0..n {
            let k = lo + (i as f64 + 0.5) * dk;
            total += smile.density(k).unwrap() * dk;
        }
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn density_matches_numeric_price_curvature() {
        let smile = make_smile();
        let strike = 1.05;
        let analytic = smile.density(strike).unwrap();
        // Numeric second derivative of the undiscounted call price
        let h = strike * 1e-4;
        let price = |k: f64| {
            let v = smile.volatility(k).unwrap().0;
            crate::implied::black_price(F, k, v * T.sqrt(), crate::types::OptionType::Call)
                .unwrap()
        };
        let numeric = (price(strike + h) - 2.0 * price(strike) + price(strike - h)) / (h * h);
        assert_abs_diff_eq!(analytic, numeric, epsilon = 1e-4);
    }

    #[test]
    fn fit_recovers_synthetic_svi() {
        let truth = make_smile();
        let strikes: Vec<f64> = [-0.15, -0.07, 0.0, 0.07, 0.15]
            .iter()
            .map(|k: &f64| F * k.exp())
            .collect();
        let vols: Vec<f64> = strikes
            .iter()
            .map(|&s| truth.volatility(s).unwrap().0)
            .collect();

        let fitted = SviSmile::fit(F, T, &strikes, &vols, &SviFitOptions::default()).unwrap();
        for &s in &strikes {
            assert_abs_diff_eq!(
                fitted.volatility(s).unwrap().0,
                truth.volatility(s).unwrap().0,
                epsilon = 5e-4
            );
        }
        let report = fitted.fit_report().unwrap();
        assert!(report.rms_error < 5e-4);
        assert!(report.max_error < 1e-3);
        assert!(report.termination.is_some());
    }

    #[test]
    fn fit_handles_minimum_three_quotes() {
        let strikes = [1.05, 1.12, 1.19];
        let vols = [0.055, 0.048, 0.051];
        let fitted = SviSmile::fit(F, T, &strikes, &vols, &SviFitOptions::default()).unwrap();
        // Three quotes, three linear unknowns: near-interpolation expected.
        for (&s, &v) in strikes.iter().zip(&vols) {
            assert_abs_diff_eq!(fitted.volatility(s).unwrap().0, v, epsilon = 2e-3);
        }
        assert_eq!(fitted.min_strike(), 1.05);
        assert_eq!(fitted.max_strike(), 1.19);
    }

    #[test]
    fn fit_honours_pinned_rho() {
        let truth = make_smile();
        let strikes: Vec<f64> = [-0.15, -0.07, 0.0, 0.07, 0.15]
            .iter()
            .map(|k: &f64| F * k.exp())
            .collect();
        let vols: Vec<f64> = strikes
            .iter()
            .map(|&s| truth.volatility(s).unwrap().0)
            .collect();
        let options = SviFitOptions {
            vega_weighted: false,
            fixed: SviFixedParams {
                rho: Some(0.0),
                ..Default::default()
            },
        };
        let fitted = SviSmile::fit(F, T, &strikes, &vols, &options).unwrap();
        assert_eq!(fitted.rho(), 0.0);
    }

    #[test]
    fn fit_honours_pinned_outer_parameters() {
        let strikes = [1.0, 1.06, 1.12, 1.18, 1.24];
        let vols = [0.058, 0.051, 0.048, 0.05, 0.054];
        let options = SviFitOptions {
            vega_weighted: true,
            fixed: SviFixedParams {
                m: Some(0.01),
                sigma: Some(0.12),
                ..Default::default()
            },
        };
        let fitted = SviSmile::fit(F, T, &strikes, &vols, &options).unwrap();
        assert_eq!(fitted.m(), 0.01);
        assert_eq!(fitted.sigma(), 0.12);
        // No outer search ran
        assert!(fitted.fit_report().unwrap().termination.is_none());
    }

    #[test]
    fn fit_rejects_bad_inputs() {
        assert!(SviSmile::fit(F, T, &[1.1, 1.2], &[0.05, 0.05], &Default::default()).is_err());
        assert!(SviSmile::fit(
            F,
            T,
            &[1.0, 1.1, 1.2],
            &[0.05, -0.05, 0.05],
            &Default::default()
        )
        .is_err());
        assert!(SviSmile::fit(F, T, &[1.0, 1.1, 1.2], &[0.05, 0.05], &Default::default()).is_err());
    }

    #[test]
    fn reasonable_params_are_arbitrage_free() {
        let report = make_smile().is_arbitrage_free().unwrap();
        assert!(report.is_free);
    }

    #[test]
    fn serde_round_trip_preserves_params() {
        let smile = make_smile();
        let json = serde_json::to_string(&smile).unwrap();
        let back: SviSmile = serde_json::from_str(&json).unwrap();
        assert_abs_diff_eq!(back.a(), smile.a(), epsilon = 1e-15);
        assert_abs_diff_eq!(back.rho(), smile.rho(), epsilon = 1e-15);
        assert_abs_diff_eq!(
            back.volatility(1.1).unwrap().0,
            smile.volatility(1.1).unwrap().0,
            epsilon = 1e-15
        );
    }

    #[test]
    fn serde_rejects_invalid_params() {
        let json = r#"{"forward":1.1,"expiry":0.5,"a":0.01,"b":-0.5,"rho":0.0,"m":0.0,"sigma":0.1}"#;
        let result: Result<SviSmile, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
