//! Single-expiry volatility smile models.
//!
//! A smile represents how implied volatility varies with strike at a fixed
//! expiry. All models implement the [`SmileSection`] trait, and the surface
//! holds them behind the closed [`FxSmile`] sum type.
//!
//! ## Models
//!
//! - [`SviSmile`] — SVI parameterization (Gatheral), quasi-explicit calibration
//! - [`SabrSmile`] — SABR (Hagan et al.) with a short-maturity shape exponent
//! - [`KahaleSmile`] — arbitrage-repaired wrap of a base smile (Kahalé 2004)

pub mod arbitrage;
pub mod kahale;
pub mod sabr;
pub mod svi;

pub use arbitrage::{ArbitrageReport, ButterflyViolation};
pub use kahale::{KahaleOptions, KahaleSmile};
pub use sabr::SabrSmile;
pub use svi::{SviFitOptions, SviFitReport, SviFixedParams, SviSmile};

use crate::error;
use crate::implied::black_price;
use crate::types::{OptionType, Variance, Vol};
use crate::validate::validate_positive;

/// A single-expiry volatility smile.
///
/// Represents the relationship between strike and implied volatility at a
/// fixed expiry. Strikes outside `[min_strike, max_strike]` are still
/// answered; each model applies its own wing extrapolation there rather than
/// failing.
///
/// # Thread Safety
/// All implementations must be `Send + Sync` for use in concurrent pricing.
///
/// # Error Handling
/// Methods return `Result` so implementations can report numerical failures
/// (e.g., negative variance, NaN) rather than panicking.
pub trait SmileSection: Send + Sync {
    /// Implied Black volatility σ at the given strike.
    fn volatility(&self, strike: f64) -> error::Result<Vol>;

    /// Total Black variance σ²T at the given strike.
    ///
    /// Default implementation derives from
    /// [`volatility`](SmileSection::volatility):
    /// `variance(K) = volatility(K)² × expiry`.
    fn variance(&self, strike: f64) -> error::Result<Variance> {
        let v = self.volatility(strike)?;
        Ok(Variance(v.0 * v.0 * self.expiry()))
    }

    /// Lower end of the strike range the smile was built from.
    fn min_strike(&self) -> f64;

    /// Upper end of the strike range the smile was built from.
    fn max_strike(&self) -> f64;

    /// ATM level, i.e. the forward price F at this expiry.
    fn atm_level(&self) -> f64;

    /// Time to expiry T in years.
    fn expiry(&self) -> f64;

    /// Risk-neutral probability density q(K) via Breeden-Litzenberger.
    ///
    /// Must be non-negative for an arbitrage-free smile. The default
    /// implementation differentiates undiscounted Black call prices
    /// numerically; models with an analytic density override it.
    fn density(&self, strike: f64) -> error::Result<f64> {
        validate_positive(strike, "strike")?;
        let forward = self.atm_level();
        let sqrt_t = self.expiry().sqrt();
        // Large enough a step that price round-off does not swamp h^2
        let h = strike * 1e-3;
        let price = |k: f64| -> error::Result<f64> {
            let v = self.volatility(k)?;
            black_price(forward, k, v.0 * sqrt_t, OptionType::Call)
        };
        let pm = price(strike - h)?;
        let p0 = price(strike)?;
        let pp = price(strike + h)?;
        Ok((pp - 2.0 * p0 + pm) / (h * h))
    }

    /// Check whether this smile is free of butterfly arbitrage.
    ///
    /// The default implementation scans the density over a log-moneyness
    /// grid; negative values are recorded as violations.
    fn is_arbitrage_free(&self) -> error::Result<ArbitrageReport> {
        const N: usize = 200;
        const K_MIN: f64 = -3.0;
        const K_MAX: f64 = 3.0;
        // Looser than the analytic scans: the numeric density carries
        // finite-difference noise in the far wings
        const TOL: f64 = 1e-6;

        let mut violations = Vec::new();
        for i in 0..N {
            let k = K_MIN + (K_MAX - K_MIN) * (i as f64) / ((N - 1) as f64);
            let strike = self.atm_level() * k.exp();
            let d = match self.density(strike) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if d < -TOL {
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

/// The closed set of smile models an FX surface can hold.
///
/// A sum type instead of `Box<dyn SmileSection>`: the surface knows the full
/// set of models at compile time, dispatch is a `match`, and cached smiles
/// stay trivially cloneable behind an `Arc`.
#[derive(Debug, Clone)]
pub enum FxSmile {
    Svi(SviSmile),
    Sabr(SabrSmile),
    Kahale(KahaleSmile),
}

impl SmileSection for FxSmile {
    fn volatility(&self, strike: f64) -> error::Result<Vol> {
        match self {
            FxSmile::Svi(s) => s.volatility(strike),
            FxSmile::Sabr(s) => s.volatility(strike),
            FxSmile::Kahale(s) => s.volatility(strike),
        }
    }

    fn variance(&self, strike: f64) -> error::Result<Variance> {
        match self {
            FxSmile::Svi(s) => s.variance(strike),
            FxSmile::Sabr(s) => s.variance(strike),
            FxSmile::Kahale(s) => s.variance(strike),
        }
    }

    fn min_strike(&self) -> f64 {
        match self {
            FxSmile::Svi(s) => s.min_strike(),
            FxSmile::Sabr(s) => s.min_strike(),
            FxSmile::Kahale(s) => s.min_strike(),
        }
    }

    fn max_strike(&self) -> f64 {
        match self {
            FxSmile::Svi(s) => s.max_strike(),
            FxSmile::Sabr(s) => s.max_strike(),
            FxSmile::Kahale(s) => s.max_strike(),
        }
    }

    fn atm_level(&self) -> f64 {
        match self {
            FxSmile::Svi(s) => s.atm_level(),
            FxSmile::Sabr(s) => s.atm_level(),
            FxSmile::Kahale(s) => s.atm_level(),
        }
    }

    fn expiry(&self) -> f64 {
        match self {
            FxSmile::Svi(s) => s.expiry(),
            FxSmile::Sabr(s) => s.expiry(),
            FxSmile::Kahale(s) => s.expiry(),
        }
    }

    fn density(&self, strike: f64) -> error::Result<f64> {
        match self {
            FxSmile::Svi(s) => s.density(strike),
            FxSmile::Sabr(s) => s.density(strike),
            FxSmile::Kahale(s) => s.density(strike),
        }
    }

    fn is_arbitrage_free(&self) -> error::Result<ArbitrageReport> {
        match self {
            FxSmile::Svi(s) => s.is_arbitrage_free(),
            FxSmile::Sabr(s) => s.is_arbitrage_free(),
            FxSmile::Kahale(s) => s.is_arbitrage_free(),
        }
    }
}
