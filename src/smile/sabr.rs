//! SABR smile model with a short-maturity shape exponent.
//!
//! Implied vols come from the Hagan et al. (2002) lognormal expansion. The
//! FX calibration keeps `β = 0.5` fixed, sets `α` analytically from the ATM
//! quote and fits `(ρ, ν)` to the remaining pillars. The extra exponent `γ`
//! tempers the vol-of-vol backbone (`γ = 1` recovers plain SABR), which is
//! what short-dated FX smiles need to keep their wings under control.
//!
//! # References
//! - Hagan, P. et al. "Managing Smile Risk", Wilmott (2002)

use serde::{Deserialize, Serialize};

use crate::error::{self, FxVolError};
use crate::optim;
use crate::smile::SmileSection;
use crate::types::Vol;
use crate::validate::{validate_non_negative, validate_positive};

/// CEV exponent held fixed for FX smiles.
const FX_BETA: f64 = 0.5;

/// SABR volatility smile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SabrSmileRaw", into = "SabrSmileRaw")]
pub struct SabrSmile {
    forward: f64,
    expiry: f64,
    /// Initial vol level.
    alpha: f64,
    /// CEV exponent β ∈ \[0, 1\].
    beta: f64,
    /// Spot/vol correlation ρ ∈ (−1, 1).
    rho: f64,
    /// Vol of vol.
    nu: f64,
    /// Backbone shape exponent; 1 recovers plain SABR.
    gamma: f64,
    min_strike: f64,
    max_strike: f64,
}

#[derive(Serialize, Deserialize)]
struct SabrSmileRaw {
    forward: f64,
    expiry: f64,
    alpha: f64,
    beta: f64,
    rho: f64,
    nu: f64,
    gamma: f64,
}

impl TryFrom<SabrSmileRaw> for SabrSmile {
    type Error = FxVolError;
    fn try_from(raw: SabrSmileRaw) -> Result<Self, Self::Error> {
        Self::new(
            raw.forward,
            raw.expiry,
            raw.alpha,
            raw.beta,
            raw.rho,
            raw.nu,
            raw.gamma,
        )
    }
}

impl From<SabrSmile> for SabrSmileRaw {
    fn from(s: SabrSmile) -> Self {
        Self {
            forward: s.forward,
            expiry: s.expiry,
            alpha: s.alpha,
            beta: s.beta,
            rho: s.rho,
            nu: s.nu,
            gamma: s.gamma,
        }
    }
}

impl SabrSmile {
    /// Create a SABR smile from known parameters.
    ///
    /// # Errors
    /// Returns [`FxVolError::InvalidInput`] when a parameter is out of its
    /// admissible range.
    pub fn new(
        forward: f64,
        expiry: f64,
        alpha: f64,
        beta: f64,
        rho: f64,
        nu: f64,
        gamma: f64,
    ) -> error::Result<Self> {
        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        validate_positive(alpha, "alpha")?;
        if !(0.0..=1.0).contains(&beta) || beta.is_nan() {
            return Err(FxVolError::InvalidInput {
                message: format!("beta must be in [0, 1], got {beta}"),
            });
        }
        if rho.abs() >= 1.0 || rho.is_nan() {
            return Err(FxVolError::InvalidInput {
                message: format!("|rho| must be less than 1, got {rho}"),
            });
        }
        validate_non_negative(nu, "nu")?;
        validate_positive(gamma, "gamma")?;
        Ok(Self {
            forward,
            expiry,
            alpha,
            beta,
            rho,
            nu,
            gamma,
            min_strike: 0.0,
            max_strike: f64::INFINITY,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Calibrate a SABR smile to an FX quote row.
    ///
    /// `β` is held at 0.5 and `α` is set analytically so the ATM vol is
    /// reproduced at leading order: with the ATM pillar in the third column,
    /// `α = σ_ATM·√F`. Only `(ρ, ν)` are searched, starting from a flat
    /// correlation and moderate vol of vol.
    ///
    /// # Errors
    /// Returns [`FxVolError::InvalidInput`] for fewer than three quotes,
    /// [`FxVolError::CalibrationError`] when the search fails to produce
    /// admissible parameters.
    pub fn fit(
        forward: f64,
        expiry: f64,
        strikes: &[f64],
        vols: &[f64],
        gamma: f64,
    ) -> error::Result<Self> {
        /// ATM pillar position within an FX quote row.
        const ATM_COLUMN: usize = 2;
        const NM_MAX_ITER: usize = 300;

        validate_positive(forward, "forward")?;
        validate_positive(expiry, "expiry")?;
        validate_positive(gamma, "gamma")?;
        if strikes.len() != vols.len() || strikes.len() <= ATM_COLUMN {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "SABR fit needs at least {} matching quotes, got {} strikes and {} vols",
                    ATM_COLUMN + 1,
                    strikes.len(),
                    vols.len()
                ),
            });
        }
        for (&strike, &vol) in strikes.iter().zip(vols) {
            validate_positive(strike, "strike")?;
            validate_positive(vol, "implied vol")?;
        }

        // sigma_ATM ~ alpha / F^(1-beta), so with beta = 0.5 the ATM quote
        // pins alpha directly.
        let alpha = vols[ATM_COLUMN] * forward.powf(1.0 - FX_BETA);

        let objective = |x: &[f64]| -> f64 {
            let (rho, nu) = (x[0], x[1]);
            if rho.abs() >= 0.999 || nu < 0.0 {
                return f64::MAX;
            }
            let mut sse = 0.0;
            for (&strike, &vol) in strikes.iter().zip(vols) {
                let model = hagan_vol(forward, strike, expiry, alpha, FX_BETA, rho, nu, gamma);
                if !model.is_finite() {
                    return f64::MAX;
                }
                let err = model - vol;
                sse += err * err;
            }
            sse
        };

        let nm_config = optim::NelderMeadConfig {
            max_iter: NM_MAX_ITER,
            diameter_tol: 1e-10,
            fvalue_tol: 1e-14,
        };
        let result = optim::nelder_mead(objective, &[0.0, 0.3], &[0.2, 0.2], &nm_config);
        if result.fval >= f64::MAX {
            return Err(FxVolError::CalibrationError {
                message: "no admissible (rho, nu) found".into(),
                model: "SABR",
                rms_error: None,
            });
        }
        let rho = result.x[0].clamp(-0.999, 0.999);
        let nu = result.x[1].max(0.0);

        #[cfg(feature = "logging")]
        tracing::debug!(alpha, rho, nu, gamma, "SABR calibration complete");

        let mut smile = Self::new(forward, expiry, alpha, FX_BETA, rho, nu, gamma).map_err(|e| {
            FxVolError::CalibrationError {
                message: format!("calibrated params invalid: {e}"),
                model: "SABR",
                rms_error: Some((result.fval / strikes.len() as f64).sqrt()),
            }
        })?;
        smile.min_strike = strikes.iter().cloned().fold(f64::INFINITY, f64::min);
        smile.max_strike = strikes.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Ok(smile)
    }
}

/// Hagan et al. (2002) lognormal implied vol expansion.
///
/// The shape exponent enters through an effective vol of vol
/// `ν_eff = ν·α^(γ−1)`, flattening or steepening the backbone.
#[allow(clippy::too_many_arguments)]
fn hagan_vol(
    forward: f64,
    strike: f64,
    expiry: f64,
    alpha: f64,
    beta: f64,
    rho: f64,
    nu: f64,
    gamma: f64,
) -> f64 {
    let nu_eff = nu * alpha.powf(gamma - 1.0);
    let one_m_beta = 1.0 - beta;
    let fk_pow = (forward * strike).powf(0.5 * one_m_beta);
    let log_fk = (forward / strike).ln();

    let a_denom = fk_pow
        * (1.0
            + one_m_beta.powi(2) / 24.0 * log_fk.powi(2)
            + one_m_beta.powi(4) / 1920.0 * log_fk.powi(4));
    let a_term = alpha / a_denom;

    let z = nu_eff / alpha * fk_pow * log_fk;
    let zx = if z.abs() < 1e-8 {
        // z/x(z) -> 1 at ATM
        1.0
    } else {
        let x = (((1.0 - 2.0 * rho * z + z * z).sqrt() + z - rho) / (1.0 - rho)).ln();
        z / x
    };

    let b_term = 1.0
        + (one_m_beta.powi(2) / 24.0 * alpha * alpha / fk_pow.powi(2)
            + 0.25 * rho * beta * nu_eff * alpha / fk_pow
            + (2.0 - 3.0 * rho * rho) / 24.0 * nu_eff * nu_eff)
            * expiry;

    a_term * zx * b_term
}

impl SmileSection for SabrSmile {
    fn volatility(&self, strike: f64) -> error::Result<Vol> {
        validate_positive(strike, "strike")?;
        let vol = hagan_vol(
            self.forward,
            strike,
            self.expiry,
            self.alpha,
            self.beta,
            self.rho,
            self.nu,
            self.gamma,
        );
        if !vol.is_finite() || vol <= 0.0 {
            return Err(FxVolError::NumericalError {
                message: format!("SABR vol is not positive at strike {strike}: {vol}"),
            });
        }
        Ok(Vol(vol))
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
}
