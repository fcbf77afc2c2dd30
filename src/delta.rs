//! Delta-to-strike conversion for FX option quotes.
//!
//! Given a quoted delta, its convention and a vol level, the
//! [`BlackDeltaCalculator`] recovers the strike at which a Black option has
//! that delta, together with the ATM strike for each ATM definition. This is
//! the bridge between market delta pillars and the strike-based smile models.

use crate::error::{FxVolError, Result};
use crate::math::normal_inv_cdf;
use crate::quotes::{AtmType, DeltaType};
use crate::types::OptionType;
use crate::validate::{validate_non_negative, validate_positive};

/// Strike solver for a single (option type, delta convention, vol) slice.
///
/// `std_dev` is the total standard deviation `σ√T` of the quote. The forward
/// is derived from spot and the two discount factors:
/// `F = S · d_foreign / d_domestic`.
#[derive(Debug, Clone)]
pub struct BlackDeltaCalculator {
    option_type: OptionType,
    delta_type: DeltaType,
    spot: f64,
    d_foreign: f64,
    forward: f64,
    std_dev: f64,
}

impl BlackDeltaCalculator {
    pub fn new(
        option_type: OptionType,
        delta_type: DeltaType,
        spot: f64,
        d_domestic: f64,
        d_foreign: f64,
        std_dev: f64,
    ) -> Result<Self> {
        validate_positive(spot, "spot")?;
        validate_positive(d_domestic, "domestic discount factor")?;
        validate_positive(d_foreign, "foreign discount factor")?;
        validate_non_negative(std_dev, "std_dev")?;
        Ok(BlackDeltaCalculator {
            option_type,
            delta_type,
            spot,
            d_foreign,
            forward: spot * d_foreign / d_domestic,
            std_dev,
        })
    }

    pub fn forward(&self) -> f64 {
        self.forward
    }

    /// Strike at which the option has the given delta under the calculator's
    /// convention.
    ///
    /// Call deltas must be positive, put deltas negative. Spot deltas are
    /// de-discounted to forward deltas before inversion:
    /// `K = F · exp(−ω σ√T Φ⁻¹(ω Δ_F) + σ²T/2)`.
    pub fn strike_from_delta(&self, delta: f64) -> Result<f64> {
        let omega = self.option_type.sign();
        if !delta.is_finite() || delta * omega <= 0.0 {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "delta {delta} has the wrong sign for a {:?}",
                    self.option_type
                ),
            });
        }
        let fwd_delta = match self.delta_type {
            DeltaType::Fwd => delta,
            DeltaType::Spot => delta / self.d_foreign,
        };
        if fwd_delta.abs() >= 1.0 {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "forward delta {fwd_delta} out of range (-1, 1); \
                     spot delta {delta} with foreign discount {}",
                    self.d_foreign
                ),
            });
        }
        if self.std_dev == 0.0 {
            return Err(FxVolError::InvalidInput {
                message: "cannot invert delta with zero std_dev".into(),
            });
        }
        let z = normal_inv_cdf(omega * fwd_delta);
        Ok(self.forward * (-omega * self.std_dev * z + 0.5 * self.std_dev * self.std_dev).exp())
    }

    /// ATM strike under the given ATM definition.
    pub fn atm_strike(&self, atm_type: AtmType) -> Result<f64> {
        match atm_type {
            AtmType::AtmDeltaNeutral => {
                Ok(self.forward * (0.5 * self.std_dev * self.std_dev).exp())
            }
            AtmType::AtmFwd => Ok(self.forward),
            AtmType::AtmSpot => Ok(self.spot),
            AtmType::AtmNull => Err(FxVolError::InvalidInput {
                message: "AtmNull has no ATM strike".into(),
            }),
        }
    }

    /// Delta of an option struck at `strike`, under the calculator's
    /// convention. Inverse of [`strike_from_delta`](Self::strike_from_delta).
    pub fn delta(&self, strike: f64) -> Result<f64> {
        validate_positive(strike, "strike")?;
        let omega = self.option_type.sign();
        if self.std_dev == 0.0 {
            let itm = omega * (self.forward - strike) > 0.0;
            let fwd_delta = if itm { omega } else { 0.0 };
            return Ok(self.apply_convention(fwd_delta));
        }
        let d1 =
            ((self.forward / strike).ln() + 0.5 * self.std_dev * self.std_dev) / self.std_dev;
        let fwd_delta = omega * crate::math::normal_cdf(omega * d1);
        Ok(self.apply_convention(fwd_delta))
    }

    fn apply_convention(&self, fwd_delta: f64) -> f64 {
        match self.delta_type {
            DeltaType::Fwd => fwd_delta,
            DeltaType::Spot => fwd_delta * self.d_foreign,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn calculator(
        option_type: OptionType,
        delta_type: DeltaType,
        std_dev: f64,
    ) -> BlackDeltaCalculator {
        BlackDeltaCalculator::new(
            option_type,
            delta_type,
            1.1172,
            (-0.02_f64 * 0.5).exp(),
            (0.01_f64 * 0.5).exp(),
            std_dev,
        )
        .unwrap()
    }

    #[test]
    fn forward_from_discounts() {
        let calc = calculator(OptionType::Call, DeltaType::Fwd, 0.05);
        assert_abs_diff_eq!(calc.forward(), 1.1172 * (0.03_f64 * 0.5).exp(), epsilon = 1e-12);
    }

    #[test]
    fn strike_delta_round_trip_fwd() {
        let calc = calculator(OptionType::Call, DeltaType::Fwd, 0.05 * 0.5_f64.sqrt());
        for &d in &[0.1, 0.25, 0.4] {
            let k = calc.strike_from_delta(d).unwrap();
            assert_abs_diff_eq!(calc.delta(k).unwrap(), d, epsilon = 1e-10);
        }
    }

    #[test]
    fn strike_delta_round_trip_spot_put() {
        let calc = calculator(OptionType::Put, DeltaType::Spot, 0.06 * 0.25_f64.sqrt());
        for &d in &[-0.1, -0.25] {
            let k = calc.strike_from_delta(d).unwrap();
            assert_abs_diff_eq!(calc.delta(k).unwrap(), d, epsilon = 1e-10);
        }
    }

    #[test]
    fn otm_put_strike_below_forward() {
        let calc = calculator(OptionType::Put, DeltaType::Fwd, 0.05);
        let k = calc.strike_from_delta(-0.25).unwrap();
        assert!(k < calc.forward());
        let calc = calculator(OptionType::Call, DeltaType::Fwd, 0.05);
        let k = calc.strike_from_delta(0.25).unwrap();
        assert!(k > calc.forward());
    }

    #[test]
    fn atm_strikes() {
        let sd = 0.05_f64;
        let calc = calculator(OptionType::Call, DeltaType::Fwd, sd);
        let dn = calc.atm_strike(AtmType::AtmDeltaNeutral).unwrap();
        assert_abs_diff_eq!(dn, calc.forward() * (0.5 * sd * sd).exp(), epsilon = 1e-14);
        assert_eq!(calc.atm_strike(AtmType::AtmFwd).unwrap(), calc.forward());
        assert_eq!(calc.atm_strike(AtmType::AtmSpot).unwrap(), 1.1172);
        assert!(calc.atm_strike(AtmType::AtmNull).is_err());
    }

    #[test]
    fn delta_neutral_strike_equalizes_call_and_put_deltas() {
        let sd = 0.0483 * 0.75_f64.sqrt();
        let call = calculator(OptionType::Call, DeltaType::Fwd, sd);
        let put = calculator(OptionType::Put, DeltaType::Fwd, sd);
        let k = call.atm_strike(AtmType::AtmDeltaNeutral).unwrap();
        let dc = call.delta(k).unwrap();
        let dp = put.delta(k).unwrap();
        assert_abs_diff_eq!(dc + dp, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_wrong_sign_delta() {
        let calc = calculator(OptionType::Call, DeltaType::Fwd, 0.05);
        assert!(calc.strike_from_delta(-0.25).is_err());
        let calc = calculator(OptionType::Put, DeltaType::Fwd, 0.05);
        assert!(calc.strike_from_delta(0.25).is_err());
    }
}
