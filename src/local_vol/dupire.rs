//! Dupire local volatility by finite differences.

use std::sync::Arc;

use crate::curve::YieldCurve;
use crate::error::{FxVolError, Result};
use crate::local_vol::LocalVol;
use crate::quotes::VersionedQuote;
use crate::surface::VolSurface;
use crate::types::Vol;
use crate::validate::{validate_non_negative, validate_positive};

/// Local volatility derived from a Black variance surface via the Dupire
/// relation in log-moneyness.
///
/// Strike derivatives use a relative step so they stay well conditioned near
/// the forward; the time derivative is one-sided at t = 0 and central
/// elsewhere, with the shifted strikes rescaled by the discount ratio so the
/// forward moneyness is held fixed across the time bump.
///
/// Calendar arbitrage (variance decreasing forward in time) and a negative
/// local variance are not errors here: both produce the configured
/// [`illegal_value`](Self::illegal_value) so a pricing run can flag the node
/// and continue. Callers must check [`is_illegal`](Self::is_illegal).
pub struct DupireLocalVol {
    surface: Arc<dyn VolSurface>,
    domestic: Arc<dyn YieldCurve>,
    foreign: Arc<dyn YieldCurve>,
    spot: Arc<VersionedQuote>,
    illegal_value: f64,
}

impl DupireLocalVol {
    /// Wrap an implied surface; `illegal_value` is the in-band sentinel
    /// reported on arbitrage violations, typically a clearly out-of-range
    /// volatility such as a negative number.
    pub fn new(
        surface: Arc<dyn VolSurface>,
        domestic: Arc<dyn YieldCurve>,
        foreign: Arc<dyn YieldCurve>,
        spot: Arc<VersionedQuote>,
        illegal_value: f64,
    ) -> Result<Self> {
        if !illegal_value.is_finite() {
            return Err(FxVolError::InvalidInput {
                message: format!("illegal-value sentinel must be finite, got {illegal_value}"),
            });
        }
        validate_positive(spot.value(), "fx spot")?;
        Ok(DupireLocalVol {
            surface,
            domestic,
            foreign,
            spot,
            illegal_value,
        })
    }

    pub fn illegal_value(&self) -> f64 {
        self.illegal_value
    }

    /// Whether a vol returned by [`local_vol`](LocalVol::local_vol) is the
    /// sentinel rather than a usable number.
    pub fn is_illegal(&self, vol: Vol) -> bool {
        vol.0 == self.illegal_value
    }

    fn sentinel(&self) -> Result<Vol> {
        Ok(Vol(self.illegal_value))
    }

    fn variance(&self, t: f64, strike: f64) -> Result<f64> {
        Ok(self.surface.black_variance(t, strike)?.0)
    }
}

impl LocalVol for DupireLocalVol {
    fn local_vol(&self, t: f64, level: f64) -> Result<Vol> {
        validate_non_negative(t, "t")?;
        validate_positive(level, "level")?;

        let dr = self.domestic.discount(t);
        let dq = self.foreign.discount(t);
        let forward = self.spot.value() * dq / dr;
        let strike = level;
        let y = (strike / forward).ln();

        // Relative strike step, floored away from zero near the forward
        let dy = (y.abs() * 1e-4).max(1e-6);
        let strike_p = strike * dy.exp();
        let strike_m = strike / dy.exp();

        let w = self.variance(t, strike)?;
        let wp = self.variance(t, strike_p)?;
        let wm = self.variance(t, strike_m)?;
        let dwdy = (wp - wm) / (2.0 * dy);
        let d2wdy2 = (wp - 2.0 * w + wm) / (dy * dy);

        let dwdt = if t == 0.0 {
            let dt = 1e-4;
            // Rescale the strike so the forward moneyness is unchanged at t+dt
            let strike_pt =
                strike * dr * self.foreign.discount(t + dt) / (self.domestic.discount(t + dt) * dq);
            let wpt = self.variance(t + dt, strike_pt)?;
            if wpt < w {
                return self.sentinel();
            }
            (wpt - w) / dt
        } else {
            let dt = 1e-4_f64.min(t / 2.0);
            let strike_pt =
                strike * dr * self.foreign.discount(t + dt) / (self.domestic.discount(t + dt) * dq);
            let strike_mt =
                strike * dr * self.foreign.discount(t - dt) / (self.domestic.discount(t - dt) * dq);
            let wpt = self.variance(t + dt, strike_pt)?;
            let wmt = self.variance(t - dt, strike_mt)?;
            // Total variance must grow in time at fixed moneyness
            if wpt < w || w < wmt {
                return self.sentinel();
            }
            (wpt - wmt) / (2.0 * dt)
        };

        // Flat smile: the denominator is identically one and dividing by a
        // zero variance at short times must be avoided
        if dwdy == 0.0 && d2wdy2 == 0.0 {
            if dwdt < 0.0 {
                return self.sentinel();
            }
            return Ok(Vol(dwdt.sqrt()));
        }

        let den1 = 1.0 - y / w * dwdy;
        let den2 = 0.25 * (-0.25 - 1.0 / w + y * y / (w * w)) * dwdy * dwdy;
        let den3 = 0.5 * d2wdy2;
        let den = den1 + den2 + den3;
        let local_variance = dwdt / den;
        if den <= 0.0 || !local_variance.is_finite() || local_variance < 0.0 {
            return self.sentinel();
        }
        Ok(Vol(local_variance.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::FlatForwardCurve;
    use crate::types::Variance;
    use approx::assert_abs_diff_eq;
    use chrono::NaiveDate;

    const SPOT: f64 = 1.1172;

    fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 5, 2).unwrap()
    }

    /// Black surface with flat implied vol.
    struct FlatSurface {
        vol: f64,
    }

    impl VolSurface for FlatSurface {
        fn black_vol(&self, _expiry: f64, _strike: f64) -> crate::error::Result<Vol> {
            Ok(Vol(self.vol))
        }
    }

    /// Total variance shrinking in time past a kink: calendar arbitrage.
    struct DecreasingVarianceSurface;

    impl VolSurface for DecreasingVarianceSurface {
        fn black_vol(&self, expiry: f64, strike: f64) -> crate::error::Result<Vol> {
            let w = self.black_variance(expiry, strike)?.0;
            Ok(Vol((w / expiry).sqrt()))
        }

        fn black_variance(&self, expiry: f64, _strike: f64) -> crate::error::Result<Variance> {
            // Rises to 0.02 at t = 0.5, then decays
            let w = if expiry <= 0.5 {
                0.04 * expiry
            } else {
                0.02 - 0.01 * (expiry - 0.5)
            };
            Ok(Variance(w))
        }
    }

    fn dupire(surface: Arc<dyn VolSurface>, illegal: f64) -> DupireLocalVol {
        let domestic = Arc::new(FlatForwardCurve::new(reference_date(), 0.02));
        let foreign = Arc::new(FlatForwardCurve::new(reference_date(), -0.01));
        DupireLocalVol::new(
            surface,
            domestic,
            foreign,
            Arc::new(VersionedQuote::new(SPOT)),
            illegal,
        )
        .unwrap()
    }

    #[test]
    fn flat_surface_reproduces_flat_local_vol() {
        let lv = dupire(Arc::new(FlatSurface { vol: 0.05 }), -1.0);
        for &(t, k) in &[(0.1, 1.0), (0.5, 1.1172), (1.0, 1.3), (2.0, 0.9)] {
            let v = lv.local_vol(t, k).unwrap();
            assert!(!lv.is_illegal(v));
            assert_abs_diff_eq!(v.0, 0.05, epsilon = 1e-6);
        }
    }

    #[test]
    fn flat_surface_at_time_zero() {
        let lv = dupire(Arc::new(FlatSurface { vol: 0.05 }), -1.0);
        let v = lv.local_vol(0.0, SPOT).unwrap();
        assert_abs_diff_eq!(v.0, 0.05, epsilon = 1e-6);
    }

    #[test]
    fn calendar_arbitrage_returns_sentinel() {
        let lv = dupire(Arc::new(DecreasingVarianceSurface), -1.0);
        // Before the kink the variance grows normally
        let ok = lv.local_vol(0.25, SPOT).unwrap();
        assert!(!lv.is_illegal(ok));
        // Past the kink the variance decreases in time
        let bad = lv.local_vol(1.0, SPOT).unwrap();
        assert!(lv.is_illegal(bad));
        assert_eq!(bad.0, -1.0);
    }

    #[test]
    fn sentinel_value_is_configurable() {
        let lv = dupire(Arc::new(DecreasingVarianceSurface), 999.0);
        assert_eq!(lv.illegal_value(), 999.0);
        let bad = lv.local_vol(1.0, SPOT).unwrap();
        assert_eq!(bad.0, 999.0);
        assert!(lv.is_illegal(bad));
    }

    #[test]
    fn rejects_bad_arguments() {
        let lv = dupire(Arc::new(FlatSurface { vol: 0.05 }), -1.0);
        assert!(lv.local_vol(-0.1, 1.0).is_err());
        assert!(lv.local_vol(0.5, 0.0).is_err());
        assert!(DupireLocalVol::new(
            Arc::new(FlatSurface { vol: 0.05 }),
            Arc::new(FlatForwardCurve::new(reference_date(), 0.02)),
            Arc::new(FlatForwardCurve::new(reference_date(), -0.01)),
            Arc::new(VersionedQuote::new(SPOT)),
            f64::NAN,
        )
        .is_err());
    }
}
