//! Kahalé-style arbitrage repair of a base smile.
//!
//! Works in forward moneyness space `x = K/F` on undiscounted call prices
//! `c(x)` with unit forward. A static-arbitrage-free call curve is decreasing
//! and convex with slopes in `[−1, 0]` and `c(x) ≥ (1 − x)⁺`. The base
//! smile's prices are sampled at the quote pillars and projected onto that
//! set; vols are then re-implied from the repaired prices, so the wrapped
//! smile is arbitrage-free by construction even when the base is not.
//!
//! # References
//! - Kahalé, N. "An arbitrage-free interpolation of volatilities" (2004)

use crate::error::{self, FxVolError};
use crate::implied::{black_price, implied_vol};
use crate::smile::arbitrage::{ArbitrageReport, ButterflyViolation};
use crate::smile::SmileSection;
use crate::types::{OptionType, Vol};
use crate::validate::validate_positive;

/// Behaviour switches for the repair, mirroring the conventions of the
/// surface strategy that builds these smiles.
#[derive(Debug, Clone, Copy)]
pub struct KahaleOptions {
    /// Densify the pillar grid with midpoints before repairing, smoothing
    /// the interpolated price curve.
    pub interpolate: bool,
    /// Extrapolate the right wing with an exponential price tail matched to
    /// the last repaired slope; flat vol otherwise.
    pub exponential_extrapolation: bool,
    /// Drop pillars that break convexity instead of projecting their prices.
    pub delete_arbitrage_points: bool,
}

impl Default for KahaleOptions {
    fn default() -> Self {
        KahaleOptions {
            interpolate: false,
            exponential_extrapolation: true,
            delete_arbitrage_points: false,
        }
    }
}

/// A smile defined by repaired call prices at moneyness pillars.
///
/// Between pillars the price curve is linear in moneyness, which preserves
/// convexity; vols are implied from prices on demand. Left of the first
/// pillar the vol is flat; the right wing follows
/// [`KahaleOptions::exponential_extrapolation`].
#[derive(Debug, Clone)]
pub struct KahaleSmile {
    forward: f64,
    expiry: f64,
    options: KahaleOptions,
    /// Moneyness pillars x = K/F, strictly increasing.
    xs: Vec<f64>,
    /// Repaired undiscounted call prices at the pillars (unit forward).
    cs: Vec<f64>,
    /// Implied vols at the pillars.
    vols: Vec<f64>,
    /// Decay rate of the exponential right tail, if usable.
    tail_lambda: Option<f64>,
}

impl KahaleSmile {
    /// Repair `base` over the given strike pillars.
    ///
    /// # Errors
    /// Returns [`FxVolError::InvalidInput`] for fewer than three pillars or
    /// non-increasing strikes, and propagates base smile failures.
    pub fn from_section(
        base: &dyn SmileSection,
        strikes: &[f64],
        options: KahaleOptions,
    ) -> error::Result<Self> {
        let forward = base.atm_level();
        let expiry = base.expiry();
        if strikes.len() < 3 {
            return Err(FxVolError::InvalidInput {
                message: format!("at least 3 strike pillars required, got {}", strikes.len()),
            });
        }
        for (i, &strike) in strikes.iter().enumerate() {
            validate_positive(strike, "strike")?;
            if i > 0 && strike <= strikes[i - 1] {
                return Err(FxVolError::InvalidInput {
                    message: format!("strike pillars must be strictly increasing at index {i}"),
                });
            }
        }

        // Sample the base smile, optionally densified with midpoints
        let mut xs = Vec::with_capacity(2 * strikes.len());
        for (i, &strike) in strikes.iter().enumerate() {
            xs.push(strike / forward);
            if options.interpolate && i + 1 < strikes.len() {
                xs.push(0.5 * (strike + strikes[i + 1]) / forward);
            }
        }
        let sqrt_t = expiry.sqrt();
        let mut cs = Vec::with_capacity(xs.len());
        for &x in &xs {
            let vol = base.volatility(x * forward)?;
            cs.push(black_price(1.0, x, vol.0 * sqrt_t, OptionType::Call)?);
        }

        let (xs, mut cs) = if options.delete_arbitrage_points {
            delete_non_convex_points(xs, cs)
        } else {
            let repaired = project_convex(&xs, &cs);
            (xs, repaired)
        };

        // Clamp slopes into [-1, 0] and re-anchor, then enforce the intrinsic
        // floor. max with a convex decreasing function keeps both properties.
        clamp_slopes(&xs, &mut cs);
        for (x, c) in xs.iter().zip(cs.iter_mut()) {
            *c = c.max((1.0 - x).max(0.0));
        }

        let mut vols = Vec::with_capacity(xs.len());
        for (&x, &c) in xs.iter().zip(&cs) {
            vols.push(implied_vol(c, 1.0, x, expiry, OptionType::Call)?.0);
        }

        let n = xs.len();
        let last_slope = (cs[n - 1] - cs[n - 2]) / (xs[n - 1] - xs[n - 2]);
        let tail_lambda = if cs[n - 1] > 1e-12 && last_slope < -1e-12 {
            Some(-last_slope / cs[n - 1])
        } else {
            None
        };

        Ok(KahaleSmile {
            forward,
            expiry,
            options,
            xs,
            cs,
            vols,
            tail_lambda,
        })
    }

    /// Moneyness pillars after the repair.
    pub fn moneyness(&self) -> &[f64] {
        &self.xs
    }

    /// Repaired call prices (unit forward) at the pillars.
    pub fn call_prices(&self) -> &[f64] {
        &self.cs
    }

    /// Undiscounted call price (unit forward) at moneyness `x`.
    fn price_at(&self, x: f64) -> error::Result<f64> {
        let n = self.xs.len();
        if x <= self.xs[0] {
            // Left wing: flat vol off the first pillar
            return black_price(1.0, x, self.vols[0] * self.expiry.sqrt(), OptionType::Call);
        }
        if x >= self.xs[n - 1] {
            return match (self.options.exponential_extrapolation, self.tail_lambda) {
                (true, Some(lambda)) => {
                    Ok(self.cs[n - 1] * (-lambda * (x - self.xs[n - 1])).exp())
                }
                _ => black_price(
                    1.0,
                    x,
                    self.vols[n - 1] * self.expiry.sqrt(),
                    OptionType::Call,
                ),
            };
        }
        // Constructor guarantees at least three increasing pillars.
        let i = self.xs.partition_point(|&p| p < x).max(1);
        let (x0, x1) = (self.xs[i - 1], self.xs[i]);
        let (c0, c1) = (self.cs[i - 1], self.cs[i]);
        Ok(c0 + (c1 - c0) * (x - x0) / (x1 - x0))
    }
}

/// Drop interior pillars until the price sequence is convex (lower convex
/// hull in the (x, c) plane). Endpoints always survive.
fn delete_non_convex_points(xs: Vec<f64>, cs: Vec<f64>) -> (Vec<f64>, Vec<f64>) {
    let mut hull_x: Vec<f64> = Vec::with_capacity(xs.len());
    let mut hull_c: Vec<f64> = Vec::with_capacity(cs.len());
    for (&x, &c) in xs.iter().zip(&cs) {
        while hull_x.len() >= 2 {
            let m = hull_x.len();
            let s_prev = (hull_c[m - 1] - hull_c[m - 2]) / (hull_x[m - 1] - hull_x[m - 2]);
            let s_new = (c - hull_c[m - 1]) / (x - hull_x[m - 1]);
            if s_prev > s_new {
                hull_x.pop();
                hull_c.pop();
            } else {
                break;
            }
        }
        hull_x.push(x);
        hull_c.push(c);
    }
    (hull_x, hull_c)
}

/// Project prices onto the convex cone by pooling adjacent slope violators
/// (isotonic regression on slopes, weighted by interval width), keeping the
/// first price as the anchor.
fn project_convex(xs: &[f64], cs: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let mut slopes: Vec<f64> = (1..n)
        .map(|i| (cs[i] - cs[i - 1]) / (xs[i] - xs[i - 1]))
        .collect();
    let widths: Vec<f64> = (1..n).map(|i| xs[i] - xs[i - 1]).collect();

    // (pooled mean, pooled weight, block length)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(slopes.len());
    for (slope, width) in slopes.iter().zip(&widths) {
        let mut mean = *slope;
        let mut weight = *width;
        let mut len = 1;
        while let Some(&(prev_mean, prev_weight, prev_len)) = blocks.last() {
            if prev_mean > mean {
                mean = (mean * weight + prev_mean * prev_weight) / (weight + prev_weight);
                weight += prev_weight;
                len += prev_len;
                blocks.pop();
            } else {
                break;
            }
        }
        blocks.push((mean, weight, len));
    }
    let mut i = 0;
    for (mean, _, len) in blocks {
        for _ in 0..len {
            slopes[i] = mean;
            i += 1;
        }
    }

    let mut repaired = Vec::with_capacity(n);
    repaired.push(cs[0]);
    for i in 1..n {
        let c = repaired[i - 1] + slopes[i - 1] * widths[i - 1];
        repaired.push(c);
    }
    repaired
}

/// Clamp segment slopes into [-1, 0] and rebuild prices from the anchor.
/// Input slopes are already non-decreasing, so clamping preserves convexity.
fn clamp_slopes(xs: &[f64], cs: &mut [f64]) {
    for i in 1..xs.len() {
        let width = xs[i] - xs[i - 1];
        let slope = ((cs[i] - cs[i - 1]) / width).clamp(-1.0, 0.0);
        cs[i] = cs[i - 1] + slope * width;
    }
}

impl SmileSection for KahaleSmile {
    fn volatility(&self, strike: f64) -> error::Result<Vol> {
        validate_positive(strike, "strike")?;
        let x = strike / self.forward;
        let n = self.xs.len();
        if x <= self.xs[0] {
            return Ok(Vol(self.vols[0]));
        }
        if x >= self.xs[n - 1] && !(self.options.exponential_extrapolation
            && self.tail_lambda.is_some())
        {
            return Ok(Vol(self.vols[n - 1]));
        }
        let price = self.price_at(x)?;
        implied_vol(price, 1.0, x, self.expiry, OptionType::Call)
    }

    fn min_strike(&self) -> f64 {
        self.xs[0] * self.forward
    }

    fn max_strike(&self) -> f64 {
        self.xs[self.xs.len() - 1] * self.forward
    }

    fn atm_level(&self) -> f64 {
        self.forward
    }

    fn expiry(&self) -> f64 {
        self.expiry
    }

    /// Verify the repaired pillar prices directly: decreasing, convex, slopes
    /// within the static-arbitrage band. The interior interpolation is linear
    /// in price and cannot reintroduce violations between pillars.
    fn is_arbitrage_free(&self) -> error::Result<ArbitrageReport> {
        const TOL: f64 = 1e-10;
        let n = self.xs.len();
        let mut violations = Vec::new();
        let mut prev_slope = -1.0 - TOL;
        for i in 1..n {
            let slope = (self.cs[i] - self.cs[i - 1]) / (self.xs[i] - self.xs[i - 1]);
            if slope < -1.0 - TOL || slope > TOL || slope < prev_slope - TOL {
                violations.push(ButterflyViolation {
                    strike: self.xs[i] * self.forward,
                    density: slope - prev_slope,
                    magnitude: (slope - prev_slope).abs(),
                });
            }
            prev_slope = slope;
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
    use crate::smile::svi::SviSmile;
    use approx::assert_abs_diff_eq;

    const F: f64 = 1.1172;
    const T: f64 = 0.75;

    fn base_smile() -> SviSmile {
        SviSmile::new(F, T, 0.0016, 0.04, -0.3, 0.0, 0.1).unwrap()
    }

    fn pillars() -> Vec<f64> {
        vec![1.02, 1.07, 1.12, 1.17, 1.22]
    }

    #[test]
    fn clean_base_round_trips_at_pillars() {
        let base = base_smile();
        let smile =
            KahaleSmile::from_section(&base, &pillars(), KahaleOptions::default()).unwrap();
        for &k in &pillars() {
            assert_abs_diff_eq!(
                smile.volatility(k).unwrap().0,
                base.volatility(k).unwrap().0,
                epsilon = 1e-6
            );
        }
        assert!(smile.is_arbitrage_free().unwrap().is_free);
    }

    #[test]
    fn repaired_prices_are_convex_and_decreasing() {
        let base = base_smile();
        let smile =
            KahaleSmile::from_section(&base, &pillars(), KahaleOptions::default()).unwrap();
        let cs = smile.call_prices();
        let xs = smile.moneyness();
        let mut prev_slope = f64::NEG_INFINITY;
        for i in 1..cs.len() {
            let slope = (cs[i] - cs[i - 1]) / (xs[i] - xs[i - 1]);
            assert!(slope <= 1e-12, "prices must be decreasing");
            assert!(slope >= -1.0 - 1e-12, "slope below -1");
            assert!(slope >= prev_slope - 1e-12, "prices must be convex");
            prev_slope = slope;
        }
    }

    #[test]
    fn projection_repairs_concave_pillars() {
        // Hand-built concave price bump at the middle pillar
        let xs = vec![0.9, 0.95, 1.0, 1.05, 1.1];
        let cs = vec![0.12, 0.09, 0.085, 0.05, 0.04];
        let repaired = project_convex(&xs, &cs);
        let mut prev_slope = f64::NEG_INFINITY;
        for i in 1..repaired.len() {
            let slope = (repaired[i] - repaired[i - 1]) / (xs[i] - xs[i - 1]);
            assert!(slope >= prev_slope - 1e-12);
            prev_slope = slope;
        }
        assert_eq!(repaired[0], cs[0]);
    }

    #[test]
    fn hull_deletes_concave_pillar() {
        let xs = vec![0.9, 0.95, 1.0, 1.05, 1.1];
        // The 1.0 pillar sits above the chord of its neighbours
        let cs = vec![0.12, 0.09, 0.088, 0.05, 0.04];
        let (hx, _hc) = delete_non_convex_points(xs, cs);
        assert!(hx.len() < 5);
        assert_eq!(hx[0], 0.9);
        assert_eq!(*hx.last().unwrap(), 1.1);
    }

    #[test]
    fn interpolate_flag_densifies_grid() {
        let base = base_smile();
        let plain =
            KahaleSmile::from_section(&base, &pillars(), KahaleOptions::default()).unwrap();
        let dense = KahaleSmile::from_section(
            &base,
            &pillars(),
            KahaleOptions {
                interpolate: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(dense.moneyness().len(), 2 * plain.moneyness().len() - 1);
    }

    #[test]
    fn exponential_tail_decays_price() {
        let base = base_smile();
        let smile =
            KahaleSmile::from_section(&base, &pillars(), KahaleOptions::default()).unwrap();
        let last = *smile.moneyness().last().unwrap() * F;
        let c_in = smile.price_at(last / F).unwrap();
        let c_out = smile.price_at(1.1 * last / F).unwrap();
        assert!(c_out < c_in);
        assert!(c_out > 0.0);
    }

    #[test]
    fn flat_wings_without_exponential_extrapolation() {
        let base = base_smile();
        let smile = KahaleSmile::from_section(
            &base,
            &pillars(),
            KahaleOptions {
                exponential_extrapolation: false,
                ..Default::default()
            },
        )
        .unwrap();
        let v_edge = smile.volatility(smile.max_strike()).unwrap().0;
        let v_out = smile.volatility(smile.max_strike() * 1.2).unwrap().0;
        assert_abs_diff_eq!(v_edge, v_out, epsilon = 1e-12);
        let v_low_edge = smile.volatility(smile.min_strike()).unwrap().0;
        let v_low_out = smile.volatility(smile.min_strike() * 0.8).unwrap().0;
        assert_abs_diff_eq!(v_low_edge, v_low_out, epsilon = 1e-12);
    }

    #[test]
    fn rejects_bad_pillars() {
        let base = base_smile();
        assert!(KahaleSmile::from_section(&base, &[1.0, 1.1], KahaleOptions::default()).is_err());
        assert!(KahaleSmile::from_section(
            &base,
            &[1.0, 1.1, 1.05],
            KahaleOptions::default()
        )
        .is_err());
    }
}
