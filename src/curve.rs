//! Discount curves and the per-pillar total variance curve.
//!
//! The surface needs two yield curves (domestic and foreign) for forwards and
//! delta conversion, plus one [`BlackVarianceCurve`] per delta pillar for
//! interpolating quoted vols across expiries in total variance space.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::{FxVolError, Result};
use crate::quotes::VersionedQuote;
use crate::time::DayCounter;
use crate::types::{Variance, Vol};
use crate::validate::validate_positive;

/// Discounting term structure.
///
/// `version` participates in the surface's change detection; implementations
/// backed by live quotes should bump it on every update.
pub trait YieldCurve: Send + Sync {
    fn reference_date(&self) -> NaiveDate;

    /// Discount factor for a year fraction `t >= 0` from the reference date.
    fn discount(&self, t: f64) -> f64;

    /// Monotonic change counter; static curves may leave the default.
    fn version(&self) -> u64 {
        0
    }
}

/// Continuously-compounded flat forward curve backed by a live rate quote.
#[derive(Debug)]
pub struct FlatForwardCurve {
    reference_date: NaiveDate,
    rate: Arc<VersionedQuote>,
    day_counter: DayCounter,
}

impl FlatForwardCurve {
    pub fn new(reference_date: NaiveDate, rate: f64) -> Self {
        Self::with_quote(reference_date, Arc::new(VersionedQuote::new(rate)))
    }

    pub fn with_quote(reference_date: NaiveDate, rate: Arc<VersionedQuote>) -> Self {
        FlatForwardCurve {
            reference_date,
            rate,
            day_counter: DayCounter::Act365Fixed,
        }
    }

    pub fn rate(&self) -> &Arc<VersionedQuote> {
        &self.rate
    }

    pub fn day_counter(&self) -> DayCounter {
        self.day_counter
    }
}

impl YieldCurve for FlatForwardCurve {
    fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    fn discount(&self, t: f64) -> f64 {
        (-self.rate.value() * t.max(0.0)).exp()
    }

    fn version(&self) -> u64 {
        self.rate.version()
    }
}

/// Piecewise-linear total variance curve through `(t_i, σ_i² t_i)` nodes.
///
/// Interpolation is linear in total variance with an implicit node at the
/// origin; queries beyond the last node extrapolate with the final segment's
/// slope. Total variance is not required to be non-decreasing here: calendar
/// arbitrage in the inputs is surfaced downstream by the local-vol layer
/// rather than rejected at construction.
#[derive(Debug, Clone)]
pub struct BlackVarianceCurve {
    times: Vec<f64>,
    variances: Vec<f64>,
}

impl BlackVarianceCurve {
    pub fn new(times: Vec<f64>, vols: Vec<f64>) -> Result<Self> {
        if times.is_empty() || times.len() != vols.len() {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "variance curve needs matching non-empty grids, got {} times and {} vols",
                    times.len(),
                    vols.len()
                ),
            });
        }
        for (i, &t) in times.iter().enumerate() {
            validate_positive(t, "expiry time")?;
            validate_positive(vols[i], "vol")?;
            if i > 0 && t <= times[i - 1] {
                return Err(FxVolError::InvalidInput {
                    message: format!("expiry times must be strictly increasing at index {i}"),
                });
            }
        }
        let variances = times
            .iter()
            .zip(&vols)
            .map(|(&t, &v)| v * v * t)
            .collect();
        Ok(BlackVarianceCurve { times, variances })
    }

    /// Total variance at `t`, zero at or before the origin.
    pub fn total_variance(&self, t: f64) -> Variance {
        if t <= 0.0 {
            return Variance(0.0);
        }
        let n = self.times.len();
        if t <= self.times[0] {
            return Variance(self.variances[0] * t / self.times[0]);
        }
        for i in 1..n {
            if t <= self.times[i] {
                let w = self.variances[i - 1]
                    + (self.variances[i] - self.variances[i - 1])
                        * (t - self.times[i - 1])
                        / (self.times[i] - self.times[i - 1]);
                return Variance(w);
            }
        }
        // Constant-slope extrapolation off the last segment
        let slope = if n > 1 {
            (self.variances[n - 1] - self.variances[n - 2])
                / (self.times[n - 1] - self.times[n - 2])
        } else {
            self.variances[0] / self.times[0]
        };
        Variance(self.variances[n - 1] + slope * (t - self.times[n - 1]))
    }

    /// Interpolated vol at `t > 0`.
    pub fn vol(&self, t: f64) -> Result<Vol> {
        validate_positive(t, "t")?;
        let w = self.total_variance(t).0;
        if w < 0.0 {
            return Err(FxVolError::NumericalError {
                message: format!("negative total variance {w} at t = {t}"),
            });
        }
        Ok(Vol((w / t).sqrt()))
    }

    pub fn max_time(&self) -> f64 {
        // Constructor guarantees a non-empty grid.
        self.times.last().copied().unwrap_or(0.0)
    }
}
