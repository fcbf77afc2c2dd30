//! The FX Black volatility surface.
//!
//! The surface owns a delta-quoted vol matrix, the FX spot quote and the two
//! discount curves. Queries go through three layers:
//!
//! 1. quotes are canonicalized once per market-data version into forward
//!    delta / delta-neutral ATM vols ([`FxBlackVolatilitySurface::vol_matrix`]);
//! 2. canonical vols interpolate across expiry in total variance, one curve
//!    per delta pillar;
//! 3. at the queried expiry the interpolated vols are turned back into
//!    strikes and a smile is calibrated per [`SmileStrategy`], cached by
//!    exact expiry time.
//!
//! Market-data changes are detected by comparing a sum of upstream version
//! counters instead of observer callbacks; derived state rebuilds lazily on
//! the next query.

pub mod builder;

pub use builder::FxSurfaceBuilder;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;

use crate::cache::{SmileCache, DEFAULT_MAX_SMILES};
use crate::curve::{BlackVarianceCurve, YieldCurve};
use crate::delta::BlackDeltaCalculator;
use crate::error::{FxVolError, Result};
use crate::quotes::{AtmType, DeltaType, DeltaVolMatrix, VersionedQuote};
use crate::smile::{
    ArbitrageReport, FxSmile, KahaleOptions, KahaleSmile, SabrSmile, SmileSection, SviFitOptions,
    SviSmile,
};
use crate::time::{BusinessDayConvention, Calendar, DayCounter, Period, TimeUnit};
use crate::types::{Variance, Vol};
use crate::validate::{validate_non_negative, validate_positive};

/// A Black volatility surface queryable by expiry time and strike.
pub trait VolSurface: Send + Sync {
    /// Implied Black volatility for the given expiry (years) and strike.
    fn black_vol(&self, expiry: f64, strike: f64) -> Result<Vol>;

    /// Total Black variance σ²(T, K)·T; zero at or before the reference date.
    fn black_variance(&self, expiry: f64, strike: f64) -> Result<Variance> {
        if expiry <= 0.0 {
            return Ok(Variance(0.0));
        }
        let vol = self.black_vol(expiry, strike)?;
        Ok(Variance(vol.0 * vol.0 * expiry))
    }
}

/// Which smile model the surface calibrates at each expiry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SmileStrategy {
    /// SVI smile per expiry (Gatheral). The default.
    #[default]
    Svi,
    /// SABR with β = 0.5, analytic α from the ATM pillar and a backbone
    /// shape exponent.
    Sabr {
        /// Shape exponent; 1 recovers plain SABR.
        gamma: f64,
    },
    /// SVI base smile wrapped in a Kahalé arbitrage repair.
    Kahale {
        /// Densify pillars with midpoints before repairing.
        interpolate: bool,
        /// Exponential price tail on the right wing.
        exponential_extrapolation: bool,
        /// Drop non-convex pillars instead of projecting their prices.
        delete_arbitrage_points: bool,
    },
}

/// Market conventions for FX date arithmetic.
#[derive(Debug, Clone)]
pub struct FxMarketConventions {
    /// Settlement lag between fixing and spot, in business days.
    pub fx_spot_days: u32,
    /// Calendar used to advance tenors and count settlement days.
    pub advance_calendar: Calendar,
    /// Extra calendar joined in when adjusting delivery dates.
    pub adjust_calendar: Calendar,
    /// Calendar of valid FX fixing dates.
    pub fx_fixing_calendar: Calendar,
    pub business_day_convention: BusinessDayConvention,
    pub day_counter: DayCounter,
}

impl Default for FxMarketConventions {
    fn default() -> Self {
        FxMarketConventions {
            fx_spot_days: 2,
            advance_calendar: Calendar::WeekendsOnly,
            adjust_calendar: Calendar::Null,
            fx_fixing_calendar: Calendar::WeekendsOnly,
            business_day_convention: BusinessDayConvention::Following,
            day_counter: DayCounter::Act365Fixed,
        }
    }
}

/// Derived state rebuilt whenever upstream market data changes.
struct DerivedState {
    /// Version sum the state was built from; `None` before the first build.
    version: Option<u64>,
    /// Canonical vols (forward delta, delta-neutral ATM), row per expiry.
    vol_matrix: Vec<Vec<f64>>,
    /// One total variance curve per delta pillar.
    curves: Vec<BlackVarianceCurve>,
    cache: SmileCache,
}

/// Arbitrage-aware FX implied volatility surface built from delta quotes.
pub struct FxBlackVolatilitySurface {
    matrix: DeltaVolMatrix,
    spot: Arc<VersionedQuote>,
    option_tenors: Vec<Period>,
    domestic: Arc<dyn YieldCurve>,
    foreign: Arc<dyn YieldCurve>,
    strategy: SmileStrategy,
    conventions: FxMarketConventions,
    joint_calendar: Calendar,
    reference_date: NaiveDate,
    fx_spot_date: NaiveDate,
    option_dates: Vec<NaiveDate>,
    option_times: Vec<f64>,
    state: Mutex<DerivedState>,
}

impl std::fmt::Debug for FxBlackVolatilitySurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FxBlackVolatilitySurface")
            .field("reference_date", &self.reference_date)
            .field("option_tenors", &self.option_tenors)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl FxBlackVolatilitySurface {
    /// Construct a surface; prefer [`FxSurfaceBuilder`] for the ergonomic form.
    ///
    /// # Errors
    /// Returns [`FxVolError::InvalidInput`] when the reference date is not a
    /// fixing day, curve reference dates disagree, or tenors produce
    /// non-increasing option dates.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        matrix: DeltaVolMatrix,
        spot: Arc<VersionedQuote>,
        option_tenors: Vec<Period>,
        reference_date: NaiveDate,
        domestic: Arc<dyn YieldCurve>,
        foreign: Arc<dyn YieldCurve>,
        strategy: SmileStrategy,
        conventions: FxMarketConventions,
    ) -> Result<Self> {
        validate_positive(spot.value(), "fx spot")?;
        if option_tenors.len() != matrix.n_smiles() {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "mismatch between {} option tenors and {} vol matrix rows",
                    option_tenors.len(),
                    matrix.n_smiles()
                ),
            });
        }
        if !conventions.fx_fixing_calendar.is_business_day(reference_date) {
            return Err(FxVolError::InvalidInput {
                message: format!("FX fixing date {reference_date} is not valid"),
            });
        }
        for (name, curve) in [("domestic", &domestic), ("foreign", &foreign)] {
            if curve.reference_date() != reference_date {
                return Err(FxVolError::InvalidInput {
                    message: format!(
                        "reference date of {name} term structure ({}) must match that of the \
                         volatility surface ({reference_date})",
                        curve.reference_date()
                    ),
                });
            }
        }
        if let SmileStrategy::Sabr { gamma } = strategy {
            validate_positive(gamma, "gamma")?;
        }

        let joint_calendar = Calendar::joint(
            conventions.advance_calendar.clone(),
            conventions.adjust_calendar.clone(),
        );
        let fx_spot_date = spot_date(&conventions, &joint_calendar, reference_date);

        let mut option_dates = Vec::with_capacity(option_tenors.len());
        let mut option_times = Vec::with_capacity(option_tenors.len());
        for (i, &tenor) in option_tenors.iter().enumerate() {
            let date = option_date_from_tenor(&conventions, &joint_calendar, fx_spot_date, tenor);
            if date <= reference_date {
                return Err(FxVolError::InvalidInput {
                    message: format!(
                        "option date {date} for tenor {tenor} must be after the reference date \
                         ({reference_date})"
                    ),
                });
            }
            if let Some(&prev) = option_dates.last() {
                if date <= prev {
                    return Err(FxVolError::InvalidInput {
                        message: format!("option dates must be increasing at tenor index {i}"),
                    });
                }
            }
            option_times.push(conventions.day_counter.year_fraction(reference_date, date));
            option_dates.push(date);
        }

        Ok(FxBlackVolatilitySurface {
            matrix,
            spot,
            option_tenors,
            domestic,
            foreign,
            strategy,
            conventions,
            joint_calendar,
            reference_date,
            fx_spot_date,
            option_dates,
            option_times,
            state: Mutex::new(DerivedState {
                version: None,
                vol_matrix: Vec::new(),
                curves: Vec::new(),
                cache: SmileCache::new(DEFAULT_MAX_SMILES),
            }),
        })
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    /// Spot settlement date derived from the reference (fixing) date.
    pub fn fx_spot_date(&self) -> NaiveDate {
        self.fx_spot_date
    }

    pub fn option_tenors(&self) -> &[Period] {
        &self.option_tenors
    }

    pub fn option_dates(&self) -> &[NaiveDate] {
        &self.option_dates
    }

    pub fn option_times(&self) -> &[f64] {
        &self.option_times
    }

    /// Last quoted option date.
    pub fn max_date(&self) -> NaiveDate {
        // Constructor guarantees at least one tenor.
        self.option_dates.last().copied().unwrap_or(self.reference_date)
    }

    pub fn max_time(&self) -> f64 {
        self.option_times.last().copied().unwrap_or(0.0)
    }

    pub fn min_strike(&self) -> f64 {
        0.0
    }

    pub fn max_strike(&self) -> f64 {
        f64::INFINITY
    }

    pub fn strategy(&self) -> SmileStrategy {
        self.strategy
    }

    /// Raw quote matrix, with live quote handles.
    pub fn delta_vol_matrix(&self) -> &DeltaVolMatrix {
        &self.matrix
    }

    /// FX forward at time `t`.
    ///
    /// This is an approximation: the forward should technically be computed
    /// by discounting from the delivery date corresponding to `t` back to
    /// the FX spot date. Determining that delivery date is problematic,
    /// since there is no easy map from times to dates.
    pub fn forward_value(&self, t: f64) -> f64 {
        let df_dom = self.domestic.discount(t);
        let df_for = self.foreign.discount(t);
        self.spot.value() * df_for / df_dom
    }

    /// Strikes corresponding to the per-pillar vols at time `t` under the
    /// given quoting conventions.
    pub fn strikes_from_vols(
        &self,
        t: f64,
        vols: &[f64],
        delta_type: DeltaType,
        atm_type: AtmType,
    ) -> Result<Vec<f64>> {
        if vols.len() != self.matrix.quotes_per_smile() {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "vector of vols must be of length {}",
                    self.matrix.quotes_per_smile()
                ),
            });
        }
        validate_positive(t, "t")?;
        let sqrt_t = t.sqrt();
        let spot = self.spot.value();
        let d_dom = self.domestic.discount(t);
        let d_for = self.foreign.discount(t);

        let mut strikes = Vec::with_capacity(vols.len());
        for (&delta, &vol) in self.matrix.deltas().iter().zip(vols) {
            let option_type = match delta {
                Some(d) if d < 0.0 => crate::types::OptionType::Put,
                _ => crate::types::OptionType::Call,
            };
            let calc = BlackDeltaCalculator::new(
                option_type,
                delta_type,
                spot,
                d_dom,
                d_for,
                sqrt_t * vol,
            )?;
            let strike = match delta {
                Some(d) => calc.strike_from_delta(d)?,
                None => calc.atm_strike(atm_type)?,
            };
            strikes.push(strike);
        }
        Ok(strikes)
    }

    /// Combined version of every upstream input.
    fn upstream_version(&self) -> u64 {
        self.matrix
            .version_sum()
            .wrapping_add(self.spot.version())
            .wrapping_add(self.domestic.version())
            .wrapping_add(self.foreign.version())
    }

    fn lock_state(&self) -> MutexGuard<'_, DerivedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuild canonical vols and pillar curves if market data moved.
    fn ensure_calculated(&self) -> Result<MutexGuard<'_, DerivedState>> {
        let mut state = self.lock_state();
        let current = self.upstream_version();
        if state.version != Some(current) {
            #[cfg(feature = "logging")]
            tracing::debug!(version = current, "rebuilding FX vol surface state");

            let vol_matrix = self.convert_quotes()?;
            let mut curves = Vec::with_capacity(self.matrix.quotes_per_smile());
            for j in 0..self.matrix.quotes_per_smile() {
                let column: Vec<f64> = vol_matrix.iter().map(|row| row[j]).collect();
                curves.push(BlackVarianceCurve::new(self.option_times.clone(), column)?);
            }
            state.vol_matrix = vol_matrix;
            state.curves = curves;
            state.cache.clear();
            state.version = Some(current);
        }
        Ok(state)
    }

    /// Canonicalize each quote row to forward delta / delta-neutral ATM.
    ///
    /// Rows already in the canonical conventions pass through untouched, so
    /// the conversion is idempotent. For other rows a smile is calibrated at
    /// the quoted strikes and re-read at the canonical ones.
    fn convert_quotes(&self) -> Result<Vec<Vec<f64>>> {
        let mut converted = Vec::with_capacity(self.matrix.n_smiles());
        for (i, row) in self.matrix.rows().iter().enumerate() {
            let mut vols: Vec<f64> = row.iter().map(|q| q.value()).collect();
            let delta_type = row[0].delta_type();
            let atm_type = row[self.matrix.atm_index()].atm_type();

            if delta_type != DeltaType::Fwd || atm_type != AtmType::AtmDeltaNeutral {
                let t = self.option_times[i];
                let current_strikes = self.strikes_from_vols(t, &vols, delta_type, atm_type)?;
                let smile = self.build_smile(t, &current_strikes, &vols)?;
                let required_strikes =
                    self.strikes_from_vols(t, &vols, DeltaType::Fwd, AtmType::AtmDeltaNeutral)?;
                for (vol, &strike) in vols.iter_mut().zip(&required_strikes) {
                    *vol = smile.volatility(strike)?.0;
                }
            }
            converted.push(vols);
        }
        Ok(converted)
    }

    /// Calibrate a smile at `t` per the surface's strategy.
    fn build_smile(&self, t: f64, strikes: &[f64], vols: &[f64]) -> Result<FxSmile> {
        let forward = self.forward_value(t);
        match self.strategy {
            SmileStrategy::Svi => Ok(FxSmile::Svi(SviSmile::fit(
                forward,
                t,
                strikes,
                vols,
                &SviFitOptions::default(),
            )?)),
            SmileStrategy::Sabr { gamma } => {
                Ok(FxSmile::Sabr(SabrSmile::fit(forward, t, strikes, vols, gamma)?))
            }
            SmileStrategy::Kahale {
                interpolate,
                exponential_extrapolation,
                delete_arbitrage_points,
            } => {
                let base = SviSmile::fit(forward, t, strikes, vols, &SviFitOptions::default())?;
                let options = KahaleOptions {
                    interpolate,
                    exponential_extrapolation,
                    delete_arbitrage_points,
                };
                Ok(FxSmile::Kahale(KahaleSmile::from_section(
                    &base, strikes, options,
                )?))
            }
        }
    }

    /// Smile section at expiry time `t > 0`, cached by exact time.
    pub fn smile_section(&self, t: f64) -> Result<Arc<FxSmile>> {
        validate_positive(t, "option time")?;
        let mut state = self.ensure_calculated()?;
        if let Some(smile) = state.cache.fetch(t) {
            return Ok(smile);
        }

        // Interpolate each pillar vol in time, map back to strikes, calibrate
        let vols: Vec<f64> = state
            .curves
            .iter()
            .map(|curve| curve.vol(t).map(|v| v.0))
            .collect::<Result<_>>()?;
        let strikes = self.strikes_from_vols(t, &vols, DeltaType::Fwd, AtmType::AtmDeltaNeutral)?;
        let smile = Arc::new(self.build_smile(t, &strikes, &vols)?);
        state.cache.insert(t, Arc::clone(&smile));
        Ok(smile)
    }

    /// Smile section for an option expiring on `date`.
    pub fn smile_section_at_date(&self, date: NaiveDate) -> Result<Arc<FxSmile>> {
        if date <= self.reference_date {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "option date {date} must be after the reference date ({})",
                    self.reference_date
                ),
            });
        }
        let t = self
            .conventions
            .day_counter
            .year_fraction(self.reference_date, date);
        self.smile_section(t)
    }

    /// Smile section for a market tenor, using the surface's date roll.
    pub fn smile_section_at_tenor(&self, tenor: Period) -> Result<Arc<FxSmile>> {
        let date = option_date_from_tenor(
            &self.conventions,
            &self.joint_calendar,
            self.fx_spot_date,
            tenor,
        );
        self.smile_section_at_date(date)
    }

    /// Canonical vol matrix (forward delta, delta-neutral ATM), rebuilt from
    /// live quotes as needed.
    pub fn vol_matrix(&self) -> Result<Vec<Vec<f64>>> {
        Ok(self.ensure_calculated()?.vol_matrix.clone())
    }

    /// Butterfly arbitrage check of the calibrated smile at every quoted
    /// expiry, merged into one report.
    pub fn arbitrage_report(&self) -> Result<ArbitrageReport> {
        let mut report = ArbitrageReport::clean();
        for &t in &self.option_times {
            let smile = self.smile_section(t)?;
            report = report.merge(&smile.is_arbitrage_free()?);
        }
        Ok(report)
    }
}

impl VolSurface for FxBlackVolatilitySurface {
    /// Implied vol at `(expiry, strike)`.
    ///
    /// For expiries before the first quoted pillar the first smile is reused
    /// at constant moneyness: the strike is rescaled by the ratio of the
    /// forwards so flat backwards extrapolation happens along forward lines.
    fn black_vol(&self, expiry: f64, strike: f64) -> Result<Vol> {
        validate_non_negative(expiry, "expiry")?;
        validate_positive(strike, "strike")?;
        let first = self.option_times[0];
        if expiry < first {
            let fwd1 = self.forward_value(first);
            let fwd2 = self.forward_value(expiry);
            self.smile_section(first)?.volatility(strike * fwd2 / fwd1)
        } else {
            self.smile_section(expiry)?.volatility(strike)
        }
    }
}

fn spot_date(
    conventions: &FxMarketConventions,
    joint_calendar: &Calendar,
    fixing_date: NaiveDate,
) -> NaiveDate {
    if conventions.fx_spot_days == 0 {
        // Advancing by zero days would still adjust the date; the fixing
        // date is the spot date in this case.
        fixing_date
    } else {
        let d = conventions
            .advance_calendar
            .advance_business_days(fixing_date, conventions.fx_spot_days as i64);
        joint_calendar.adjust(d, BusinessDayConvention::Following)
    }
}

fn option_date_from_tenor(
    conventions: &FxMarketConventions,
    joint_calendar: &Calendar,
    fx_spot_date: NaiveDate,
    tenor: Period,
) -> NaiveDate {
    // Short tenors roll Following; month and year tenors roll
    // ModifiedFollowing with end-of-month preservation.
    let bdc = match tenor.unit() {
        TimeUnit::Days | TimeUnit::Weeks => BusinessDayConvention::Following,
        TimeUnit::Months | TimeUnit::Years => BusinessDayConvention::ModifiedFollowing,
    };
    let delivery_date = joint_calendar.advance(fx_spot_date, tenor, bdc, true);
    // Roll the delivery date back by the settlement lag to the fixing date
    conventions
        .advance_calendar
        .advance_business_days(delivery_date, -(conventions.fx_spot_days as i64))
}
