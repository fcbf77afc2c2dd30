//! Fluent construction of [`FxBlackVolatilitySurface`].

use std::sync::Arc;

use chrono::NaiveDate;

use crate::curve::{FlatForwardCurve, YieldCurve};
use crate::error::{FxVolError, Result};
use crate::quotes::{DeltaVolMatrix, VersionedQuote};
use crate::surface::{FxBlackVolatilitySurface, FxMarketConventions, SmileStrategy};
use crate::time::{BusinessDayConvention, Calendar, DayCounter, Period};

/// Builder for [`FxBlackVolatilitySurface`].
///
/// Required: matrix, spot, tenors, reference date and a curve (or flat rate)
/// per currency. Everything else has standard FX defaults: T+2 settlement,
/// weekends-only calendars, Following roll, ACT/365F, SVI smiles.
///
/// ```no_run
/// use fxvolsurf::{DeltaVolMatrix, FxSurfaceBuilder, Period};
/// use chrono::NaiveDate;
///
/// # fn demo(matrix: DeltaVolMatrix) -> fxvolsurf::Result<()> {
/// let reference = NaiveDate::from_ymd_opt(2019, 5, 2).unwrap();
/// let surface = FxSurfaceBuilder::new()
///     .matrix(matrix)
///     .spot(1.1172)
///     .tenors(vec![Period::months(1), Period::months(3), Period::years(1)])
///     .reference_date(reference)
///     .domestic_rate(0.02)
///     .foreign_rate(-0.01)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct FxSurfaceBuilder {
    matrix: Option<DeltaVolMatrix>,
    spot: Option<Arc<VersionedQuote>>,
    tenors: Option<Vec<Period>>,
    reference_date: Option<NaiveDate>,
    domestic: Option<CurveInput>,
    foreign: Option<CurveInput>,
    strategy: SmileStrategy,
    conventions: FxMarketConventions,
}

enum CurveInput {
    Curve(Arc<dyn YieldCurve>),
    FlatRate(f64),
}

impl FxSurfaceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matrix(mut self, matrix: DeltaVolMatrix) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// FX spot as a plain value; a fresh quote handle is created for it.
    pub fn spot(mut self, spot: f64) -> Self {
        self.spot = Some(Arc::new(VersionedQuote::new(spot)));
        self
    }

    /// FX spot as a live quote handle shared with the caller.
    pub fn spot_quote(mut self, spot: Arc<VersionedQuote>) -> Self {
        self.spot = Some(spot);
        self
    }

    pub fn tenors(mut self, tenors: Vec<Period>) -> Self {
        self.tenors = Some(tenors);
        self
    }

    pub fn reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn domestic_curve(mut self, curve: Arc<dyn YieldCurve>) -> Self {
        self.domestic = Some(CurveInput::Curve(curve));
        self
    }

    pub fn foreign_curve(mut self, curve: Arc<dyn YieldCurve>) -> Self {
        self.foreign = Some(CurveInput::Curve(curve));
        self
    }

    /// Flat continuously compounded domestic rate; a [`FlatForwardCurve`] at
    /// the reference date is created at build time.
    pub fn domestic_rate(mut self, rate: f64) -> Self {
        self.domestic = Some(CurveInput::FlatRate(rate));
        self
    }

    /// Flat continuously compounded foreign rate.
    pub fn foreign_rate(mut self, rate: f64) -> Self {
        self.foreign = Some(CurveInput::FlatRate(rate));
        self
    }

    pub fn strategy(mut self, strategy: SmileStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn fx_spot_days(mut self, days: u32) -> Self {
        self.conventions.fx_spot_days = days;
        self
    }

    pub fn advance_calendar(mut self, calendar: Calendar) -> Self {
        self.conventions.advance_calendar = calendar;
        self
    }

    pub fn adjust_calendar(mut self, calendar: Calendar) -> Self {
        self.conventions.adjust_calendar = calendar;
        self
    }

    pub fn fx_fixing_calendar(mut self, calendar: Calendar) -> Self {
        self.conventions.fx_fixing_calendar = calendar;
        self
    }

    pub fn business_day_convention(mut self, convention: BusinessDayConvention) -> Self {
        self.conventions.business_day_convention = convention;
        self
    }

    pub fn day_counter(mut self, day_counter: DayCounter) -> Self {
        self.conventions.day_counter = day_counter;
        self
    }

    /// Validate the configuration and construct the surface.
    ///
    /// # Errors
    /// Returns [`FxVolError::InvalidInput`] when a required input is missing
    /// or the surface constructor rejects the configuration.
    pub fn build(self) -> Result<FxBlackVolatilitySurface> {
        let matrix = required(self.matrix, "a delta vol matrix")?;
        let spot = required(self.spot, "an FX spot quote")?;
        let tenors = required(self.tenors, "option tenors")?;
        let reference_date = required(self.reference_date, "a reference date")?;
        let domestic = resolve_curve(required(self.domestic, "a domestic curve")?, reference_date);
        let foreign = resolve_curve(required(self.foreign, "a foreign curve")?, reference_date);

        #[cfg(feature = "logging")]
        tracing::info!(
            n_tenors = tenors.len(),
            quotes_per_smile = matrix.quotes_per_smile(),
            strategy = ?self.strategy,
            %reference_date,
            "building FX vol surface"
        );

        FxBlackVolatilitySurface::new(
            matrix,
            spot,
            tenors,
            reference_date,
            domestic,
            foreign,
            self.strategy,
            self.conventions,
        )
    }
}

fn required<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| FxVolError::InvalidInput {
        message: format!("surface builder requires {what}"),
    })
}

fn resolve_curve(input: CurveInput, reference_date: NaiveDate) -> Arc<dyn YieldCurve> {
    match input {
        CurveInput::Curve(curve) => curve,
        CurveInput::FlatRate(rate) => Arc::new(FlatForwardCurve::new(reference_date, rate)),
    }
}
