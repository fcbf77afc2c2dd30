//! Core domain types for FX volatility surface construction.
//!
//! These newtypes wrap `f64` to provide compile-time type safety, preventing
//! accidental parameter swapping (e.g., passing a strike where a vol is expected).
//!
//! # Newtype Strategy
//!
//! **Outputs use newtypes** — [`Vol`], [`Variance`], [`Strike`] wrap return
//! values so callers can't accidentally mix a volatility with a variance.
//!
//! **Inputs use bare `f64`** — API methods like `volatility(strike: f64)` accept
//! raw floats for ergonomics. Requiring `volatility(Strike(1.1))` at every call
//! site adds ceremony without meaningful safety (the caller already knows they're
//! passing a strike). This is a deliberate trade-off: newtypes guard against
//! *silent* misuse of outputs, while inputs are self-documenting via parameter
//! names.
//!
//! # Why no `Eq` or `Ord`?
//! These types wrap `f64`, which does not implement `Eq` or `Ord` because `NaN`
//! breaks total ordering. We derive `PartialEq` and `PartialOrd` only. Do not
//! add `Eq` without handling `NaN` explicitly.

use serde::{Deserialize, Serialize};

/// Strike price `K` of an option contract, in units of the FX rate
/// (domestic per unit of foreign).
///
/// # Examples
/// ```
/// use fxvolsurf::types::Strike;
/// let strike = Strike(1.1172);
/// assert_eq!(strike.0, 1.1172);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Strike(pub f64);

/// Implied volatility `σ`, measured as annualized standard deviation.
///
/// A vol of 0.20 represents 20% annualized volatility.
///
/// # Examples
/// ```
/// use fxvolsurf::types::Vol;
/// let vol = Vol(0.0483);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Vol(pub f64);

/// Total variance `σ²T` or instantaneous variance `σ²`.
///
/// Variance is the square of volatility. Cross-tenor interpolation is performed
/// in total variance space because total variance must be non-decreasing in
/// time for calendar-arbitrage-free surfaces.
///
/// # Examples
/// ```
/// use fxvolsurf::types::Variance;
/// let var = Variance(0.04); // corresponds to 20% vol over one year
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Variance(pub f64);

/// Option type: call or put.
///
/// In the FX convention a call is the right to buy the foreign currency
/// (sell domestic) at the strike rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    /// Right to buy foreign currency at the strike rate.
    Call,
    /// Right to sell foreign currency at the strike rate.
    Put,
}

impl OptionType {
    /// Sign convention `ω`: `+1.0` for calls, `-1.0` for puts.
    pub fn sign(self) -> f64 {
        match self {
            OptionType::Call => 1.0,
            OptionType::Put => -1.0,
        }
    }
}
