//! Undiscounted Black-76 pricing and implied volatility extraction.
//!
//! All prices here are forward (undiscounted) prices: `C = F·Φ(d1) − K·Φ(d2)`.
//! Discounting is applied by callers where it matters; the smile and local-vol
//! machinery works entirely in forward terms.

use crate::error::{FxVolError, Result};
use crate::math::{normal_cdf, normal_pdf};
use crate::types::{OptionType, Vol};
use crate::validate::{validate_non_negative, validate_positive};

/// Undiscounted Black price of a European option on the forward.
///
/// `std_dev` is the total standard deviation `σ√T`. Accepts `std_dev == 0`,
/// in which case the intrinsic value is returned.
pub fn black_price(forward: f64, strike: f64, std_dev: f64, option_type: OptionType) -> Result<f64> {
    validate_positive(forward, "forward")?;
    validate_positive(strike, "strike")?;
    validate_non_negative(std_dev, "std_dev")?;

    let omega = option_type.sign();
    if std_dev == 0.0 {
        return Ok((omega * (forward - strike)).max(0.0));
    }
    let d1 = ((forward / strike).ln() + 0.5 * std_dev * std_dev) / std_dev;
    let d2 = d1 - std_dev;
    Ok(omega * (forward * normal_cdf(omega * d1) - strike * normal_cdf(omega * d2)))
}

/// Black vega with respect to the total standard deviation `σ√T`.
fn black_std_dev_vega(forward: f64, strike: f64, std_dev: f64) -> f64 {
    let d1 = ((forward / strike).ln() + 0.5 * std_dev * std_dev) / std_dev;
    forward * normal_pdf(d1)
}

/// Invert the undiscounted Black formula for the implied volatility.
///
/// Uses a safeguarded Newton iteration on the total standard deviation,
/// falling back to bisection steps when Newton leaves the bracket. The price
/// must lie strictly between the intrinsic value and its upper no-arbitrage
/// bound (`F` for calls, `K` for puts).
pub fn implied_vol(
    price: f64,
    forward: f64,
    strike: f64,
    expiry: f64,
    option_type: OptionType,
) -> Result<Vol> {
    validate_positive(forward, "forward")?;
    validate_positive(strike, "strike")?;
    validate_positive(expiry, "expiry")?;
    validate_non_negative(price, "price")?;

    let omega = option_type.sign();
    let intrinsic = (omega * (forward - strike)).max(0.0);
    let upper = match option_type {
        OptionType::Call => forward,
        OptionType::Put => strike,
    };
    if price < intrinsic - 1e-14 || price > upper + 1e-14 {
        return Err(FxVolError::NumericalError {
            message: format!(
                "price {price} outside no-arbitrage bounds [{intrinsic}, {upper}] \
                 for forward {forward}, strike {strike}"
            ),
        });
    }
    // At (or numerically on) the intrinsic boundary the inversion is
    // degenerate; report a zero vol rather than iterating on noise.
    if price - intrinsic < 1e-14 {
        return Ok(Vol(0.0));
    }

    let mut lo = 1e-6_f64;
    let mut hi = 10.0_f64;
    let mut s = 0.2 * expiry.sqrt();

    for _ in 0..100 {
        let p = black_price(forward, strike, s, option_type)?;
        let diff = p - price;
        if diff.abs() < 1e-14 {
            return Ok(Vol(s / expiry.sqrt()));
        }
        if diff > 0.0 {
            hi = s;
        } else {
            lo = s;
        }
        let vega = black_std_dev_vega(forward, strike, s);
        let newton = s - diff / vega;
        s = if vega > 1e-12 && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
        if hi - lo < 1e-14 {
            break;
        }
    }
    Ok(Vol(s / expiry.sqrt()))
}
