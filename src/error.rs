//! Error types for the fxvolsurf library.
//!
//! All fallible operations return `Result<T, FxVolError>` rather than panicking,
//! providing meaningful diagnostics for calibration failures, invalid market
//! data, and numerical issues.

use thiserror::Error;

/// Convenience type alias for results in this crate.
pub type Result<T> = std::result::Result<T, FxVolError>;

/// Errors that can occur during surface construction and queries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FxVolError {
    /// Smile calibration failed to converge.
    #[error("calibration failed: {message}")]
    CalibrationError {
        message: String,
        /// Model that failed (e.g., "SVI", "SABR").
        model: &'static str,
        /// Final RMS error at convergence, if available.
        rms_error: Option<f64>,
    },

    /// Market data or query input is invalid (e.g., negative vol, mixed delta
    /// conventions in a row, non-increasing expiries).
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Numerical computation failed (e.g., NaN, ill-conditioned matrix,
    /// implied vol inversion out of bounds).
    #[error("numerical error: {message}")]
    NumericalError { message: String },

    /// Arbitrage violation detected in a smile or across expiries.
    #[error("arbitrage detected: {message}")]
    ArbitrageViolation { message: String },
}
