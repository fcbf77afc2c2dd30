//! Arbitrage detection for volatility smiles.
//!
//! Butterfly arbitrage occurs when the risk-neutral density implied by option
//! prices becomes negative, violating the no-arbitrage condition.
//!
//! # References
//! - Breeden, D.T. & Litzenberger, R.H. "Prices of State-Contingent Claims
//!   Implicit in Option Prices" (1978)

use serde::{Deserialize, Serialize};

/// Report on arbitrage-freeness of a smile or surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageReport {
    /// Whether the smile/surface is free of detected arbitrage.
    pub is_free: bool,
    /// Butterfly spread violations (negative density regions).
    pub butterfly_violations: Vec<ButterflyViolation>,
}

impl ArbitrageReport {
    /// Create a report indicating no arbitrage was found.
    pub fn clean() -> Self {
        Self {
            is_free: true,
            butterfly_violations: Vec::new(),
        }
    }

    /// Merge two reports, combining all violations.
    ///
    /// The merged report is arbitrage-free only if both source reports are free.
    ///
    /// # Examples
    ///
    /// ```
    /// use fxvolsurf::smile::{ArbitrageReport, ButterflyViolation};
    ///
    /// let clean = ArbitrageReport::clean();
    /// let violated = ArbitrageReport {
    ///     is_free: false,
    ///     butterfly_violations: vec![ButterflyViolation {
    ///         strike: 1.05, density: -0.001, magnitude: 0.001,
    ///     }],
    /// };
    /// let merged = clean.merge(&violated);
    /// assert!(!merged.is_free);
    /// assert_eq!(merged.butterfly_violations.len(), 1);
    /// ```
    pub fn merge(&self, other: &ArbitrageReport) -> ArbitrageReport {
        let mut violations = self.butterfly_violations.clone();
        violations.extend(other.butterfly_violations.iter().cloned());
        ArbitrageReport {
            is_free: self.is_free && other.is_free,
            butterfly_violations: violations,
        }
    }

    /// Return the worst (largest magnitude) butterfly violation, if any.
    pub fn worst_violation(&self) -> Option<&ButterflyViolation> {
        self.butterfly_violations.iter().max_by(|a, b| {
            a.magnitude
                .partial_cmp(&b.magnitude)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// A butterfly spread arbitrage violation at a specific strike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButterflyViolation {
    /// Strike where the violation occurs.
    pub strike: f64,
    /// Risk-neutral density value (negative indicates violation).
    pub density: f64,
    /// Absolute magnitude of the violation.
    pub magnitude: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_violation(strike: f64, density: f64) -> ButterflyViolation {
        ButterflyViolation {
            strike,
            density,
            magnitude: density.abs(),
        }
    }

    fn violated_report() -> ArbitrageReport {
        ArbitrageReport {
            is_free: false,
            butterfly_violations: vec![make_violation(1.02, -0.001), make_violation(1.05, -0.005)],
        }
    }

    #[test]
    fn merge_two_clean_reports() {
        let merged = ArbitrageReport::clean().merge(&ArbitrageReport::clean());
        assert!(merged.is_free);
        assert!(merged.butterfly_violations.is_empty());
    }

    #[test]
    fn merge_clean_and_violated() {
        let merged = ArbitrageReport::clean().merge(&violated_report());
        assert!(!merged.is_free);
        assert_eq!(merged.butterfly_violations.len(), 2);

        let merged = violated_report().merge(&ArbitrageReport::clean());
        assert!(!merged.is_free);
        assert_eq!(merged.butterfly_violations.len(), 2);
    }

    #[test]
    fn merge_preserves_violation_data() {
        let a = ArbitrageReport {
            is_free: false,
            butterfly_violations: vec![make_violation(1.08, -0.007)],
        };
        let merged = a.merge(&ArbitrageReport::clean());
        let v = &merged.butterfly_violations[0];
        assert_eq!(v.strike, 1.08);
        assert_eq!(v.density, -0.007);
        assert_eq!(v.magnitude, 0.007);
    }

    #[test]
    fn worst_violation_clean_report_returns_none() {
        assert!(ArbitrageReport::clean().worst_violation().is_none());
    }

    #[test]
    fn worst_violation_picks_largest_magnitude() {
        let report = ArbitrageReport {
            is_free: false,
            butterfly_violations: vec![
                make_violation(1.02, -0.001),
                make_violation(1.05, -0.010),
                make_violation(1.10, -0.005),
            ],
        };
        let worst = report.worst_violation().unwrap();
        assert_eq!(worst.strike, 1.05);
        assert_eq!(worst.magnitude, 0.010);
    }

    #[test]
    fn serde_round_trip() {
        let report = violated_report();
        let json = serde_json::to_string(&report).unwrap();
        let back: ArbitrageReport = serde_json::from_str(&json).unwrap();
        assert!(!back.is_free);
        assert_eq!(back.butterfly_violations.len(), 2);
    }
}
