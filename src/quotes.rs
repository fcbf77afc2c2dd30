//! Delta-quoted FX volatility market data.
//!
//! FX option markets quote implied vols against deltas rather than strikes:
//! a smile row is e.g. 10Δ put / 25Δ put / ATM / 25Δ call / 10Δ call. Each
//! quote carries the delta convention it was written in ([`DeltaType`]) and,
//! for the ATM pillar, the ATM definition ([`AtmType`]).
//!
//! Quotes are held as [`VersionedQuote`] handles so a surface can detect
//! market-data updates cheaply: every `set` bumps a monotonic counter, and
//! consumers compare the sum of upstream versions against the one they last
//! built from instead of registering observer callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{FxVolError, Result};
use crate::validate::validate_positive;

/// Delta convention of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaType {
    /// Spot delta: sensitivity of the premium to the spot rate.
    Spot,
    /// Forward delta: sensitivity of the undiscounted premium to the forward.
    Fwd,
}

/// ATM definition of the at-the-money pillar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtmType {
    /// Not an ATM quote.
    AtmNull,
    /// Strike at which a straddle has zero delta.
    AtmDeltaNeutral,
    /// Strike equal to the spot rate.
    AtmSpot,
    /// Strike equal to the forward rate.
    AtmFwd,
}

/// A mutable market value with a monotonically increasing version stamp.
///
/// Thread-safe: the value sits behind an `RwLock` and the version behind an
/// atomic counter. The version is bumped before the value is visible, so a
/// reader that observes a stale value will also observe a version mismatch on
/// its next check and rebuild.
#[derive(Debug)]
pub struct VersionedQuote {
    value: RwLock<f64>,
    version: AtomicU64,
}

impl VersionedQuote {
    pub fn new(value: f64) -> Self {
        VersionedQuote {
            value: RwLock::new(value),
            version: AtomicU64::new(0),
        }
    }

    /// Current value.
    pub fn value(&self) -> f64 {
        match self.value.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Replace the value and bump the version.
    pub fn set(&self, value: f64) {
        self.version.fetch_add(1, Ordering::SeqCst);
        match self.value.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    /// Monotonic change counter, starting at zero.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

/// A single delta-quoted implied volatility.
#[derive(Debug, Clone)]
pub struct DeltaVolQuote {
    vol: Arc<VersionedQuote>,
    delta: Option<f64>,
    delta_type: DeltaType,
    atm_type: AtmType,
}

impl DeltaVolQuote {
    /// Quote at a fixed delta (e.g. `-0.25` for a 25Δ put).
    pub fn at_delta(delta: f64, vol: Arc<VersionedQuote>, delta_type: DeltaType) -> Result<Self> {
        if !delta.is_finite() || delta == 0.0 || delta.abs() >= 1.0 {
            return Err(FxVolError::InvalidInput {
                message: format!("delta must be in (-1, 0) or (0, 1), got {delta}"),
            });
        }
        Ok(DeltaVolQuote {
            vol,
            delta: Some(delta),
            delta_type,
            atm_type: AtmType::AtmNull,
        })
    }

    /// ATM quote with the given ATM definition.
    pub fn atm(vol: Arc<VersionedQuote>, delta_type: DeltaType, atm_type: AtmType) -> Result<Self> {
        if atm_type == AtmType::AtmNull {
            return Err(FxVolError::InvalidInput {
                message: "ATM quote requires an ATM definition other than AtmNull".into(),
            });
        }
        Ok(DeltaVolQuote {
            vol,
            delta: None,
            delta_type,
            atm_type,
        })
    }

    pub fn value(&self) -> f64 {
        self.vol.value()
    }

    pub fn version(&self) -> u64 {
        self.vol.version()
    }

    /// Underlying quote handle, for feeding live updates.
    pub fn quote(&self) -> &Arc<VersionedQuote> {
        &self.vol
    }

    /// Delta of the quote; `None` for the ATM pillar.
    pub fn delta(&self) -> Option<f64> {
        self.delta
    }

    pub fn delta_type(&self) -> DeltaType {
        self.delta_type
    }

    pub fn atm_type(&self) -> AtmType {
        self.atm_type
    }

    pub fn is_atm(&self) -> bool {
        self.delta.is_none()
    }
}

/// The full quote grid: one row per tenor, one column per delta pillar.
///
/// Construction enforces the row invariants once, so the surface can assume a
/// well-formed grid:
/// - at least one row, at least three quotes per row;
/// - all rows the same width;
/// - exactly one ATM quote per row, in the same column everywhere;
/// - a single delta convention within each row;
/// - each column's delta matching the first row's.
#[derive(Debug, Clone)]
pub struct DeltaVolMatrix {
    rows: Vec<Vec<DeltaVolQuote>>,
    deltas: Vec<Option<f64>>,
}

impl DeltaVolMatrix {
    pub fn new(rows: Vec<Vec<DeltaVolQuote>>) -> Result<Self> {
        if rows.is_empty() {
            return Err(FxVolError::InvalidInput {
                message: "at least one smile row required".into(),
            });
        }
        let quotes_per_smile = rows[0].len();
        if quotes_per_smile < 3 {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "at least three vol quotes required per smile, got {quotes_per_smile}"
                ),
            });
        }
        let deltas: Vec<Option<f64>> = rows[0].iter().map(|q| q.delta()).collect();
        let atm_count = deltas.iter().filter(|d| d.is_none()).count();
        if atm_count != 1 {
            return Err(FxVolError::InvalidInput {
                message: format!("each smile must contain a single ATM quote, found {atm_count}"),
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != quotes_per_smile {
                return Err(FxVolError::InvalidInput {
                    message: format!(
                        "row {} contains {} vol quotes, whereas the first row contains {}",
                        i + 1,
                        row.len(),
                        quotes_per_smile
                    ),
                });
            }
            for (j, quote) in row.iter().enumerate() {
                if quote.delta_type() != row[0].delta_type() {
                    return Err(FxVolError::InvalidInput {
                        message: format!(
                            "row {} of vol matrix uses more than one delta convention",
                            i + 1
                        ),
                    });
                }
                if quote.delta() != deltas[j] {
                    return Err(FxVolError::InvalidInput {
                        message: format!(
                            "deltas of row {} do not match those of the first row",
                            i + 1
                        ),
                    });
                }
                validate_positive(quote.value(), "quoted vol")?;
            }
        }
        Ok(DeltaVolMatrix { rows, deltas })
    }

    /// Convenience constructor for a uniform grid: one `(delta_type, atm_type)`
    /// convention per row, plain `f64` vols, shared delta pillars.
    ///
    /// `deltas[j] == None` marks the ATM column.
    pub fn from_vols(
        vols: &[Vec<f64>],
        deltas: &[Option<f64>],
        conventions: &[(DeltaType, AtmType)],
    ) -> Result<Self> {
        if vols.len() != conventions.len() {
            return Err(FxVolError::InvalidInput {
                message: format!(
                    "got {} vol rows but {} row conventions",
                    vols.len(),
                    conventions.len()
                ),
            });
        }
        let mut rows = Vec::with_capacity(vols.len());
        for (row_vols, &(delta_type, atm_type)) in vols.iter().zip(conventions) {
            if row_vols.len() != deltas.len() {
                return Err(FxVolError::InvalidInput {
                    message: format!(
                        "vol row of width {} does not match {} delta pillars",
                        row_vols.len(),
                        deltas.len()
                    ),
                });
            }
            let mut row = Vec::with_capacity(row_vols.len());
            for (&vol, &delta) in row_vols.iter().zip(deltas) {
                let handle = Arc::new(VersionedQuote::new(vol));
                let quote = match delta {
                    Some(d) => DeltaVolQuote::at_delta(d, handle, delta_type)?,
                    None => DeltaVolQuote::atm(handle, delta_type, atm_type)?,
                };
                row.push(quote);
            }
            rows.push(row);
        }
        DeltaVolMatrix::new(rows)
    }

    pub fn rows(&self) -> &[Vec<DeltaVolQuote>] {
        &self.rows
    }

    pub fn n_smiles(&self) -> usize {
        self.rows.len()
    }

    pub fn quotes_per_smile(&self) -> usize {
        self.deltas.len()
    }

    /// Per-column deltas; `None` marks the ATM column.
    pub fn deltas(&self) -> &[Option<f64>] {
        &self.deltas
    }

    /// Index of the ATM column.
    pub fn atm_index(&self) -> usize {
        // Constructor guarantees exactly one ATM column.
        self.deltas.iter().position(|d| d.is_none()).unwrap_or(0)
    }

    /// Sum of all quote versions, used for change detection.
    pub fn version_sum(&self) -> u64 {
        self.rows
            .iter()
            .flatten()
            .map(|q| q.version())
            .fold(0u64, u64::wrapping_add)
    }

    /// Raw quoted vols, row by row.
    pub fn values(&self) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|q| q.value()).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(v: f64) -> Arc<VersionedQuote> {
        Arc::new(VersionedQuote::new(v))
    }

    fn sample_row(delta_type: DeltaType) -> Vec<DeltaVolQuote> {
        vec![
            DeltaVolQuote::at_delta(-0.25, quote(0.11), delta_type).unwrap(),
            DeltaVolQuote::atm(quote(0.10), delta_type, AtmType::AtmDeltaNeutral).unwrap(),
            DeltaVolQuote::at_delta(0.25, quote(0.105), delta_type).unwrap(),
        ]
    }

    #[test]
    fn versioned_quote_bumps_on_set() {
        let q = VersionedQuote::new(0.10);
        assert_eq!(q.version(), 0);
        assert_eq!(q.value(), 0.10);
        q.set(0.12);
        assert_eq!(q.version(), 1);
        assert_eq!(q.value(), 0.12);
        q.set(0.12);
        assert_eq!(q.version(), 2);
    }

    #[test]
    fn delta_quote_rejects_degenerate_deltas() {
        assert!(DeltaVolQuote::at_delta(0.0, quote(0.1), DeltaType::Fwd).is_err());
        assert!(DeltaVolQuote::at_delta(1.0, quote(0.1), DeltaType::Fwd).is_err());
        assert!(DeltaVolQuote::at_delta(f64::NAN, quote(0.1), DeltaType::Fwd).is_err());
        assert!(DeltaVolQuote::atm(quote(0.1), DeltaType::Fwd, AtmType::AtmNull).is_err());
    }

    #[test]
    fn matrix_accepts_consistent_rows() {
        let m = DeltaVolMatrix::new(vec![sample_row(DeltaType::Spot), sample_row(DeltaType::Fwd)])
            .unwrap();
        assert_eq!(m.n_smiles(), 2);
        assert_eq!(m.quotes_per_smile(), 3);
        assert_eq!(m.atm_index(), 1);
        assert_eq!(m.deltas(), &[Some(-0.25), None, Some(0.25)]);
    }

    #[test]
    fn matrix_rejects_mixed_delta_convention_within_row() {
        let mut row = sample_row(DeltaType::Spot);
        row[2] = DeltaVolQuote::at_delta(0.25, quote(0.105), DeltaType::Fwd).unwrap();
        assert!(DeltaVolMatrix::new(vec![row]).is_err());
    }

    #[test]
    fn matrix_rejects_two_atm_quotes() {
        let row = vec![
            DeltaVolQuote::atm(quote(0.1), DeltaType::Fwd, AtmType::AtmDeltaNeutral).unwrap(),
            DeltaVolQuote::atm(quote(0.1), DeltaType::Fwd, AtmType::AtmFwd).unwrap(),
            DeltaVolQuote::at_delta(0.25, quote(0.105), DeltaType::Fwd).unwrap(),
        ];
        assert!(DeltaVolMatrix::new(vec![row]).is_err());
    }

    #[test]
    fn matrix_rejects_column_mismatch_across_rows() {
        let mut second = sample_row(DeltaType::Spot);
        second[0] = DeltaVolQuote::at_delta(-0.10, quote(0.11), DeltaType::Spot).unwrap();
        let err = DeltaVolMatrix::new(vec![sample_row(DeltaType::Spot), second]);
        assert!(err.is_err());
    }

    #[test]
    fn matrix_rejects_narrow_rows() {
        let row = vec![
            DeltaVolQuote::atm(quote(0.1), DeltaType::Fwd, AtmType::AtmDeltaNeutral).unwrap(),
            DeltaVolQuote::at_delta(0.25, quote(0.105), DeltaType::Fwd).unwrap(),
        ];
        assert!(DeltaVolMatrix::new(vec![row]).is_err());
    }

    #[test]
    fn version_sum_tracks_updates() {
        let m = DeltaVolMatrix::new(vec![sample_row(DeltaType::Fwd)]).unwrap();
        let before = m.version_sum();
        m.rows()[0][1].quote().set(0.11);
        assert_eq!(m.version_sum(), before + 1);
    }

    #[test]
    fn from_vols_builds_grid() {
        let m = DeltaVolMatrix::from_vols(
            &[vec![0.11, 0.10, 0.105], vec![0.12, 0.11, 0.115]],
            &[Some(-0.25), None, Some(0.25)],
            &[
                (DeltaType::Spot, AtmType::AtmDeltaNeutral),
                (DeltaType::Fwd, AtmType::AtmDeltaNeutral),
            ],
        )
        .unwrap();
        assert_eq!(m.values()[1], vec![0.12, 0.11, 0.115]);
        assert_eq!(m.rows()[0][0].delta_type(), DeltaType::Spot);
        assert_eq!(m.rows()[1][0].delta_type(), DeltaType::Fwd);
    }
}
