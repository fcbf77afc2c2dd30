//! Fixed time/strike discretization of a local-vol surface.

use chrono::NaiveDate;

use crate::error::{FxVolError, Result};
use crate::local_vol::LocalVol;
use crate::types::Vol;
use crate::validate::{validate_non_negative, validate_positive};

/// Strike mesh used by [`FixedLocalVolGrid`].
#[derive(Debug, Clone, PartialEq)]
pub enum GridSpec {
    /// Equally spaced strikes spanning `[x_min, x_max]`.
    Uniform {
        x_min: f64,
        x_max: f64,
        x_grid: usize,
    },
    /// Non-uniform mesh supplied in log-strike space, exponentiated back to
    /// strikes. Nodes must be strictly increasing.
    LogStrike { nodes: Vec<f64> },
}

impl GridSpec {
    fn strikes(&self) -> Result<Vec<f64>> {
        match self {
            GridSpec::Uniform {
                x_min,
                x_max,
                x_grid,
            } => {
                validate_positive(*x_min, "x_min")?;
                if *x_max <= *x_min {
                    return Err(FxVolError::InvalidInput {
                        message: format!("x_max ({x_max}) must exceed x_min ({x_min})"),
                    });
                }
                if *x_grid < 2 {
                    return Err(FxVolError::InvalidInput {
                        message: format!("x_grid must be at least 2, got {x_grid}"),
                    });
                }
                let step = (x_max - x_min) / (*x_grid as f64 - 1.0);
                Ok((0..*x_grid).map(|i| x_min + step * i as f64).collect())
            }
            GridSpec::LogStrike { nodes } => {
                if nodes.len() < 2 {
                    return Err(FxVolError::InvalidInput {
                        message: format!("log-strike mesh needs at least 2 nodes, got {}", nodes.len()),
                    });
                }
                for pair in nodes.windows(2) {
                    if !(pair[0].is_finite() && pair[1].is_finite() && pair[0] < pair[1]) {
                        return Err(FxVolError::InvalidInput {
                            message: "log-strike nodes must be finite and strictly increasing"
                                .into(),
                        });
                    }
                }
                Ok(nodes.iter().map(|x| x.exp()).collect())
            }
        }
    }
}

/// Immutable snapshot of a local-vol surface on a fixed mesh.
///
/// The expensive source surface is evaluated exactly once per grid node at
/// construction; queries afterwards are bilinear lookups over the stored
/// matrix, clamped flat outside the mesh. Sentinel values produced by the
/// source (see [`DupireLocalVol`](crate::local_vol::DupireLocalVol)) are
/// stored verbatim, so callers keep the same illegal-value contract.
#[derive(Debug, Clone)]
pub struct FixedLocalVolGrid {
    reference_date: NaiveDate,
    times: Vec<f64>,
    strikes: Vec<f64>,
    /// Indexed `[strike][time]`.
    values: Vec<Vec<f64>>,
}

impl FixedLocalVolGrid {
    /// Discretize `source` on `t_grid` equally spaced times up to `max_time`
    /// and the strikes given by `spec`.
    pub fn from_local_vol(
        source: &dyn LocalVol,
        reference_date: NaiveDate,
        max_time: f64,
        t_grid: usize,
        spec: &GridSpec,
    ) -> Result<Self> {
        validate_positive(max_time, "max_time")?;
        if t_grid < 1 {
            return Err(FxVolError::InvalidInput {
                message: "time grid needs at least 1 step".into(),
            });
        }
        let strikes = spec.strikes()?;
        let times: Vec<f64> = (1..=t_grid)
            .map(|i| max_time * i as f64 / t_grid as f64)
            .collect();

        let mut values = Vec::with_capacity(strikes.len());
        for &strike in &strikes {
            let mut row = Vec::with_capacity(times.len());
            for &t in &times {
                row.push(source.local_vol(t, strike)?.0);
            }
            values.push(row);
        }

        #[cfg(feature = "logging")]
        tracing::debug!(
            n_times = times.len(),
            n_strikes = strikes.len(),
            max_time,
            "discretized local-vol grid"
        );

        Ok(FixedLocalVolGrid {
            reference_date,
            times,
            strikes,
            values,
        })
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn strikes(&self) -> &[f64] {
        &self.strikes
    }

    pub fn max_time(&self) -> f64 {
        // Constructor guarantees a non-empty time grid.
        self.times.last().copied().unwrap_or(0.0)
    }
}

/// Locate `x` in the sorted mesh: surrounding indices and the interpolation
/// weight of the upper one. Clamps outside the mesh.
fn bracket(xs: &[f64], x: f64) -> (usize, usize, f64) {
    let n = xs.len();
    if x <= xs[0] {
        return (0, 0, 0.0);
    }
    if x >= xs[n - 1] {
        return (n - 1, n - 1, 0.0);
    }
    let hi = xs.partition_point(|&v| v < x);
    let lo = hi - 1;
    let weight = (x - xs[lo]) / (xs[hi] - xs[lo]);
    (lo, hi, weight)
}

impl LocalVol for FixedLocalVolGrid {
    fn local_vol(&self, t: f64, level: f64) -> Result<Vol> {
        validate_non_negative(t, "t")?;
        validate_positive(level, "level")?;
        let (t_lo, t_hi, wt) = bracket(&self.times, t);
        let (k_lo, k_hi, wk) = bracket(&self.strikes, level);
        let lower = (1.0 - wt) * self.values[k_lo][t_lo] + wt * self.values[k_lo][t_hi];
        let upper = (1.0 - wt) * self.values[k_hi][t_lo] + wt * self.values[k_hi][t_hi];
        Ok(Vol((1.0 - wk) * lower + wk * upper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn reference_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 5, 2).unwrap()
    }

    /// Separable analytic surface: σ(t, k) = 0.04 + 0.02 t + 0.01 ln k.
    struct AnalyticLocalVol;

    impl LocalVol for AnalyticLocalVol {
        fn local_vol(&self, t: f64, level: f64) -> crate::error::Result<Vol> {
            Ok(Vol(0.04 + 0.02 * t + 0.01 * level.ln()))
        }
    }

    fn uniform_spec() -> GridSpec {
        GridSpec::Uniform {
            x_min: 0.8,
            x_max: 1.6,
            x_grid: 9,
        }
    }

    #[test]
    fn grid_nodes_match_source_exactly() {
        let grid =
            FixedLocalVolGrid::from_local_vol(&AnalyticLocalVol, reference_date(), 2.0, 8, &uniform_spec())
                .unwrap();
        for &t in grid.times() {
            for &k in grid.strikes() {
                let from_grid = grid.local_vol(t, k).unwrap().0;
                let from_source = AnalyticLocalVol.local_vol(t, k).unwrap().0;
                assert_abs_diff_eq!(from_grid, from_source, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn time_grid_spans_max_time() {
        let grid =
            FixedLocalVolGrid::from_local_vol(&AnalyticLocalVol, reference_date(), 2.0, 8, &uniform_spec())
                .unwrap();
        assert_eq!(grid.times().len(), 8);
        assert_abs_diff_eq!(grid.times()[0], 0.25, epsilon = 1e-15);
        assert_abs_diff_eq!(grid.max_time(), 2.0, epsilon = 1e-15);
    }

    #[test]
    fn interior_points_interpolate_linearly_in_time() {
        let grid =
            FixedLocalVolGrid::from_local_vol(&AnalyticLocalVol, reference_date(), 2.0, 8, &uniform_spec())
                .unwrap();
        // Source is linear in t, so bilinear interpolation is exact between
        // time nodes at a grid strike
        let v = grid.local_vol(0.375, 1.2).unwrap().0;
        assert_abs_diff_eq!(
            v,
            AnalyticLocalVol.local_vol(0.375, 1.2).unwrap().0,
            epsilon = 1e-14
        );
    }

    #[test]
    fn queries_clamp_outside_the_mesh() {
        let grid =
            FixedLocalVolGrid::from_local_vol(&AnalyticLocalVol, reference_date(), 2.0, 4, &uniform_spec())
                .unwrap();
        let at_edge = grid.local_vol(2.0, 1.6).unwrap().0;
        assert_eq!(grid.local_vol(5.0, 2.5).unwrap().0, at_edge);
        let at_origin = grid.local_vol(grid.times()[0], 0.8).unwrap().0;
        assert_eq!(grid.local_vol(0.0, 0.1).unwrap().0, at_origin);
    }

    #[test]
    fn log_strike_mesh_exponentiates_nodes() {
        let spec = GridSpec::LogStrike {
            nodes: vec![-0.2, 0.0, 0.2],
        };
        let grid =
            FixedLocalVolGrid::from_local_vol(&AnalyticLocalVol, reference_date(), 1.0, 4, &spec)
                .unwrap();
        assert_abs_diff_eq!(grid.strikes()[0], (-0.2f64).exp(), epsilon = 1e-15);
        assert_abs_diff_eq!(grid.strikes()[1], 1.0, epsilon = 1e-15);
        assert_abs_diff_eq!(grid.strikes()[2], (0.2f64).exp(), epsilon = 1e-15);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        let bad = [
            GridSpec::Uniform {
                x_min: 1.0,
                x_max: 0.5,
                x_grid: 5,
            },
            GridSpec::Uniform {
                x_min: -0.5,
                x_max: 1.5,
                x_grid: 5,
            },
            GridSpec::Uniform {
                x_min: 0.5,
                x_max: 1.5,
                x_grid: 1,
            },
            GridSpec::LogStrike { nodes: vec![0.1] },
            GridSpec::LogStrike {
                nodes: vec![0.2, 0.1],
            },
        ];
        for spec in &bad {
            assert!(FixedLocalVolGrid::from_local_vol(
                &AnalyticLocalVol,
                reference_date(),
                1.0,
                4,
                spec
            )
            .is_err());
        }
        assert!(FixedLocalVolGrid::from_local_vol(
            &AnalyticLocalVol,
            reference_date(),
            0.0,
            4,
            &uniform_spec()
        )
        .is_err());
        assert!(FixedLocalVolGrid::from_local_vol(
            &AnalyticLocalVol,
            reference_date(),
            1.0,
            0,
            &uniform_spec()
        )
        .is_err());
    }
}
