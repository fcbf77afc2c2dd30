//! Internal optimization utilities for smile calibration.

use serde::{Deserialize, Serialize};

/// Configuration for the Nelder-Mead simplex optimizer.
pub(crate) struct NelderMeadConfig {
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// Convergence threshold on simplex diameter.
    pub diameter_tol: f64,
    /// Convergence threshold on objective value spread.
    pub fvalue_tol: f64,
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Simplex diameter fell below tolerance.
    SimplexDiameter,
    /// Objective spread across the simplex fell below tolerance.
    ObjectiveSpread,
    /// Iteration budget exhausted without meeting either tolerance.
    MaxIterations,
}

/// Result of a Nelder-Mead optimization.
pub(crate) struct NelderMeadResult {
    /// Best point found.
    pub x: Vec<f64>,
    /// Objective value at the best point.
    pub fval: f64,
    /// Stopping condition that was hit.
    pub termination: Termination,
    /// Iterations performed.
    #[allow(dead_code)]
    pub iterations: usize,
}

fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Minimize `objective` over `n = x0.len()` dimensions using the Nelder-Mead
/// simplex method.
///
/// Starts from `x0` with per-dimension perturbations `steps` to form the
/// initial simplex of `n + 1` vertices. Returns the best vertex found together
/// with the stopping condition.
pub(crate) fn nelder_mead<F>(
    objective: F,
    x0: &[f64],
    steps: &[f64],
    config: &NelderMeadConfig,
) -> NelderMeadResult
where
    F: Fn(&[f64]) -> f64,
{
    debug_assert_eq!(x0.len(), steps.len());
    let n = x0.len();

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for i in 0..n {
        let mut v = x0.to_vec();
        v[i] += steps[i];
        simplex.push(v);
    }
    let mut f_vals: Vec<f64> = simplex.iter().map(|v| objective(v)).collect();

    let mut termination = Termination::MaxIterations;
    let mut iterations = config.max_iter;

    for iter in 0..config.max_iter {
        // Sort vertices by objective value
        let mut idx: Vec<usize> = (0..=n).collect();
        idx.sort_by(|&a, &b| {
            f_vals[a]
                .partial_cmp(&f_vals[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        simplex = idx.iter().map(|&i| simplex[i].clone()).collect();
        f_vals = idx.iter().map(|&i| f_vals[i]).collect();

        // Check convergence
        let diameter = simplex
            .iter()
            .flat_map(|a| simplex.iter().map(move |b| distance(a, b)))
            .fold(0.0_f64, f64::max);
        let f_spread = f_vals[n] - f_vals[0];

        if diameter < config.diameter_tol {
            termination = Termination::SimplexDiameter;
            iterations = iter;
            break;
        }
        if f_spread < config.fvalue_tol {
            termination = Termination::ObjectiveSpread;
            iterations = iter;
            break;
        }

        // Centroid of all vertices but the worst
        let centroid: Vec<f64> = (0..n)
            .map(|d| simplex[..n].iter().map(|v| v[d]).sum::<f64>() / n as f64)
            .collect();

        let lerp = |from: &[f64], to: &[f64], t: f64| -> Vec<f64> {
            from.iter()
                .zip(to)
                .map(|(a, b)| a + t * (b - a))
                .collect()
        };

        // Reflection
        let reflected = lerp(&centroid, &simplex[n], -1.0);
        let fr = objective(&reflected);

        if fr < f_vals[n - 1] && fr >= f_vals[0] {
            simplex[n] = reflected;
            f_vals[n] = fr;
        } else if fr < f_vals[0] {
            // Expansion
            let expanded = lerp(&centroid, &reflected, 2.0);
            let fe = objective(&expanded);
            if fe < fr {
                simplex[n] = expanded;
                f_vals[n] = fe;
            } else {
                simplex[n] = reflected;
                f_vals[n] = fr;
            }
        } else {
            // Contraction, outside or inside depending on the reflection
            let contracted = if fr < f_vals[n] {
                lerp(&centroid, &reflected, 0.5)
            } else {
                lerp(&centroid, &simplex[n], 0.5)
            };
            let fh = objective(&contracted);
            if fh < f_vals[n].min(fr) {
                simplex[n] = contracted;
                f_vals[n] = fh;
            } else {
                // Shrink toward the best vertex
                for j in 1..=n {
                    let shrunk = lerp(&simplex[0].clone(), &simplex[j], 0.5);
                    f_vals[j] = objective(&shrunk);
                    simplex[j] = shrunk;
                }
            }
        }
    }

    let mut best = 0;
    for i in 1..=n {
        if f_vals[i] < f_vals[best] {
            best = i;
        }
    }

    NelderMeadResult {
        x: simplex[best].clone(),
        fval: f_vals[best],
        termination,
        iterations,
    }
}
