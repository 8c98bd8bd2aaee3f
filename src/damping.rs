//! Damping factor of the regularized least squares solution.

use nalgebra::DVector;

use crate::parameters::{DampingMethod, SolverParameters};
use crate::solver_state::SolverState;

/// Computes the damping factor `lambda` for the current cycle.
///
/// `manipulability` is `sqrt(|det(J Jt)|)` and `singular_values` the singular values of the
/// (augmented) Jacobian. `ManipulabilityRate` reads and updates the previous manipulability in
/// `state`; all other methods leave it untouched.
pub fn damping_factor(
    params: &SolverParameters,
    manipulability: f64,
    singular_values: &DVector<f64>,
    state: &mut SolverState,
) -> f64 {
    match params.damping_method {
        DampingMethod::Manipulability => {
            let w = manipulability;
            if w < params.wt {
                params.lambda0 * (1.0 - w / params.wt).powi(2)
            } else {
                0.0
            }
        }

        DampingMethod::ManipulabilityRate => {
            let w = manipulability;
            let damping = if state.initial_iteration || state.last_manipulability == 0.0 {
                params.lambda0
            } else {
                let ratio = w / state.last_manipulability;
                if ratio.abs() > params.wt {
                    params.lambda0 * (1.0 - ratio)
                } else {
                    0.0
                }
            };
            state.last_manipulability = w;
            damping
        }

        DampingMethod::TrackingError => {
            // Singular values at or below eps are degenerate. If all are, the largest one is used.
            let min_singular_value = singular_values
                .iter()
                .copied()
                .filter(|s| *s > params.eps)
                .reduce(f64::min)
                .unwrap_or_else(|| singular_values.max());
            (min_singular_value.powi(2) * params.delta_r_max / (1.0 - params.delta_r_max)).sqrt()
        }

        DampingMethod::SingularRegion => {
            let last_singular_value = singular_values.min();
            if last_singular_value >= params.eps {
                0.0
            } else {
                params.lambda0 * (1.0 - (last_singular_value / params.eps).powi(2)).sqrt()
            }
        }

        DampingMethod::Constant => params.damping_factor,

        DampingMethod::Truncation => 0.0,
    }
}
