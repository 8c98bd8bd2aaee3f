//! Weighting that penalizes joints approaching their position limits
//! (Chan and Dubey, "A weighted least-norm solution based scheme for avoiding joint limits
//! for redundant joint manipulators", 1995).

use nalgebra::DVector;
use tracing::debug;

use crate::solver_state::SolverState;

/// Gradient magnitude of the joint limit performance criterion for one joint.
/// Positions are converted to degrees before evaluating
/// `|(max - min)^2 (2q - max - min) / (4 (max - q)^2 (q - min)^2)|`.
pub fn limit_proximity(q: f64, limit_min: f64, limit_max: f64) -> f64 {
    let q = q.to_degrees();
    let min = limit_min.to_degrees();
    let max = limit_max.to_degrees();
    ((max - min).powi(2) * (2.0 * q - max - min) / (4.0 * (max - q).powi(2) * (q - min).powi(2))).abs()
}

/// Diagonal of the weighting matrix for `columns` Jacobian columns, of which the first `dof`
/// belong to the physical chain. Remaining (platform) columns get weight 1.
///
/// A chain joint gets `1 + dh` on the first cycle. Later it is penalized only when its
/// proximity measure did not change since the last cycle or when the previous velocity
/// moves it towards the nearer limit; otherwise it gets weight 1. The proximity measures
/// are stored in `state` for the next cycle.
pub fn calculate_weighting(
    q: &DVector<f64>,
    last_q_dot: &DVector<f64>,
    limits_min: &[f64],
    limits_max: &[f64],
    dof: usize,
    columns: usize,
    state: &mut SolverState,
) -> DVector<f64> {
    if state.last_dh.len() != dof {
        state.last_dh = DVector::zeros(dof);
    }

    let mut weights = DVector::from_element(columns, 1.0);
    for i in 0..dof.min(columns) {
        let dh = limit_proximity(q[i], limits_min[i], limits_max[i]);

        let penalize = if state.initial_iteration {
            true
        } else {
            let nearer_to_max = limits_max[i] - q[i] < q[i] - limits_min[i];
            let nearer_to_min = limits_max[i] - q[i] > q[i] - limits_min[i];
            state.last_dh[i] == dh
                || (last_q_dot[i] > 0.0 && nearer_to_max)
                || (last_q_dot[i] < 0.0 && nearer_to_min)
        };

        if penalize {
            weights[i] = 1.0 + dh;
        }
        state.last_dh[i] = dh;
    }

    debug!("Joint limit avoidance weights: {}", weights.transpose());
    weights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_proximity() {
        // At the middle of the range the gradient vanishes
        assert!(limit_proximity(0.0, -1.0, 1.0).abs() < 1e-12);
        // Symmetric around the middle
        let near_max = limit_proximity(0.8, -1.0, 1.0);
        let near_min = limit_proximity(-0.8, -1.0, 1.0);
        assert!((near_max - near_min).abs() < 1e-9);
        assert!(near_max > limit_proximity(0.5, -1.0, 1.0));
    }

    #[test]
    fn test_limit_proximity_value() {
        let d = 180.0 / std::f64::consts::PI;
        let q = 0.5 * d;
        // Limits at -d and d degrees
        let expected = (4.0 * d * d * (2.0 * q) / (4.0 * (d - q).powi(2) * (q + d).powi(2))).abs();
        assert!((limit_proximity(0.5, -1.0, 1.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_first_cycle_penalizes_all_chain_joints() {
        let mut state = SolverState::default();
        let q = DVector::from_row_slice(&[0.8, 0.0]);
        let last = DVector::zeros(2);
        let weights = calculate_weighting(&q, &last, &[-1.0, -1.0], &[1.0, 1.0], 2, 5, &mut state);
        assert_eq!(weights.len(), 5);
        assert!((weights[0] - (1.0 + limit_proximity(0.8, -1.0, 1.0))).abs() < 1e-12);
        assert!((weights[1] - 1.0).abs() < 1e-12);
        // Platform columns
        assert_eq!(&weights.as_slice()[2..], &[1.0, 1.0, 1.0]);
        assert_eq!(state.last_dh.len(), 2);
    }

    #[test]
    fn test_later_cycles_depend_on_motion() {
        let limits_min = [-1.0];
        let limits_max = [1.0];
        let mut state = SolverState::default();
        calculate_weighting(&DVector::from_element(1, 0.7), &DVector::zeros(1), &limits_min, &limits_max, 1, 1, &mut state);
        state.initial_iteration = false;

        let q = DVector::from_element(1, 0.8);
        let dh = limit_proximity(0.8, -1.0, 1.0);

        // Moving towards the nearer (max) limit
        let mut toward = state.clone();
        let w = calculate_weighting(&q, &DVector::from_element(1, 0.1), &limits_min, &limits_max, 1, 1, &mut toward);
        assert!((w[0] - (1.0 + dh)).abs() < 1e-12);

        // Moving away from it
        let mut away = state.clone();
        let w = calculate_weighting(&q, &DVector::from_element(1, -0.1), &limits_min, &limits_max, 1, 1, &mut away);
        assert_eq!(w[0], 1.0);
        assert_eq!(away.last_dh[0], dh);

        // Proximity unchanged since last cycle: penalized regardless of motion
        let w = calculate_weighting(&q, &DVector::from_element(1, -0.1), &limits_min, &limits_max, 1, 1, &mut away);
        assert!((w[0] - (1.0 + dh)).abs() < 1e-12);
    }
}
