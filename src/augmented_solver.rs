//! Damped least squares solver for the velocity inverse kinematics of redundant chains,
//! optionally extended by a mobile platform.
//!
//! Each cycle the solver
//!
//! 1. augments the chain Jacobian with the platform block (if the platform is active),
//! 2. computes the damping factor with the configured [`DampingMethod`],
//! 3. optionally weights the joints by their proximity to position limits,
//! 4. solves the regularized (weighted) least squares problem for the joint velocities,
//! 5. optionally scales the result near position limits (in-solver scaling), and
//! 6. passes the result through the [`LimiterContainer`].
//!
//! Numerical robustness near singularities is provided by the damping, not by errors:
//! the solver returns an error only for invalid parameters or inconsistent input sizes.

use std::fmt;
use std::sync::Arc;

use nalgebra::{DMatrix, DVector};
use tracing::{debug, error, warn};

use crate::damping::damping_factor;
use crate::jacobian::{augment, manipulability, platform_jacobian, PLATFORM_COLUMNS};
use crate::joint_limit_avoidance::calculate_weighting;
use crate::kinematic_traits::{ChainKinematics, JointVector, PlatformPoses, Twist};
use crate::limiters::{max_position_limit_factor, LimiterContainer};
use crate::parameter_error::ParameterError;
use crate::parameters::{DampingMethod, SolverParameters, BASE_DOF};
use crate::solver_state::SolverState;
use crate::utils::is_valid;

/// Index of the platform yaw rate among the synthetic platform DOF
/// (translation x, y, z, rotation x, y, z).
const BASE_YAW_SLOT: usize = 5;

/// Errors reported by the solver.
#[derive(Debug)]
pub enum SolverError {
    /// Parameters were rejected by validation.
    InvalidParameters(ParameterError),
    /// An input does not have the size the parameters require.
    DimensionMismatch { what: &'static str, expected: usize, found: usize },
    /// Platform augmentation is active but the platform poses were not supplied.
    MissingPlatformPoses,
    /// A decomposition needed by the solution could not be computed.
    Numerical(&'static str),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SolverError::InvalidParameters(ref err) =>
                write!(f, "Invalid solver parameters: {}", err),
            SolverError::DimensionMismatch { what, expected, found } =>
                write!(f, "Dimension mismatch of {}: expected {}, found {}", what, expected, found),
            SolverError::MissingPlatformPoses =>
                write!(f, "Platform is active but base and chain base poses are missing"),
            SolverError::Numerical(msg) =>
                write!(f, "Numerical failure: {}", msg),
        }
    }
}

impl std::error::Error for SolverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SolverError::InvalidParameters(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParameterError> for SolverError {
    fn from(err: ParameterError) -> Self {
        SolverError::InvalidParameters(err)
    }
}

/// Result of one solver cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Joint velocity command: `dof` chain joints, followed by the six platform DOF
    /// (x, y, z, roll, pitch, yaw) when the platform is active.
    pub joint_velocities: DVector<f64>,

    /// Damping factor used in this cycle.
    pub damping_factor: f64,

    /// Manipulability `sqrt(|det(J Jt)|)` of the (augmented) Jacobian.
    pub manipulability: f64,
}

/// Solver of the velocity inverse kinematics with configurable damping, joint limit
/// avoidance and limiter chain.
pub struct AugmentedSolver {
    params: SolverParameters,
    kinematics: Arc<dyn ChainKinematics>,
    state: SolverState,
    limiters: LimiterContainer,
}

impl AugmentedSolver {
    /// Creates the solver for the chain described by `kinematics`. Fails if the parameters do
    /// not validate or do not match the chain.
    pub fn new(params: SolverParameters, kinematics: Arc<dyn ChainKinematics>) -> Result<Self, SolverError> {
        check_parameters(&params, kinematics.as_ref())?;
        Ok(Self {
            state: SolverState::new(params.dof),
            limiters: LimiterContainer::new(params.clone()),
            params,
            kinematics,
        })
    }

    /// Replaces the parameters and rebuilds the limiter chain. On error the previous
    /// parameters stay in effect.
    pub fn reconfigure(&mut self, params: SolverParameters) -> Result<(), SolverError> {
        check_parameters(&params, self.kinematics.as_ref())?;
        if params.dof != self.params.dof {
            self.state = SolverState::new(params.dof);
        }
        self.limiters.set_params(params.clone());
        self.params = params;
        Ok(())
    }

    pub fn params(&self) -> &SolverParameters {
        &self.params
    }

    pub fn limiters(&self) -> &LimiterContainer {
        &self.limiters
    }

    /// State carried between cycles.
    pub fn state(&self) -> &SolverState {
        &self.state
    }

    /// Restores a previously saved state.
    pub fn set_state(&mut self, state: SolverState) {
        self.state = state;
    }

    /// Treat the next cycle as the first one.
    pub fn reset(&mut self) {
        self.state.reset();
    }

    /// Computes the joint velocities realizing `twist` at the joint configuration `q`.
    ///
    /// # Arguments
    ///
    /// * `q` - Current joint positions, at least `dof` long
    /// * `last_q_dot` - Command of the previous cycle
    /// * `twist` - Desired twist of the tip; only as many components as the Jacobian has rows are used
    /// * `limits_min`, `limits_max` - Position limits, at least `dof` long
    /// * `platform` - Base and chain base poses, required when the platform is active
    pub fn solve(
        &mut self,
        q: &JointVector,
        last_q_dot: &JointVector,
        twist: &Twist,
        limits_min: &[f64],
        limits_max: &[f64],
        platform: Option<&PlatformPoses>,
    ) -> Result<Solution, SolverError> {
        let jacobian = self.kinematics.jacobian(q);
        let mut solution = solve_with_state(
            &self.params, &mut self.state, &jacobian, q, last_q_dot, twist, limits_min, limits_max, platform,
        )?;

        if !self.limiters.is_empty() {
            solution.joint_velocities = if last_q_dot.len() == solution.joint_velocities.len() {
                self.limiters.enforce_limits_continuing(&solution.joint_velocities, q, last_q_dot)
            } else {
                self.limiters.enforce_limits(&solution.joint_velocities, q)
            };
        }
        Ok(solution)
    }
}

fn check_parameters(params: &SolverParameters, kinematics: &dyn ChainKinematics) -> Result<(), SolverError> {
    if let Err(err) = params.validate() {
        error!("Solver parameters rejected: {}", err);
        return Err(SolverError::InvalidParameters(err));
    }
    if kinematics.dof() != params.dof {
        return Err(SolverError::DimensionMismatch {
            what: "chain joints",
            expected: params.dof,
            found: kinematics.dof(),
        });
    }
    if params.base_active && params.kinematic_extension.extra_dof() == 0 {
        warn!("Platform is active but the kinematic extension is {}, platform velocities are not limited",
            params.kinematic_extension);
    }
    Ok(())
}

fn check_length(what: &'static str, found: usize, expected: usize) -> Result<(), SolverError> {
    if found < expected {
        return Err(SolverError::DimensionMismatch { what, expected, found });
    }
    Ok(())
}

/// One solver cycle without the limiter chain. All memory between cycles lives in `state`,
/// which is read and updated here.
///
/// `chain_jacobian` must have `params.dof` columns and at most six rows.
#[allow(clippy::too_many_arguments)]
pub fn solve_with_state(
    params: &SolverParameters,
    state: &mut SolverState,
    chain_jacobian: &DMatrix<f64>,
    q: &JointVector,
    last_q_dot: &JointVector,
    twist: &Twist,
    limits_min: &[f64],
    limits_max: &[f64],
    platform: Option<&PlatformPoses>,
) -> Result<Solution, SolverError> {
    let dof = params.dof;
    if chain_jacobian.ncols() != dof {
        return Err(SolverError::DimensionMismatch { what: "jacobian columns", expected: dof, found: chain_jacobian.ncols() });
    }
    if chain_jacobian.nrows() == 0 || chain_jacobian.nrows() > 6 {
        return Err(SolverError::DimensionMismatch { what: "jacobian rows", expected: 6, found: chain_jacobian.nrows() });
    }
    check_length("joint positions", q.len(), dof)?;
    check_length("limits_min", limits_min.len(), dof)?;
    check_length("limits_max", limits_max.len(), dof)?;
    if params.jla_active {
        check_length("last joint velocities", last_q_dot.len(), dof)?;
    }

    let jac = if params.base_active {
        let poses = platform.ok_or(SolverError::MissingPlatformPoses)?;
        let full = augment(chain_jacobian, &platform_jacobian(poses, params.base_ratio));
        debug!("Combined jacobian: {}", full);
        full
    } else {
        chain_jacobian.clone()
    };

    let svd = jac.clone().svd(true, true);
    let w = manipulability(&jac);
    let damping = damping_factor(params, w, &svd.singular_values, state);
    debug!("Manipulability: {}, damping factor: {}", w, damping);

    let rows = jac.nrows();
    let v_in = DVector::from_iterator(rows, twist.iter().take(rows).copied());

    let mut q_dot = if params.jla_active {
        let weights = calculate_weighting(q, last_q_dot, limits_min, limits_max, dof, jac.ncols(), state);
        solve_weighted(params, &jac, &weights, damping, &v_in)?
    } else if params.damping_method == DampingMethod::Truncation {
        truncated_pseudo_inverse(&svd, damping, params.eps)? * &v_in
    } else {
        solve_damped(&jac, damping, &v_in, params.eps)?
    };

    if params.legacy_enforce_limits {
        if let Some(factor) = max_position_limit_factor(
            &q_dot, q, limits_min, limits_max, dof, params.legacy_tolerance_rad(),
        ) {
            debug!("In-solver limit scaling with factor = {}", factor);
            q_dot /= factor;
        }
    }

    if !is_valid(q_dot.as_slice()) {
        warn!("Solver produced non finite joint velocities: {}", q_dot.transpose());
    }

    state.initial_iteration = false;

    Ok(Solution {
        joint_velocities: to_command(params, &q_dot),
        damping_factor: damping,
        manipulability: w,
    })
}

/// Pseudo-inverse from the SVD with the damped factors `s / (s^2 + lambda^2)`. Factors
/// whose denominator falls below `eps` or is zero are cut to zero.
fn truncated_pseudo_inverse(
    svd: &nalgebra::SVD<f64, nalgebra::Dyn, nalgebra::Dyn>,
    damping: f64,
    eps: f64,
) -> Result<DMatrix<f64>, SolverError> {
    let u = svd.u.as_ref().ok_or(SolverError::Numerical("SVD did not compute U"))?;
    let v_t = svd.v_t.as_ref().ok_or(SolverError::Numerical("SVD did not compute V"))?;
    let factors = svd.singular_values.map(|s| {
        let denominator = s * s + damping * damping;
        if denominator < eps || denominator <= 0.0 { 0.0 } else { s / denominator }
    });
    Ok(v_t.transpose() * DMatrix::from_diagonal(&factors) * u.transpose())
}

/// Damped least squares without weighting.
fn solve_damped(jac: &DMatrix<f64>, damping: f64, v_in: &DVector<f64>, eps: f64) -> Result<DVector<f64>, SolverError> {
    let (rows, columns) = jac.shape();
    let jac_t = jac.transpose();
    if columns >= rows {
        let damped = jac * &jac_t + DMatrix::identity(rows, rows) * (damping * damping);
        Ok(&jac_t * invert(damped, eps)? * v_in)
    } else {
        // The formula above is valid only for a full-row Jacobian
        let damped = &jac_t * jac + DMatrix::identity(columns, columns) * damping;
        Ok(invert(damped, eps)? * &jac_t * v_in)
    }
}

/// Weighted damped least squares with the joint limit avoidance weights on the diagonal.
fn solve_weighted(
    params: &SolverParameters,
    jac: &DMatrix<f64>,
    weights: &DVector<f64>,
    damping: f64,
    v_in: &DVector<f64>,
) -> Result<DVector<f64>, SolverError> {
    let (rows, columns) = jac.shape();
    let jac_t = jac.transpose();
    let w_inv = DMatrix::from_diagonal(&weights.map(|w| 1.0 / w));
    let wv = DMatrix::identity(rows, rows) * (damping * damping);

    if params.damping_method == DampingMethod::Truncation {
        let whole = jac * &w_inv * &jac_t + wv;
        let svd = whole.svd(false, true);
        let v_t = svd.v_t.as_ref().ok_or(SolverError::Numerical("SVD did not compute V"))?;
        let s_inv = svd.singular_values.map(|s| if s <= params.eps { 0.0 } else { 1.0 / s });
        let tmp = v_t.transpose() * DMatrix::from_diagonal(&s_inv) * v_t;
        Ok(&w_inv * &jac_t * tmp * v_in)
    } else if columns >= rows {
        let tmp = invert(jac * &w_inv * &jac_t + wv, params.eps)?;
        Ok(&w_inv * &jac_t * tmp * v_in)
    } else {
        // Symmetric square root of the weights keeps the normal matrix well conditioned
        let w_sqrt_inv = DMatrix::from_diagonal(&weights.map(|w| 1.0 / w.sqrt()));
        let tmp = invert(&w_sqrt_inv * &jac_t * jac * &w_sqrt_inv, params.eps)?;
        Ok(&w_sqrt_inv * tmp * &w_sqrt_inv * &jac_t * v_in)
    }
}

/// Inverse of a square matrix, falling back to the pseudo-inverse when it is singular.
fn invert(matrix: DMatrix<f64>, eps: f64) -> Result<DMatrix<f64>, SolverError> {
    match matrix.clone().try_inverse() {
        Some(inverse) => Ok(inverse),
        None => {
            debug!("Matrix is singular, using the pseudo-inverse");
            matrix.pseudo_inverse(eps).map_err(SolverError::Numerical)
        }
    }
}

/// Lays out the solver result as the command vector. Platform columns (x, y, yaw) are
/// placed into the six platform DOF.
fn to_command(params: &SolverParameters, q_dot: &DVector<f64>) -> DVector<f64> {
    if !params.base_active {
        return q_dot.rows(0, params.dof).into_owned();
    }
    let dof = params.dof;
    let mut command = DVector::zeros(dof + BASE_DOF);
    command.rows_mut(0, dof).copy_from(&q_dot.rows(0, dof));
    debug_assert_eq!(q_dot.len(), dof + PLATFORM_COLUMNS);
    command[dof] = q_dot[dof];
    command[dof + 1] = q_dot[dof + 1];
    command[dof + BASE_YAW_SLOT] = q_dot[dof + 2];
    command
}
