//! Joint limit enforcement applied to the joint velocities produced by the solver.
//!
//! The [`LimiterContainer`] holds a chain of [`Limiter`] strategies built from the
//! [`SolverParameters`]. Position, velocity and acceleration are limited in this order, each
//! stage consuming the output of the previous one. With `keep_direction` set the strategies
//! scale the whole command vector by a single factor, so the direction of the resulting twist
//! is preserved (important when a trajectory must be followed exactly). Otherwise each joint
//! is scaled on its own.

use std::f64::consts::PI;

use nalgebra::DVector;
use tracing::warn;

use crate::parameters::{KinematicExtension, LimitKinds, SolverParameters};

/// Smooth scaling factor for a joint that is inside the tolerance band of a position limit
/// and moves towards it. Returns `None` if the joint is outside the band or moves away.
///
/// The factor is `1 / (0.5 + 0.5 cos(pi * depth / tolerance))^5` where `depth` is how far
/// the joint has entered the band. It is 1 at the band boundary and grows without bound
/// when the joint reaches the limit. Depth is clamped to the band, so a joint at or beyond
/// its limit gets an infinite factor and its velocity towards the limit becomes zero.
/// A tolerance that is not positive means there is no band.
pub fn position_limit_factor(q: f64, q_dot: f64, limit_min: f64, limit_max: f64, tolerance: f64) -> Option<f64> {
    if !(tolerance > 0.0) {
        return None;
    }
    let depth = if limit_max - q < tolerance {
        // Nearer to the maximum limit
        if q_dot > 0.0 {
            q + tolerance - limit_max
        } else {
            return None;
        }
    } else if q - limit_min < tolerance {
        // Nearer to the minimum limit
        if q_dot < 0.0 {
            limit_min + tolerance - q
        } else {
            return None;
        }
    } else {
        return None;
    };

    let depth = depth.clamp(0.0, tolerance);
    Some(1.0 / (0.5 + 0.5 * (PI * depth / tolerance).cos()).powi(5))
}

/// Largest [`position_limit_factor`] among the first `dof` joints, or `None` if no joint
/// triggers.
pub fn max_position_limit_factor(
    q_dot: &DVector<f64>,
    q: &DVector<f64>,
    limits_min: &[f64],
    limits_max: &[f64],
    dof: usize,
    tolerance: f64,
) -> Option<f64> {
    let joints = dof.min(q_dot.len()).min(q.len()).min(limits_min.len()).min(limits_max.len());
    (0..joints)
        .filter_map(|i| position_limit_factor(q[i], q_dot[i], limits_min[i], limits_max[i], tolerance))
        .reduce(f64::max)
}

/// Velocity bounds of all DOF of the command: chain joints followed by the synthetic
/// platform DOF when the platform extension is active.
fn velocity_bounds(params: &SolverParameters) -> Vec<f64> {
    let mut bounds: Vec<f64> = params.limits_vel.iter().take(params.dof).copied().collect();
    if params.kinematic_extension == KinematicExtension::BaseActive {
        bounds.extend([params.max_vel_lin_base; 3]);
        bounds.extend([params.max_vel_rot_base; 3]);
    }
    bounds
}

/// Strategies that bound a single physical quantity. The set is closed; which ones run
/// is decided by [`LimiterContainer::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limiter {
    /// Position limits with a common factor for the whole command.
    AllJointPositions,
    /// Velocity limits with a common factor for the whole command.
    AllJointVelocities,
    /// Acceleration limits with a common factor for the change of the whole command.
    AllJointAccelerations,
    /// Position limits scaling each joint by its own factor.
    IndividualJointPositions,
    /// Velocity limits saturating each joint on its own.
    IndividualJointVelocities,
    /// Acceleration limits clamping the change of each joint on its own.
    IndividualJointAccelerations,
}

impl Limiter {
    /// Physical quantity this strategy limits.
    pub fn kind(&self) -> LimitKinds {
        match self {
            Limiter::AllJointPositions | Limiter::IndividualJointPositions => LimitKinds::POSITION,
            Limiter::AllJointVelocities | Limiter::IndividualJointVelocities => LimitKinds::VELOCITY,
            Limiter::AllJointAccelerations | Limiter::IndividualJointAccelerations => LimitKinds::ACCELERATION,
        }
    }

    /// Whether the strategy keeps the ratio between the command components.
    pub fn keeps_direction(&self) -> bool {
        matches!(
            self,
            Limiter::AllJointPositions | Limiter::AllJointVelocities | Limiter::AllJointAccelerations
        )
    }

    fn for_kind(kind: LimitKinds, keep_direction: bool) -> Self {
        if kind == LimitKinds::POSITION {
            if keep_direction { Limiter::AllJointPositions } else { Limiter::IndividualJointPositions }
        } else if kind == LimitKinds::VELOCITY {
            if keep_direction { Limiter::AllJointVelocities } else { Limiter::IndividualJointVelocities }
        } else if keep_direction {
            Limiter::AllJointAccelerations
        } else {
            Limiter::IndividualJointAccelerations
        }
    }

    /// Bound `q_dot` given the current joint positions `q`. `last_q_dot` is the command of
    /// the previous cycle; acceleration strategies pass through when it is not known.
    /// Never fails: out of range input is scaled down.
    pub fn enforce_limits(
        &self,
        params: &SolverParameters,
        q_dot: &DVector<f64>,
        q: &DVector<f64>,
        last_q_dot: Option<&DVector<f64>>,
    ) -> DVector<f64> {
        match self {
            Limiter::AllJointPositions => all_joint_positions(params, q_dot, q),
            Limiter::IndividualJointPositions => individual_joint_positions(params, q_dot, q),
            Limiter::AllJointVelocities => all_joint_velocities(params, q_dot),
            Limiter::IndividualJointVelocities => individual_joint_velocities(params, q_dot),
            Limiter::AllJointAccelerations => match last_q_dot {
                Some(last) => all_joint_accelerations(params, q_dot, last),
                None => q_dot.clone(),
            },
            Limiter::IndividualJointAccelerations => match last_q_dot {
                Some(last) => individual_joint_accelerations(params, q_dot, last),
                None => q_dot.clone(),
            },
        }
    }
}

fn all_joint_positions(params: &SolverParameters, q_dot: &DVector<f64>, q: &DVector<f64>) -> DVector<f64> {
    match max_position_limit_factor(
        q_dot, q, &params.limits_min, &params.limits_max, params.dof, params.limits_tolerance_rad(),
    ) {
        Some(factor) => {
            warn!("Tolerance surpassed: enforcing limits for all joint positions with factor = {}", factor);
            q_dot / factor
        }
        None => q_dot.clone(),
    }
}

fn individual_joint_positions(params: &SolverParameters, q_dot: &DVector<f64>, q: &DVector<f64>) -> DVector<f64> {
    let tolerance = params.limits_tolerance_rad();
    let joints = params.dof
        .min(q_dot.len())
        .min(q.len())
        .min(params.limits_min.len())
        .min(params.limits_max.len());
    let mut scaled = q_dot.clone();
    for i in 0..joints {
        if let Some(factor) = position_limit_factor(
            q[i], q_dot[i], params.limits_min[i], params.limits_max[i], tolerance,
        ) {
            scaled[i] = q_dot[i] / factor;
        }
    }
    scaled
}

fn all_joint_velocities(params: &SolverParameters, q_dot: &DVector<f64>) -> DVector<f64> {
    let bounds = velocity_bounds(params);
    let max_factor = q_dot
        .iter()
        .zip(bounds.iter())
        .filter(|(_, bound)| **bound > 0.0)
        .map(|(v, bound)| (v / bound).abs())
        .fold(1.0, f64::max);

    if max_factor > 1.0 {
        warn!("Tolerance surpassed: enforcing limits for all joint velocities with factor = {}", max_factor);
        q_dot / max_factor
    } else {
        q_dot.clone()
    }
}

fn individual_joint_velocities(params: &SolverParameters, q_dot: &DVector<f64>) -> DVector<f64> {
    let bounds = velocity_bounds(params);
    let mut saturated = q_dot.clone();
    for (v, bound) in saturated.iter_mut().zip(bounds.iter()) {
        if *bound > 0.0 && v.abs() > *bound {
            *v = bound.copysign(*v);
        }
    }
    saturated
}

/// Allowed change of each joint velocity within one cycle.
fn velocity_steps(params: &SolverParameters) -> impl Iterator<Item = f64> + '_ {
    params.limits_acc.iter().take(params.dof).map(|a| a * params.cycle_time)
}

fn all_joint_accelerations(params: &SolverParameters, q_dot: &DVector<f64>, last_q_dot: &DVector<f64>) -> DVector<f64> {
    if last_q_dot.len() != q_dot.len() {
        return q_dot.clone();
    }
    let delta = q_dot - last_q_dot;
    let max_factor = delta
        .iter()
        .zip(velocity_steps(params))
        .filter(|(_, step)| *step > 0.0)
        .map(|(d, step)| (d / step).abs())
        .fold(1.0, f64::max);

    if max_factor > 1.0 {
        warn!("Tolerance surpassed: enforcing limits for all joint accelerations with factor = {}", max_factor);
        last_q_dot + delta / max_factor
    } else {
        q_dot.clone()
    }
}

fn individual_joint_accelerations(params: &SolverParameters, q_dot: &DVector<f64>, last_q_dot: &DVector<f64>) -> DVector<f64> {
    if last_q_dot.len() != q_dot.len() {
        return q_dot.clone();
    }
    let mut limited = q_dot.clone();
    for (i, step) in velocity_steps(params).enumerate() {
        if step > 0.0 {
            limited[i] = last_q_dot[i] + (q_dot[i] - last_q_dot[i]).clamp(-step, step);
        }
    }
    limited
}

/// Ordered chain of limiter strategies. Rebuilt by [`LimiterContainer::init`] only when the
/// parameters change, never per cycle.
#[derive(Debug, Clone)]
pub struct LimiterContainer {
    params: SolverParameters,
    limiters: Vec<Limiter>,
}

impl LimiterContainer {
    /// Creates the container and builds the strategy chain for `params`.
    pub fn new(params: SolverParameters) -> Self {
        let mut container = Self { params, limiters: Vec::with_capacity(3) };
        container.init();
        container
    }

    /// Rebuilds the strategy chain from scratch. At most one strategy per physical quantity,
    /// in the order position, velocity, acceleration.
    pub fn init(&mut self) {
        self.limiters.clear();
        let enforced = self.params.enforced_limits();
        for kind in [LimitKinds::POSITION, LimitKinds::VELOCITY, LimitKinds::ACCELERATION] {
            if enforced.contains(kind) {
                self.limiters.push(Limiter::for_kind(kind, self.params.keep_direction));
            }
        }
    }

    /// Replaces the parameters and rebuilds the chain.
    pub fn set_params(&mut self, params: SolverParameters) {
        self.params = params;
        self.init();
    }

    pub fn params(&self) -> &SolverParameters {
        &self.params
    }

    pub fn limiters(&self) -> &[Limiter] {
        &self.limiters
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Folds `q_dot_ik` through all strategies. Acceleration stages pass through as there
    /// is no previous command.
    pub fn enforce_limits(&self, q_dot_ik: &DVector<f64>, q: &DVector<f64>) -> DVector<f64> {
        self.fold(q_dot_ik, q, None)
    }

    /// Same as [`LimiterContainer::enforce_limits`], with the command of the previous cycle
    /// available to the acceleration stage.
    pub fn enforce_limits_continuing(
        &self,
        q_dot_ik: &DVector<f64>,
        q: &DVector<f64>,
        last_q_dot: &DVector<f64>,
    ) -> DVector<f64> {
        self.fold(q_dot_ik, q, Some(last_q_dot))
    }

    fn fold(&self, q_dot_ik: &DVector<f64>, q: &DVector<f64>, last_q_dot: Option<&DVector<f64>>) -> DVector<f64> {
        self.limiters.iter().fold(q_dot_ik.clone(), |q_dot, limiter| {
            limiter.enforce_limits(&self.params, &q_dot, q, last_q_dot)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_joint(keep_direction: bool) -> SolverParameters {
        SolverParameters {
            keep_direction,
            limits_tolerance: 0.1_f64.to_degrees(),
            ..SolverParameters::for_chain(vec![-1.0], vec![1.0], vec![1.0])
        }
    }

    fn vector(values: &[f64]) -> DVector<f64> {
        DVector::from_row_slice(values)
    }

    #[test]
    fn test_position_factor_at_band_boundary_and_limit() {
        let factor = position_limit_factor(0.9, 1.0, -1.0, 1.0, 0.1 + 1e-12).unwrap();
        assert!((factor - 1.0).abs() < 1e-6);
        assert!(position_limit_factor(1.0, 1.0, -1.0, 1.0, 0.1).unwrap().is_infinite());
        assert!(position_limit_factor(1.2, 1.0, -1.0, 1.0, 0.1).unwrap().is_infinite());
    }

    #[test]
    fn test_position_factor_without_band() {
        assert!(position_limit_factor(1.2, 0.5, -1.0, 1.0, -1.0).is_none());
        assert!(position_limit_factor(1.0, 0.5, -1.0, 1.0, 0.0).is_none());
        assert!(position_limit_factor(-1.2, -0.5, -1.0, 1.0, f64::NAN).is_none());
    }

    #[test]
    fn test_position_factor_direction() {
        // Moving away from the limit is never scaled
        assert!(position_limit_factor(0.95, -0.5, -1.0, 1.0, 0.1).is_none());
        assert!(position_limit_factor(-0.95, 0.5, -1.0, 1.0, 0.1).is_none());
        let toward_min = position_limit_factor(-0.95, -0.5, -1.0, 1.0, 0.1).unwrap();
        assert!((toward_min - 32.0).abs() < 1e-9);
        assert!(position_limit_factor(0.0, 0.5, -1.0, 1.0, 0.1).is_none());
    }

    #[test]
    fn test_init_order_and_variants() {
        let mut params = single_joint(true);
        params.enforce_acc_limits = true;
        params.limits_acc = vec![1.0];
        let container = LimiterContainer::new(params.clone());
        assert_eq!(container.limiters(), &[
            Limiter::AllJointPositions,
            Limiter::AllJointVelocities,
            Limiter::AllJointAccelerations,
        ]);

        params.keep_direction = false;
        params.enforce_vel_limits = false;
        let mut container = LimiterContainer::new(params.clone());
        assert_eq!(container.limiters(), &[
            Limiter::IndividualJointPositions,
            Limiter::IndividualJointAccelerations,
        ]);
        assert!(container.limiters().iter().all(|l| !l.keeps_direction()));

        params.enforce_pos_limits = false;
        params.enforce_acc_limits = false;
        container.set_params(params);
        assert!(container.is_empty());
        let q_dot = vector(&[5.0]);
        assert_eq!(container.enforce_limits(&q_dot, &vector(&[0.99])), q_dot);
    }

    #[test]
    fn test_init_is_idempotent() {
        let mut container = LimiterContainer::new(single_joint(true));
        container.init();
        container.init();
        assert_eq!(container.limiters().len(), 2);
        let kinds: Vec<_> = container.limiters().iter().map(|l| l.kind()).collect();
        assert_eq!(kinds, vec![LimitKinds::POSITION, LimitKinds::VELOCITY]);
    }

    #[test]
    fn test_individual_positions_scale_only_triggering_joint() {
        let params = SolverParameters {
            keep_direction: false,
            limits_tolerance: 0.1_f64.to_degrees(),
            ..SolverParameters::for_chain(vec![-1.0, -1.0], vec![1.0, 1.0], vec![10.0, 10.0])
        };
        let q = vector(&[0.95, 0.0]);
        let q_dot = vector(&[0.5, 0.5]);
        let out = Limiter::IndividualJointPositions.enforce_limits(&params, &q_dot, &q, None);
        assert!((out[0] - 0.5 / 32.0).abs() < 1e-9);
        assert_eq!(out[1], 0.5);
    }

    #[test]
    fn test_velocity_bounds_with_base() {
        let params = SolverParameters {
            kinematic_extension: KinematicExtension::BaseActive,
            max_vel_lin_base: 0.3,
            max_vel_rot_base: 0.6,
            ..SolverParameters::for_chain(vec![-1.0, -1.0], vec![1.0, 1.0], vec![2.0, 2.0])
        };
        assert_eq!(velocity_bounds(&params), vec![2.0, 2.0, 0.3, 0.3, 0.3, 0.6, 0.6, 0.6]);

        // Platform yaw rate 1.2 is twice its bound
        let q_dot = vector(&[1.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 1.2]);
        let out = Limiter::AllJointVelocities.enforce_limits(&params, &q_dot, &vector(&[0.0, 0.0]), None);
        assert!((out - &q_dot / 2.0).norm() < 1e-12);
    }

    #[test]
    fn test_unbounded_velocity_is_skipped() {
        let params = SolverParameters::for_chain(vec![-1.0, -1.0], vec![1.0, 1.0], vec![0.0, 1.0]);
        let q_dot = vector(&[100.0, 0.5]);
        let out = Limiter::AllJointVelocities.enforce_limits(&params, &q_dot, &vector(&[0.0, 0.0]), None);
        assert_eq!(out, q_dot);
    }

    #[test]
    fn test_acceleration_limits() {
        let params = SolverParameters {
            limits_acc: vec![10.0, 10.0],
            cycle_time: 0.01,
            ..SolverParameters::for_chain(vec![-1.0, -1.0], vec![1.0, 1.0], vec![10.0, 10.0])
        };
        let last = vector(&[0.0, 0.0]);
        let q = vector(&[0.0, 0.0]);
        // Allowed change per cycle is 0.1
        let q_dot = vector(&[0.4, 0.1]);

        let all = Limiter::AllJointAccelerations.enforce_limits(&params, &q_dot, &q, Some(&last));
        assert!((all - vector(&[0.1, 0.025])).norm() < 1e-12);

        let individual = Limiter::IndividualJointAccelerations.enforce_limits(&params, &q_dot, &q, Some(&last));
        assert!((individual - vector(&[0.1, 0.1])).norm() < 1e-12);

        // Without a previous command nothing is known about the acceleration
        let passed = Limiter::AllJointAccelerations.enforce_limits(&params, &q_dot, &q, None);
        assert_eq!(passed, q_dot);
    }

    #[test]
    fn test_container_continuing_uses_last_command() {
        let params = SolverParameters {
            enforce_pos_limits: false,
            enforce_vel_limits: false,
            enforce_acc_limits: true,
            limits_acc: vec![1.0],
            cycle_time: 0.1,
            ..SolverParameters::for_chain(vec![-1.0], vec![1.0], vec![1.0])
        };
        let container = LimiterContainer::new(params);
        let q = vector(&[0.0]);
        let out = container.enforce_limits_continuing(&vector(&[1.0]), &q, &vector(&[0.5]));
        assert!((out[0] - 0.6).abs() < 1e-12);
        assert_eq!(container.enforce_limits(&vector(&[1.0]), &q)[0], 1.0);
    }
}
