//! Rust implementation of the velocity-level inverse kinematics (twist controller) for
//! redundant manipulators, optionally mounted on a mobile platform.
//!
//! Given the Jacobian of the chain and the desired twist of its tip, the solver computes joint
//! velocities with the damped least squares method. Damping keeps the solution bounded
//! close to kinematic singularities, at the price of a tracking error that grows only as
//! much as needed.
//!
//! # Features
//!
//! - Six damping methods: by manipulability, by manipulability rate, by admissible tracking
//!   error, by singular region, constant damping, and truncation of small singular values.
//! - Joint limit avoidance by weighting the least squares solution (weighted least norm).
//! - Mobile platform support: the chain Jacobian is augmented with the planar platform block
//!   (x, y, yaw), and the platform velocities become part of the command.
//! - Limiter chain applied to every command: position, velocity and acceleration limits, either
//!   preserving the direction of the whole command or limiting each joint independently.
//! - Generic priority stack of auxiliary tasks for hierarchical control schemes.
//! - Solver parameters can be read from YAML files (feature `allow_filesystem`).
//!
//! Forward kinematics is not part of this crate. The Jacobian is supplied through the
//! [`kinematic_traits::ChainKinematics`] trait; [`jacobian::NumericalJacobian`] builds it
//! from any forward kinematics function, and [`jacobian::FixedJacobian`] returns a stored one.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use nalgebra::{DVector, Vector6};
//! use rs_twist_controller::augmented_solver::AugmentedSolver;
//! use rs_twist_controller::jacobian::FixedJacobian;
//! use rs_twist_controller::parameters::SolverParameters;
//!
//! let params = SolverParameters::for_chain(vec![-2.0; 3], vec![2.0; 3], vec![1.0; 3]);
//! let chain = Arc::new(FixedJacobian::from_row_slice(2, 3, &[
//!     1.0, 0.0, 0.5,
//!     0.0, 1.0, 0.5,
//! ]));
//! let mut solver = AugmentedSolver::new(params.clone(), chain).unwrap();
//!
//! let q = DVector::zeros(3);
//! let twist = Vector6::new(0.1, 0.0, 0.0, 0.0, 0.0, 0.0);
//! let solution = solver.solve(&q, &q, &twist, &params.limits_min, &params.limits_max, None).unwrap();
//! assert_eq!(solution.joint_velocities.len(), 3);
//! ```

pub mod parameters;
pub mod parameter_error;

#[cfg(feature = "allow_filesystem")]
pub mod parameters_from_file;

#[cfg(feature = "allow_filesystem")]
pub mod scenario;

pub mod utils;
pub mod kinematic_traits;
pub mod jacobian;

pub mod solver_state;
pub mod damping;
pub mod joint_limit_avoidance;
pub mod augmented_solver;

pub mod limiters;

pub mod task_stack;
