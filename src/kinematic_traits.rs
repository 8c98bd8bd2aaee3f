//! Interfaces to the kinematics collaborator that supplies the chain Jacobian.

extern crate nalgebra as na;

use na::{DMatrix, DVector, Isometry3, Vector6};

/// Pose of a frame. It contains both Cartesian position and rotation quaternion
pub type Pose = Isometry3<f64>;

/// Twist: linear velocity (x, y, z) followed by angular velocity (x, y, z).
pub type Twist = Vector6<f64>;

/// Joint positions or velocities of a chain with arbitrary number of joints.
pub type JointVector = DVector<f64>;

/// Source of the chain Jacobian for the current joint configuration. Forward kinematics
/// is not part of this crate; implement this trait on top of whatever kinematic model
/// the robot uses.
pub trait ChainKinematics {
    /// Number of joints of the chain.
    fn dof(&self) -> usize;

    /// Jacobian (task rows x `dof` columns) at the joint configuration `q`.
    fn jacobian(&self, q: &JointVector) -> DMatrix<f64>;
}

/// Poses needed to augment the chain Jacobian with the mobile platform block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformPoses {
    /// Pose of the platform reference point, relative to the chain base origin.
    pub base: Pose,

    /// Pose of the chain base. Only its rotation is used.
    pub chain_base: Pose,
}

impl PlatformPoses {
    pub fn new(base: Pose, chain_base: Pose) -> Self {
        Self { base, chain_base }
    }
}
