extern crate nalgebra as na;

use na::{DMatrix, Matrix3, Matrix6x3, Vector3};

use crate::kinematic_traits::{ChainKinematics, JointVector, PlatformPoses, Pose};

/// Number of columns the mobile platform adds to the chain Jacobian: planar x, planar y, yaw.
pub const PLATFORM_COLUMNS: usize = 3;

/// Chain "kinematics" that always reports the same Jacobian. Useful when the Jacobian
/// comes from an external source each cycle, and for testing.
#[derive(Debug, Clone)]
pub struct FixedJacobian {
    matrix: DMatrix<f64>,
}

impl FixedJacobian {
    pub fn new(matrix: DMatrix<f64>) -> Self {
        Self { matrix }
    }

    /// Build from a row-major slice of `rows` rows.
    pub fn from_row_slice(rows: usize, columns: usize, data: &[f64]) -> Self {
        Self::new(DMatrix::from_row_slice(rows, columns, data))
    }

    /// Replace the reported matrix (next cycle Jacobian).
    pub fn set(&mut self, matrix: DMatrix<f64>) {
        self.matrix = matrix;
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }
}

impl ChainKinematics for FixedJacobian {
    fn dof(&self) -> usize {
        self.matrix.ncols()
    }

    fn jacobian(&self, _q: &JointVector) -> DMatrix<f64> {
        self.matrix.clone()
    }
}

/// Geometric 6 x dof Jacobian obtained by numerical differentiation of a forward
/// kinematics function supplied by the caller.
pub struct NumericalJacobian<F>
where
    F: Fn(&JointVector) -> Pose,
{
    forward: F,
    dof: usize,

    /// The disturbance value used for computing the Jacobian
    epsilon: f64,
}

impl<F> NumericalJacobian<F>
where
    F: Fn(&JointVector) -> Pose,
{
    /// # Arguments
    ///
    /// * `forward` - Forward kinematics of the tip frame
    /// * `dof` - Number of joints `forward` expects
    /// * `epsilon` - A small value used for numerical differentiation
    pub fn new(forward: F, dof: usize, epsilon: f64) -> Self {
        Self { forward, dof, epsilon }
    }
}

impl<F> ChainKinematics for NumericalJacobian<F>
where
    F: Fn(&JointVector) -> Pose,
{
    fn dof(&self) -> usize {
        self.dof
    }

    /// Each column corresponds to a joint, rows are linear (first three) and angular
    /// (last three) velocities of the tip.
    fn jacobian(&self, q: &JointVector) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(6, self.dof);
        let current_pose = (self.forward)(q);
        let current_position = current_pose.translation.vector;
        let current_orientation = current_pose.rotation;

        for i in 0..self.dof {
            let mut perturbed_qs = q.clone();
            perturbed_qs[i] += self.epsilon;
            let perturbed_pose = (self.forward)(&perturbed_qs);

            let delta_position = (perturbed_pose.translation.vector - current_position) / self.epsilon;
            let delta_orientation =
                (perturbed_pose.rotation * current_orientation.inverse()).scaled_axis() / self.epsilon;

            jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&delta_position);
            jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&delta_orientation);
        }

        jacobian
    }
}

/// Manipulability measure `sqrt(|det(J Jt)|)`.
pub fn manipulability(jacobian: &DMatrix<f64>) -> f64 {
    let product = jacobian * jacobian.transpose();
    product.determinant().abs().sqrt()
}

/// Jacobian block of the mobile platform, expressed in the chain base frame.
///
/// Columns are the platform velocity along its x and y axes and its yaw rate, all scaled
/// by `base_ratio`. Translational columns are the rotated unit vectors. The yaw column
/// has the tangential velocity `w x r` in its linear rows and the rotated angular rate
/// in its angular rows, where `r` is the rotated position of the platform reference point.
pub fn platform_jacobian(poses: &PlatformPoses, base_ratio: f64) -> Matrix6x3<f64> {
    let chain_base_rot: Matrix3<f64> = poses.chain_base.rotation.to_rotation_matrix().into_inner();
    let r_base_link = poses.base.translation.vector;

    let w_chain_base = chain_base_rot * Vector3::new(0.0, 0.0, base_ratio);
    let r_chain_base = chain_base_rot * r_base_link;
    let tangential_vel = w_chain_base.cross(&r_chain_base);

    let mut block = Matrix6x3::zeros();
    for row in 0..3 {
        block[(row, 0)] = base_ratio * chain_base_rot[(row, 0)];
        block[(row, 1)] = base_ratio * chain_base_rot[(row, 1)];
        block[(row, 2)] = tangential_vel[row];
        block[(row + 3, 2)] = w_chain_base[row];
    }
    block
}

/// Horizontal concatenation `[J | J_platform]` of a 6-row chain Jacobian and the
/// platform block.
pub fn augment(chain_jacobian: &DMatrix<f64>, platform: &Matrix6x3<f64>) -> DMatrix<f64> {
    let rows = chain_jacobian.nrows();
    let dof = chain_jacobian.ncols();
    let mut full = DMatrix::zeros(rows, dof + PLATFORM_COLUMNS);
    full.view_mut((0, 0), (rows, dof)).copy_from(chain_jacobian);
    // Task rows beyond the twist are not affected by the platform.
    let platform_rows = rows.min(6);
    full.view_mut((0, dof), (platform_rows, PLATFORM_COLUMNS))
        .copy_from(&platform.view((0, 0), (platform_rows, PLATFORM_COLUMNS)));
    full
}

#[cfg(test)]
mod tests {
    use super::*;
    use na::{Isometry3, Translation3, UnitQuaternion};
    use std::f64::consts::FRAC_PI_2;

    const EPSILON: f64 = 1e-6;

    fn assert_matrix_approx_eq(left: &DMatrix<f64>, right: &DMatrix<f64>, epsilon: f64) {
        assert_eq!(left.shape(), right.shape());
        for i in 0..left.nrows() {
            for j in 0..left.ncols() {
                assert!((left[(i, j)] - right[(i, j)]).abs() < epsilon,
                        "left[{0},{1}] = {2} is not approximately equal to right[{0},{1}] = {3}",
                        i, j, left[(i, j)], right[(i, j)]);
            }
        }
    }

    /// Planar arm with two unit links rotating around Z.
    fn two_link_forward(q: &JointVector) -> Pose {
        let x = q[0].cos() + (q[0] + q[1]).cos();
        let y = q[0].sin() + (q[0] + q[1]).sin();
        Isometry3::from_parts(
            Translation3::new(x, y, 0.0),
            UnitQuaternion::from_euler_angles(0.0, 0.0, q[0] + q[1]),
        )
    }

    #[test]
    fn test_numerical_jacobian_two_link() {
        let chain = NumericalJacobian::new(two_link_forward, 2, EPSILON);
        let q = JointVector::from_vec(vec![0.3, 0.7]);
        let jacobian = chain.jacobian(&q);

        let (s1, c1) = q[0].sin_cos();
        let (s12, c12) = (q[0] + q[1]).sin_cos();
        let expected = DMatrix::from_row_slice(6, 2, &[
            -s1 - s12, -s12,
            c1 + c12, c12,
            0.0, 0.0,
            0.0, 0.0,
            0.0, 0.0,
            1.0, 1.0,
        ]);
        assert_matrix_approx_eq(&jacobian, &expected, 1e-4);
        assert_eq!(chain.dof(), 2);
    }

    #[test]
    fn test_manipulability_of_stretched_arm() {
        let chain = NumericalJacobian::new(two_link_forward, 2, EPSILON);
        let stretched = chain.jacobian(&JointVector::from_vec(vec![0.0, 0.0]));
        let position_rows = stretched.rows(0, 2).into_owned();
        assert!(manipulability(&position_rows) < 1e-4);

        let bent = chain.jacobian(&JointVector::from_vec(vec![0.0, FRAC_PI_2]));
        let position_rows = bent.rows(0, 2).into_owned();
        // |det| of [[-1, -1], [1, 0]] is 1
        assert!((manipulability(&position_rows) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_platform_jacobian_identity_chain_base() {
        let poses = PlatformPoses::new(
            Isometry3::translation(1.0, 0.0, 0.0),
            Isometry3::identity(),
        );
        let block = platform_jacobian(&poses, 1.0);
        let expected = Matrix6x3::new(
            1.0, 0.0, 0.0,
            0.0, 1.0, 1.0,
            0.0, 0.0, 0.0,
            0.0, 0.0, 0.0,
            0.0, 0.0, 0.0,
            0.0, 0.0, 1.0,
        );
        assert!((block - expected).norm() < EPSILON, "{}", block);
    }

    #[test]
    fn test_platform_jacobian_rotated_chain_base() {
        // Chain base yawed by 90 degrees: platform x maps to chain base y.
        let poses = PlatformPoses::new(
            Isometry3::translation(0.0, 0.0, 0.0),
            Isometry3::from_parts(Translation3::identity(), UnitQuaternion::from_euler_angles(0.0, 0.0, FRAC_PI_2)),
        );
        let block = platform_jacobian(&poses, 0.5);
        assert!((block[(0, 0)] - 0.0).abs() < EPSILON);
        assert!((block[(1, 0)] - 0.5).abs() < EPSILON);
        assert!((block[(0, 1)] + 0.5).abs() < EPSILON);
        // No lever arm, no tangential velocity
        assert!(block.fixed_view::<3, 1>(0, 2).norm() < EPSILON);
        assert!((block[(5, 2)] - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_augment() {
        let chain = DMatrix::from_element(6, 2, 2.0);
        let block = Matrix6x3::from_element(1.0);
        let full = augment(&chain, &block);
        assert_eq!(full.shape(), (6, 5));
        assert_eq!(full[(5, 1)], 2.0);
        assert_eq!(full[(5, 4)], 1.0);
        assert_eq!(full[(0, 2)], 1.0);
    }

    #[test]
    fn test_fixed_jacobian() {
        let mut chain = FixedJacobian::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(chain.dof(), 3);
        chain.set(DMatrix::identity(6, 4));
        assert_eq!(chain.jacobian(&JointVector::zeros(4)).shape(), (6, 4));
        assert_eq!(chain.matrix()[(3, 3)], 1.0);
    }
}
