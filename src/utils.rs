//! Helper functions

use crate::kinematic_traits::JointVector;

/// Checks if all elements in the slice are finite
pub fn is_valid(qs: &[f64]) -> bool {
    qs.iter().all(|&q| q.is_finite())
}

/// Print joint velocities, converting radians to degrees.
/// Entries beyond `dof` (platform velocities) are printed as they are.
pub fn dump_velocities(q_dot: &JointVector, dof: usize) {
    let mut row_str = String::new();
    for (idx, value) in q_dot.iter().enumerate() {
        if idx < dof {
            row_str.push_str(&format!("{:7.3} ", value.to_degrees()));
        } else {
            if idx == dof {
                row_str.push_str("| ");
            }
            row_str.push_str(&format!("{:7.4} ", value));
        }
    }
    println!("[{}]", row_str.trim_end());
}

/// Allows to specify joint values in degrees (converts to radians)
pub fn as_radians(degrees: &[f64]) -> JointVector {
    JointVector::from_iterator(degrees.len(), degrees.iter().map(|d| d.to_radians()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_is_valid_with_all_finite() {
        let qs = [0.0, 1.0, -1.0, 0.5, -0.5, PI];
        assert!(is_valid(&qs));
    }

    #[test]
    fn test_is_valid_with_nan() {
        let qs = [0.0, f64::NAN, 1.0];
        assert!(!is_valid(&qs));
    }

    #[test]
    fn test_is_valid_with_infinity() {
        let qs = [0.0, f64::INFINITY, 1.0, -1.0, 0.5, -0.5, 0.0];
        assert!(!is_valid(&qs));
    }

    #[test]
    fn test_as_radians() {
        let q = as_radians(&[180.0, -90.0, 0.0]);
        assert_eq!(q.len(), 3);
        assert!((q[0] - PI).abs() < 1e-12);
        assert!((q[1] + PI / 2.0).abs() < 1e-12);
    }
}
