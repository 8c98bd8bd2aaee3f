use nalgebra::DVector;

/// Memory the solver carries from one control cycle to the next.
///
/// Kept as a plain value so it can be inspected, saved and restored (for example to
/// replay a cycle deterministically in tests).
#[derive(Debug, Clone, PartialEq)]
pub struct SolverState {
    /// No cycle has been solved yet.
    pub initial_iteration: bool,

    /// Manipulability of the previous cycle (`ManipulabilityRate` damping).
    pub last_manipulability: f64,

    /// Per-joint limit proximity measure of the previous cycle (joint limit avoidance).
    pub last_dh: DVector<f64>,
}

impl Default for SolverState {
    fn default() -> Self {
        Self {
            initial_iteration: true,
            last_manipulability: 0.0,
            last_dh: DVector::zeros(0),
        }
    }
}

impl SolverState {
    /// Fresh state sized for a chain of `dof` joints.
    pub fn new(dof: usize) -> Self {
        Self { last_dh: DVector::zeros(dof), ..Self::default() }
    }

    /// Forget everything learned so far; the next cycle is treated as the first one.
    pub fn reset(&mut self) {
        let dof = self.last_dh.len();
        *self = Self::new(dof);
    }
}
