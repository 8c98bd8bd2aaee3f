//! Scenario files for running the solver over several cycles without a robot (optional)

use std::path::Path;

use nalgebra::{DMatrix, DVector, Isometry3, Translation3, UnitQuaternion};
use serde::Deserialize;
use tracing::info;

use crate::augmented_solver::{AugmentedSolver, SolverError};
use crate::kinematic_traits::{JointVector, PlatformPoses, Twist};
use crate::parameter_error::ParameterError;
use crate::parameters_from_file::from_yaml;

fn default_cycles() -> usize { 1 }

#[derive(Deserialize)]
struct ScenarioYaml {
    jacobian: Option<Vec<Vec<f64>>>,
    q: Option<Vec<f64>>,
    #[serde(default)]
    last_q_dot: Option<Vec<f64>>,
    twist: Option<Vec<f64>>,
    #[serde(default = "default_cycles")]
    cycles: usize,
    #[serde(default)]
    base_pose: Option<Vec<f64>>,
    #[serde(default)]
    chain_base_pose: Option<Vec<f64>>,
}

/// Fixed Jacobian, start configuration and desired twist to be tracked for a number of cycles.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub jacobian: DMatrix<f64>,
    pub q: JointVector,
    /// Command of the cycle before the first one; zero if not given.
    pub last_q_dot: Option<JointVector>,
    pub twist: Twist,
    pub cycles: usize,
    pub platform: Option<PlatformPoses>,
}

impl Scenario {
    /// Read the scenario from YAML file:
    /// ```yaml
    /// jacobian:
    ///   - [1.0, 0.0, 0.5]
    ///   - [0.0, 1.0, 0.5]
    /// q: [0.0, 0.3, -0.2]
    /// twist: [0.1, 0.0]
    /// cycles: 50
    /// # Optional, x y z roll pitch yaw
    /// base_pose: [0.2, 0.0, 0.0, 0.0, 0.0, 0.0]
    /// chain_base_pose: [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
    /// ```
    /// Missing twist components are zero. Platform poses are only used when the platform
    /// is active in the solver parameters.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ParameterError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ParameterError> {
        let doc: ScenarioYaml = from_yaml(contents)?;

        let rows = doc.jacobian.ok_or_else(|| ParameterError::MissingField("jacobian".to_string()))?;
        let columns = rows.first().map_or(0, Vec::len);
        if rows.is_empty() || rows.len() > 6 || columns == 0 {
            return Err(ParameterError::InvalidValue {
                field: "jacobian",
                reason: format!("expected 1 to 6 non empty rows, found {}", rows.len()),
            });
        }
        if let Some(row) = rows.iter().find(|row| row.len() != columns) {
            return Err(ParameterError::InvalidLength { field: "jacobian", expected: columns, found: row.len() });
        }
        let jacobian = DMatrix::from_row_iterator(rows.len(), columns, rows.into_iter().flatten());

        let q = doc.q.ok_or_else(|| ParameterError::MissingField("q".to_string()))?;
        if q.len() != columns {
            return Err(ParameterError::InvalidLength { field: "q", expected: columns, found: q.len() });
        }

        let twist_values = doc.twist.ok_or_else(|| ParameterError::MissingField("twist".to_string()))?;
        if twist_values.len() > 6 {
            return Err(ParameterError::InvalidValue {
                field: "twist",
                reason: format!("at most 6 components, found {}", twist_values.len()),
            });
        }
        let mut twist = Twist::zeros();
        for (i, value) in twist_values.into_iter().enumerate() {
            twist[i] = value;
        }

        let base = pose(doc.base_pose, "base_pose")?;
        let chain_base = pose(doc.chain_base_pose, "chain_base_pose")?;
        let platform = match (base, chain_base) {
            (Some(base), Some(chain_base)) => Some(PlatformPoses::new(base, chain_base)),
            (Some(base), None) => Some(PlatformPoses::new(base, Isometry3::identity())),
            (None, Some(_)) => return Err(ParameterError::MissingField("base_pose".to_string())),
            (None, None) => None,
        };

        Ok(Scenario {
            jacobian,
            q: DVector::from_vec(q),
            last_q_dot: doc.last_q_dot.map(DVector::from_vec),
            twist,
            cycles: doc.cycles,
            platform,
        })
    }

    /// Runs the solver for the configured number of cycles. Each command is fed back as the
    /// previous command of the next cycle and integrated into the joint positions over
    /// the cycle time. Returns the command of every cycle.
    pub fn run(&self, solver: &mut AugmentedSolver) -> Result<Vec<DVector<f64>>, SolverError> {
        let params = solver.params().clone();
        let mut q = self.q.clone();
        let mut last_q_dot = self.last_q_dot.clone()
            .unwrap_or_else(|| DVector::zeros(params.command_len()));

        let mut commands = Vec::with_capacity(self.cycles);
        for cycle in 0..self.cycles {
            let solution = solver.solve(
                &q, &last_q_dot, &self.twist, &params.limits_min, &params.limits_max, self.platform.as_ref(),
            )?;
            info!("Cycle {}: damping {:.5}, manipulability {:.5}", cycle, solution.damping_factor, solution.manipulability);

            for i in 0..params.dof {
                q[i] += solution.joint_velocities[i] * params.cycle_time;
            }
            last_q_dot = solution.joint_velocities.clone();
            commands.push(solution.joint_velocities);
        }
        Ok(commands)
    }
}

/// Pose given as `[x, y, z, roll, pitch, yaw]`.
fn pose(values: Option<Vec<f64>>, field: &'static str) -> Result<Option<Isometry3<f64>>, ParameterError> {
    let Some(values) = values else {
        return Ok(None);
    };
    if values.len() != 6 {
        return Err(ParameterError::InvalidLength { field, expected: 6, found: values.len() });
    }
    Ok(Some(Isometry3::from_parts(
        Translation3::new(values[0], values[1], values[2]),
        UnitQuaternion::from_euler_angles(values[3], values[4], values[5]),
    )))
}
