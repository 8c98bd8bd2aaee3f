//! Defines the twist controller parameter data structure

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

use crate::parameter_error::ParameterError;

/// Selects how the regularization scalar (damping factor) of the least squares
/// solution is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DampingMethod {
    /// Damping grows as the manipulability `sqrt(det(J Jt))` drops below `wt`.
    Manipulability,
    /// Damping follows the cycle to cycle change of the manipulability.
    ManipulabilityRate,
    /// Damping derived from the smallest non-degenerate singular value and the
    /// admissible relative tracking error `delta_r_max`.
    TrackingError,
    /// Damping switched on when the smallest singular value enters the `eps` region.
    SingularRegion,
    /// Fixed `damping_factor`.
    Constant,
    /// No damping; singular values below `eps` are cut from the pseudo-inverse.
    Truncation,
}

impl DampingMethod {
    pub const ALL: [DampingMethod; 6] = [
        DampingMethod::Manipulability,
        DampingMethod::ManipulabilityRate,
        DampingMethod::TrackingError,
        DampingMethod::SingularRegion,
        DampingMethod::Constant,
        DampingMethod::Truncation,
    ];

    /// Name as used in parameter files.
    pub fn name(&self) -> &'static str {
        match self {
            DampingMethod::Manipulability => "MANIPULABILITY",
            DampingMethod::ManipulabilityRate => "MANIPULABILITY_RATE",
            DampingMethod::TrackingError => "TRACKING_ERROR",
            DampingMethod::SingularRegion => "SINGULAR_REGION",
            DampingMethod::Constant => "CONSTANT",
            DampingMethod::Truncation => "TRUNCATION",
        }
    }
}

impl fmt::Display for DampingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DampingMethod {
    type Err = ParameterError;

    /// Accepts the parameter file names in any case, with `_` or `-` as separator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        DampingMethod::ALL
            .iter()
            .copied()
            .find(|method| method.name() == normalized)
            .ok_or_else(|| ParameterError::UnknownDampingMethod(s.to_string()))
    }
}

impl TryFrom<i64> for DampingMethod {
    type Error = ParameterError;

    /// Numeric codes in declaration order, `MANIPULABILITY = 0` to `TRUNCATION = 5`.
    fn try_from(code: i64) -> Result<Self, Self::Error> {
        usize::try_from(code)
            .ok()
            .and_then(|index| DampingMethod::ALL.get(index).copied())
            .ok_or_else(|| ParameterError::UnknownDampingMethod(code.to_string()))
    }
}

/// Additional synthetic degrees of freedom appended to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KinematicExtension {
    #[default]
    None,
    /// Mobile platform contributes six DOF (translation and rotation) after the chain joints.
    BaseActive,
}

impl KinematicExtension {
    pub fn name(&self) -> &'static str {
        match self {
            KinematicExtension::None => "NO_EXTENSION",
            KinematicExtension::BaseActive => "BASE_ACTIVE",
        }
    }

    /// Number of synthetic DOF this extension appends to the command vector.
    pub fn extra_dof(&self) -> usize {
        match self {
            KinematicExtension::None => 0,
            KinematicExtension::BaseActive => BASE_DOF,
        }
    }
}

impl fmt::Display for KinematicExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KinematicExtension {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NO_EXTENSION" | "NONE" => Ok(KinematicExtension::None),
            "BASE_ACTIVE" => Ok(KinematicExtension::BaseActive),
            _ => Err(ParameterError::UnknownKinematicExtension(s.to_string())),
        }
    }
}

impl TryFrom<i64> for KinematicExtension {
    type Error = ParameterError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(KinematicExtension::None),
            1 => Ok(KinematicExtension::BaseActive),
            _ => Err(ParameterError::UnknownKinematicExtension(code.to_string())),
        }
    }
}

/// Synthetic DOF of the mobile platform: translation x, y, z and rotation x, y, z.
pub const BASE_DOF: usize = 6;

bitflags! {
    /// Physical quantities the limiter chain is asked to bound.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LimitKinds: u8 {
        const POSITION = 1;
        const VELOCITY = 1 << 1;
        const ACCELERATION = 1 << 2;
    }
}

/// Parameters of the twist controller core. They stay unchanged during a control cycle;
/// changing them goes through [`crate::augmented_solver::AugmentedSolver::reconfigure`].
#[derive(Debug, Clone, PartialEq)]
pub struct SolverParameters {
    /// Number of joints of the physical chain.
    pub dof: usize,

    // ---- Mobile platform ----
    /// Augment the chain Jacobian with the planar platform block.
    pub base_active: bool,
    /// Scaling of the platform columns. Small values make platform motion expensive.
    pub base_ratio: f64,
    /// Synthetic DOF appended to the command for velocity limiting.
    pub kinematic_extension: KinematicExtension,
    /// Linear velocity bound of the platform (m/s).
    pub max_vel_lin_base: f64,
    /// Angular velocity bound of the platform (rad/s).
    pub max_vel_rot_base: f64,

    // ---- Damping ----
    pub damping_method: DampingMethod,
    /// Manipulability threshold (or rate threshold for `ManipulabilityRate`).
    pub wt: f64,
    /// Maximal damping.
    pub lambda0: f64,
    /// Singular value threshold.
    pub eps: f64,
    /// Admissible relative tracking error for `TrackingError`, in `[0, 1)`.
    pub delta_r_max: f64,
    /// Damping used by `Constant`.
    pub damping_factor: f64,

    // ---- Joint limit avoidance ----
    /// Weight joints approaching their position limits in the least squares solution.
    pub jla_active: bool,

    // ---- In-solver limit scaling ----
    /// Scale the solver output near position limits inside the solver itself.
    pub legacy_enforce_limits: bool,
    /// Tolerance band of the in-solver scaling, degrees.
    pub legacy_tolerance: f64,

    // ---- Limiter chain ----
    /// Tolerance band of the position limiters, degrees.
    pub limits_tolerance: f64,
    /// Scale the whole command by one factor instead of joint by joint.
    pub keep_direction: bool,
    pub enforce_pos_limits: bool,
    pub enforce_vel_limits: bool,
    pub enforce_acc_limits: bool,

    // ---- Joint limits ----
    /// Lower position limits (rad), at least `dof` long.
    pub limits_min: Vec<f64>,
    /// Upper position limits (rad), at least `dof` long.
    pub limits_max: Vec<f64>,
    /// Velocity bounds (rad/s), at least `dof` long when velocity limiting is enabled.
    pub limits_vel: Vec<f64>,
    /// Acceleration bounds (rad/s²), at least `dof` long when acceleration limiting is enabled.
    pub limits_acc: Vec<f64>,
    /// Control cycle period (s).
    pub cycle_time: f64,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            dof: 0,
            base_active: false,
            base_ratio: 0.0,
            kinematic_extension: KinematicExtension::None,
            max_vel_lin_base: 0.5,
            max_vel_rot_base: 0.5,
            damping_method: DampingMethod::Constant,
            wt: 0.005,
            lambda0: 0.01,
            eps: 0.001,
            delta_r_max: 0.1,
            damping_factor: 0.2,
            jla_active: false,
            legacy_enforce_limits: false,
            legacy_tolerance: 5.0,
            limits_tolerance: 5.0,
            keep_direction: true,
            enforce_pos_limits: true,
            enforce_vel_limits: true,
            enforce_acc_limits: false,
            limits_min: Vec::new(),
            limits_max: Vec::new(),
            limits_vel: Vec::new(),
            limits_acc: Vec::new(),
            cycle_time: 0.02,
        }
    }
}

impl SolverParameters {
    /// Default parameters for a chain of `dof` joints with the given position and velocity
    /// limits.
    pub fn for_chain(limits_min: Vec<f64>, limits_max: Vec<f64>, limits_vel: Vec<f64>) -> Self {
        Self {
            dof: limits_min.len(),
            limits_min,
            limits_max,
            limits_vel,
            ..Self::default()
        }
    }

    /// Limiters requested by the enable flags.
    pub fn enforced_limits(&self) -> LimitKinds {
        let mut kinds = LimitKinds::empty();
        kinds.set(LimitKinds::POSITION, self.enforce_pos_limits);
        kinds.set(LimitKinds::VELOCITY, self.enforce_vel_limits);
        kinds.set(LimitKinds::ACCELERATION, self.enforce_acc_limits);
        kinds
    }

    /// Length of the command vector: chain joints plus synthetic platform DOF.
    pub fn command_len(&self) -> usize {
        if self.base_active {
            self.dof + BASE_DOF
        } else {
            self.dof
        }
    }

    /// Tolerance band of the limiter chain in radians.
    pub fn limits_tolerance_rad(&self) -> f64 {
        self.limits_tolerance.to_radians()
    }

    /// Tolerance band of the in-solver scaling in radians.
    pub fn legacy_tolerance_rad(&self) -> f64 {
        self.legacy_tolerance.to_radians()
    }

    /// Checks the parameters for consistency. Solvers are only built from parameters that
    /// pass this check.
    pub fn validate(&self) -> Result<(), ParameterError> {
        check_length("limits_min", &self.limits_min, self.dof)?;
        check_length("limits_max", &self.limits_max, self.dof)?;
        for i in 0..self.dof {
            if !(self.limits_min[i] < self.limits_max[i]) {
                return Err(ParameterError::InvalidValue {
                    field: "limits_min",
                    reason: format!(
                        "joint {} lower limit {} is not below upper limit {}",
                        i, self.limits_min[i], self.limits_max[i]
                    ),
                });
            }
        }

        for (field, value) in [
            ("base_ratio", self.base_ratio),
            ("wt", self.wt),
            ("lambda0", self.lambda0),
            ("eps", self.eps),
            ("delta_r_max", self.delta_r_max),
            ("damping_factor", self.damping_factor),
            ("legacy_tolerance", self.legacy_tolerance),
            ("limits_tolerance", self.limits_tolerance),
            ("max_vel_lin_base", self.max_vel_lin_base),
            ("max_vel_rot_base", self.max_vel_rot_base),
            ("cycle_time", self.cycle_time),
        ] {
            if !value.is_finite() {
                return Err(ParameterError::InvalidValue {
                    field,
                    reason: format!("must be finite (got {})", value),
                });
            }
        }

        if self.eps < 0.0 {
            return Err(invalid("eps", format!("must not be negative (got {})", self.eps)));
        }
        if self.eps == 0.0 && matches!(
            self.damping_method,
            DampingMethod::Truncation | DampingMethod::SingularRegion | DampingMethod::TrackingError
        ) {
            return Err(invalid("eps", format!("must be positive for {}", self.damping_method)));
        }
        if !(0.0..1.0).contains(&self.delta_r_max) {
            return Err(invalid("delta_r_max", format!("must be in [0, 1) (got {})", self.delta_r_max)));
        }
        if self.legacy_enforce_limits && self.legacy_tolerance <= 0.0 {
            return Err(invalid("legacy_tolerance", format!("must be positive (got {})", self.legacy_tolerance)));
        }
        if self.enforce_pos_limits && self.limits_tolerance <= 0.0 {
            return Err(invalid("limits_tolerance", format!("must be positive (got {})", self.limits_tolerance)));
        }
        if self.enforce_vel_limits {
            check_length("limits_vel", &self.limits_vel, self.dof)?;
        }
        if self.enforce_acc_limits {
            check_length("limits_acc", &self.limits_acc, self.dof)?;
        }
        if self.cycle_time <= 0.0 {
            return Err(invalid("cycle_time", format!("must be positive (got {})", self.cycle_time)));
        }
        Ok(())
    }

    /// Convert to string yaml representation (quick viewing, saving, etc).
    /// The output can be read back with `from_yaml_str`.
    pub fn to_yaml(&self) -> String {
        format!(
            "dof: {}\n\
            base_active: {}\n\
            base_ratio: {}\n\
            kinematic_extension: {}\n\
            max_vel_lin_base: {}\n\
            max_vel_rot_base: {}\n\
            damping_method: {}\n\
            wt: {}\n\
            lambda0: {}\n\
            eps: {}\n\
            delta_r_max: {}\n\
            damping_factor: {}\n\
            jla_active: {}\n\
            legacy_enforce_limits: {}\n\
            legacy_tolerance: {}\n\
            limits_tolerance: {}\n\
            keep_direction: {}\n\
            enforce_pos_limits: {}\n\
            enforce_vel_limits: {}\n\
            enforce_acc_limits: {}\n\
            limits_min: [{}]\n\
            limits_max: [{}]\n\
            limits_vel: [{}]\n\
            limits_acc: [{}]\n\
            cycle_time: {}\n",
            self.dof,
            self.base_active,
            float(self.base_ratio),
            self.kinematic_extension,
            float(self.max_vel_lin_base),
            float(self.max_vel_rot_base),
            self.damping_method,
            float(self.wt),
            float(self.lambda0),
            float(self.eps),
            float(self.delta_r_max),
            float(self.damping_factor),
            self.jla_active,
            self.legacy_enforce_limits,
            float(self.legacy_tolerance),
            float(self.limits_tolerance),
            self.keep_direction,
            self.enforce_pos_limits,
            self.enforce_vel_limits,
            self.enforce_acc_limits,
            join(&self.limits_min),
            join(&self.limits_max),
            join(&self.limits_vel),
            join(&self.limits_acc),
            float(self.cycle_time),
        )
    }
}

fn check_length(field: &'static str, values: &[f64], dof: usize) -> Result<(), ParameterError> {
    if values.len() < dof {
        return Err(ParameterError::InvalidLength { field, expected: dof, found: values.len() });
    }
    Ok(())
}

fn invalid(field: &'static str, reason: String) -> ParameterError {
    ParameterError::InvalidValue { field, reason }
}

// Debug formatting keeps the decimal point so that YAML reads the value back as a real.
fn float(x: f64) -> String {
    format!("{:?}", x)
}

fn join(values: &[f64]) -> String {
    values.iter().map(|x| float(*x)).collect::<Vec<_>>().join(", ")
}
