//! Supports reading solver parameters from YAML file (optional)

use std::path::Path;
use serde::Deserialize;
use serde_saphyr::Options;

use crate::parameter_error::ParameterError;
use crate::parameters::{DampingMethod, KinematicExtension, SolverParameters};

/// Enumerations may be given by name or by numeric code.
#[derive(Deserialize)]
#[serde(untagged)]
enum NameOrCode {
    Code(i64),
    Name(String),
}

impl TryFrom<NameOrCode> for DampingMethod {
    type Error = ParameterError;

    fn try_from(value: NameOrCode) -> Result<Self, Self::Error> {
        match value {
            NameOrCode::Code(code) => DampingMethod::try_from(code),
            NameOrCode::Name(name) => name.parse(),
        }
    }
}

impl TryFrom<NameOrCode> for KinematicExtension {
    type Error = ParameterError;

    fn try_from(value: NameOrCode) -> Result<Self, Self::Error> {
        match value {
            NameOrCode::Code(code) => KinematicExtension::try_from(code),
            NameOrCode::Name(name) => name.parse(),
        }
    }
}

/// Fields of the parameter file. Missing fields keep the defaults of [`SolverParameters`].
/// The same fields may be nested under the optional `twist_controller` namespace,
/// as in ROS parameter files.
#[derive(Deserialize, Default)]
#[serde(default)]
struct Root {
    twist_controller: Option<Box<Root>>,
    dof: Option<usize>,
    base_active: Option<bool>,
    base_ratio: Option<f64>,
    kinematic_extension: Option<NameOrCode>,
    max_vel_lin_base: Option<f64>,
    max_vel_rot_base: Option<f64>,
    damping_method: Option<NameOrCode>,
    wt: Option<f64>,
    lambda0: Option<f64>,
    eps: Option<f64>,
    delta_r_max: Option<f64>,
    damping_factor: Option<f64>,
    jla_active: Option<bool>,
    legacy_enforce_limits: Option<bool>,
    legacy_tolerance: Option<f64>,
    limits_tolerance: Option<f64>,
    keep_direction: Option<bool>,
    enforce_pos_limits: Option<bool>,
    enforce_vel_limits: Option<bool>,
    enforce_acc_limits: Option<bool>,
    limits_min: Vec<f64>,
    limits_max: Vec<f64>,
    limits_vel: Vec<f64>,
    limits_acc: Vec<f64>,
    cycle_time: Option<f64>,
}

/// Deserializes YAML text, `deg(angle)` being converted to radians.
pub(crate) fn from_yaml<T: for<'de> Deserialize<'de>>(contents: &str) -> Result<T, ParameterError> {
    serde_saphyr::from_str_with_options(
        contents,
        Options { angle_conversions: true, ..Default::default() }
    ).map_err(|e| ParameterError::ParseError(format!("{}", e)))
}

impl SolverParameters {
    /// Read the solver configuration from YAML file. YAML file like this is supported:
    /// ```yaml
    /// # 7 DOF arm on a fixed base
    /// twist_controller:
    ///   dof: 7
    ///   damping_method: MANIPULABILITY
    ///   wt: 0.005
    ///   lambda0: 0.01
    ///   jla_active: true
    ///   limits_min: [deg(-170), deg(-120), deg(-170), deg(-120), deg(-170), deg(-120), deg(-175)]
    ///   limits_max: [deg(170), deg(120), deg(170), deg(120), deg(170), deg(120), deg(175)]
    ///   limits_vel: [1.7, 1.7, 1.7, 2.2, 2.2, 3.1, 3.1]
    /// ```
    /// The `twist_controller` namespace is optional. Fields that are not present keep their
    /// default values. If `dof` is missing, it is taken from the length of `limits_min`.
    /// Damping method and kinematic extension are given by name or by numeric code.
    ///
    /// YAML extension to parse the deg(angle) function is supported (serde_saphyr).
    ///
    /// The parameters are validated before being returned.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ParameterError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Same as [`from_yaml_file`](Self::from_yaml_file), reading from a string.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ParameterError> {
        let root: Root = from_yaml(contents)?;
        let root = match root.twist_controller {
            Some(namespaced) => *namespaced,
            None => root,
        };

        let dof = match root.dof {
            Some(dof) => dof,
            None if !root.limits_min.is_empty() => root.limits_min.len(),
            None => return Err(ParameterError::MissingField("dof".to_string())),
        };

        let defaults = SolverParameters::default();
        let params = SolverParameters {
            dof,
            base_active: root.base_active.unwrap_or(defaults.base_active),
            base_ratio: root.base_ratio.unwrap_or(defaults.base_ratio),
            kinematic_extension: match root.kinematic_extension {
                Some(value) => value.try_into()?,
                None => defaults.kinematic_extension,
            },
            max_vel_lin_base: root.max_vel_lin_base.unwrap_or(defaults.max_vel_lin_base),
            max_vel_rot_base: root.max_vel_rot_base.unwrap_or(defaults.max_vel_rot_base),
            damping_method: match root.damping_method {
                Some(value) => value.try_into()?,
                None => defaults.damping_method,
            },
            wt: root.wt.unwrap_or(defaults.wt),
            lambda0: root.lambda0.unwrap_or(defaults.lambda0),
            eps: root.eps.unwrap_or(defaults.eps),
            delta_r_max: root.delta_r_max.unwrap_or(defaults.delta_r_max),
            damping_factor: root.damping_factor.unwrap_or(defaults.damping_factor),
            jla_active: root.jla_active.unwrap_or(defaults.jla_active),
            legacy_enforce_limits: root.legacy_enforce_limits.unwrap_or(defaults.legacy_enforce_limits),
            legacy_tolerance: root.legacy_tolerance.unwrap_or(defaults.legacy_tolerance),
            limits_tolerance: root.limits_tolerance.unwrap_or(defaults.limits_tolerance),
            keep_direction: root.keep_direction.unwrap_or(defaults.keep_direction),
            enforce_pos_limits: root.enforce_pos_limits.unwrap_or(defaults.enforce_pos_limits),
            enforce_vel_limits: root.enforce_vel_limits.unwrap_or(defaults.enforce_vel_limits),
            enforce_acc_limits: root.enforce_acc_limits.unwrap_or(defaults.enforce_acc_limits),
            limits_min: root.limits_min,
            limits_max: root.limits_max,
            limits_vel: root.limits_vel,
            limits_acc: root.limits_acc,
            cycle_time: root.cycle_time.unwrap_or(defaults.cycle_time),
        };

        params.validate()?;
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal() {
        let params = SolverParameters::from_yaml_str(
            "limits_min: [-1, -1]\nlimits_max: [1, 1]\nlimits_vel: [0.5, 0.5]\n",
        ).unwrap();
        assert_eq!(params.dof, 2);
        assert_eq!(params.limits_min, vec![-1.0, -1.0]);
        assert_eq!(params.damping_method, DampingMethod::Constant);
        assert_eq!(params.cycle_time, 0.02);
    }

    #[test]
    fn test_namespace_codes_and_degrees() {
        let yaml = "\
twist_controller:
  dof: 1
  damping_method: 1
  kinematic_extension: BASE_ACTIVE
  limits_min: [deg(-90)]
  limits_max: [deg(90.0)]
  limits_vel: [1]
";
        let params = SolverParameters::from_yaml_str(yaml).unwrap();
        assert_eq!(params.damping_method, DampingMethod::ManipulabilityRate);
        assert_eq!(params.kinematic_extension, KinematicExtension::BaseActive);
        assert!((params.limits_min[0] + std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((params.limits_max[0] - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_damping_method() {
        let yaml = "dof: 0\ndamping_method: LEVENBERG\n";
        assert!(matches!(
            SolverParameters::from_yaml_str(yaml),
            Err(ParameterError::UnknownDampingMethod(_))
        ));
        let yaml = "dof: 0\ndamping_method: 9\n";
        assert!(matches!(
            SolverParameters::from_yaml_str(yaml),
            Err(ParameterError::UnknownDampingMethod(_))
        ));
    }

    #[test]
    fn test_enumerations_by_code_and_of_wrong_type() {
        let params = SolverParameters::from_yaml_str("dof: 0\nkinematic_extension: 1\ndamping_method: TRUNCATION\n").unwrap();
        assert_eq!(params.kinematic_extension, KinematicExtension::BaseActive);
        assert_eq!(params.damping_method, DampingMethod::Truncation);

        assert!(matches!(
            SolverParameters::from_yaml_str("dof: 0\nkinematic_extension: 4\n"),
            Err(ParameterError::UnknownKinematicExtension(_))
        ));
        assert!(matches!(
            SolverParameters::from_yaml_str("dof: 0\ndamping_method: [1, 2]\n"),
            Err(ParameterError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_dof() {
        assert!(matches!(
            SolverParameters::from_yaml_str("wt: 0.1\n"),
            Err(ParameterError::MissingField(_))
        ));
    }

    #[test]
    fn test_malformed_values() {
        assert!(matches!(
            SolverParameters::from_yaml_str("dof: 0\nwt: fast\n"),
            Err(ParameterError::ParseError(_))
        ));
        assert!(matches!(
            SolverParameters::from_yaml_str("dof: 0\njla_active: 3\n"),
            Err(ParameterError::ParseError(_))
        ));
        assert!(SolverParameters::from_yaml_str("dof: [\n").is_err());
    }

    #[test]
    fn test_yaml_round_trip_of_full_configuration() {
        let mut params = SolverParameters::for_chain(vec![-2.0, -1.5, -3.0], vec![2.0, 1.5, 3.0], vec![1.0, 0.8, 1.2]);
        params.damping_method = DampingMethod::TrackingError;
        params.jla_active = true;
        params.base_active = true;
        params.base_ratio = 0.25;
        params.kinematic_extension = KinematicExtension::BaseActive;
        params.enforce_acc_limits = true;
        params.limits_acc = vec![4.0, 4.0, 5.0];
        params.keep_direction = false;

        let parsed = SolverParameters::from_yaml_str(&params.to_yaml()).unwrap();
        assert_eq!(parsed, params);
    }
}
