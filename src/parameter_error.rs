//! Error handling for parameter validation and parameter file loading

use std::io;

/// Unified error to report invalid solver parameters, both when constructed in code
/// and when loaded from YAML.
#[derive(Debug)]
pub enum ParameterError {
    IoError(io::Error),
    ParseError(String),
    MissingField(String),
    InvalidLength { field: &'static str, expected: usize, found: usize },
    UnknownDampingMethod(String),
    UnknownKinematicExtension(String),
    InvalidValue { field: &'static str, reason: String },
}

impl std::fmt::Display for ParameterError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ParameterError::IoError(ref err) =>
                write!(f, "IO Error: {}", err),
            ParameterError::ParseError(ref msg) =>
                write!(f, "Parse Error: {}", msg),
            ParameterError::MissingField(ref field) =>
                write!(f, "Missing Field: {}", field),
            ParameterError::InvalidLength { field, expected, found } =>
                write!(f, "Invalid Length of {}: expected at least {}, found {}", field, expected, found),
            ParameterError::UnknownDampingMethod(ref method) =>
                write!(f, "Damping method {} not defined", method),
            ParameterError::UnknownKinematicExtension(ref ext) =>
                write!(f, "Kinematic extension {} not defined", ext),
            ParameterError::InvalidValue { field, ref reason } =>
                write!(f, "Invalid value of {}: {}", field, reason),
        }
    }
}

impl std::error::Error for ParameterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParameterError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ParameterError {
    fn from(err: io::Error) -> Self {
        ParameterError::IoError(err)
    }
}
