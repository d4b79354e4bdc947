//! Common errors across the era5-daily crate
use itertools::Itertools;

/// Raised when no registered equivalence links two units.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot convert from unit '{from}' to unit '{to}': no equivalence between them is registered")]
pub struct UnitConversionError {
    pub from: String,
    pub to: String,
}

impl UnitConversionError {
    pub fn new<F: ToString, T: ToString>(from: F, to: T) -> Self {
        Self { from: from.to_string(), to: to.to_string() }
    }
}

/// Raised when a canonical variable cannot be produced by any of its candidate rules.
///
/// `required_inputs` lists every input named by the variable's candidates, in the
/// form `daily:<name>`, `subdaily:<name>` or `resolved:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Could not resolve variable '{variable}'; none of its inputs were available ({})", .required_inputs.iter().join(", "))]
pub struct MissingSourceError {
    pub variable: String,
    pub required_inputs: Vec<String>,
}

impl MissingSourceError {
    pub fn new<S: ToString>(variable: S, required_inputs: Vec<String>) -> Self {
        Self { variable: variable.to_string(), required_inputs }
    }
}

/// Consistency failures detected when fields are combined, either element-wise
/// during a derivation or when the final dataset is merged.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssemblyError {
    #[error("Variable '{0}' is not at daily frequency")]
    NotDaily(String),
    #[error("Variable '{variable}' has {found} frequency but was added to a {expected} collection")]
    FrequencyMismatch { variable: String, found: String, expected: String },
    #[error("Variable '{variable}' has units '{found}' but its descriptor requires '{expected}'")]
    UnitMismatch { variable: String, found: String, expected: String },
    #[error("Variable '{variable}' is defined at locations [{found}] but '{reference}' is defined at [{expected}]")]
    LocationMismatch { variable: String, reference: String, found: String, expected: String },
    #[error("Variable '{variable}' covers {found} but '{reference}' covers {expected}")]
    TimeMismatch { variable: String, reference: String, found: String, expected: String },
    #[error("Variable '{variable}' has an array of shape {found:?}, expected {expected:?}")]
    ShapeMismatch { variable: String, found: Vec<usize>, expected: Vec<usize> },
    #[error("No variables were resolved, an empty dataset cannot be assembled")]
    Empty,
}

impl AssemblyError {
    pub fn unit_mismatch<V: ToString, F: ToString, E: ToString>(variable: V, found: F, expected: E) -> Self {
        Self::UnitMismatch { variable: variable.to_string(), found: found.to_string(), expected: expected.to_string() }
    }

    pub fn location_mismatch<V: ToString, R: ToString>(variable: V, reference: R, found: &[String], expected: &[String]) -> Self {
        Self::LocationMismatch {
            variable: variable.to_string(),
            reference: reference.to_string(),
            found: found.join(", "),
            expected: expected.join(", "),
        }
    }

    pub fn time_mismatch<V: ToString, R: ToString, F: ToString, E: ToString>(variable: V, reference: R, found: F, expected: E) -> Self {
        Self::TimeMismatch {
            variable: variable.to_string(),
            reference: reference.to_string(),
            found: found.to_string(),
            expected: expected.to_string(),
        }
    }
}
