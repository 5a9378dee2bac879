use std::fmt::Display;

use serde::{Serialize, Serializer};

/// A stable, enumerable identifier for a specific rejection reason
///
/// Codes are grouped by facility (one per plugin); the pair
/// `(facility, code)` is unique across a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FailureCode {
    pub facility: &'static str,
    pub code: u16,
    pub name: &'static str,
}

impl FailureCode {
    pub const fn new(facility: &'static str, code: u16, name: &'static str) -> Self {
        Self {
            facility,
            code,
            name,
        }
    }
}

impl Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failure_{}_{}", self.facility, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValidationResult {
    #[default]
    Success,

    /// Not a failure, but the entity should not be processed further
    Neutral,

    Failure(FailureCode),
}

impl ValidationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Combines two results; failures dominate neutrals, neutrals dominate
    /// successes, and the first failure is kept
    pub fn aggregate(self, other: ValidationResult) -> ValidationResult {
        match (self, other) {
            (Self::Failure(_), _) => self,
            (_, Self::Failure(_)) => other,
            (Self::Neutral, _) | (_, Self::Neutral) => Self::Neutral,
            _ => Self::Success,
        }
    }

    pub fn failure(facility: &'static str, code: u16, name: &'static str) -> Self {
        Self::Failure(FailureCode::new(facility, code, name))
    }
}

impl From<FailureCode> for ValidationResult {
    fn from(value: FailureCode) -> Self {
        Self::Failure(value)
    }
}

impl Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::Neutral => write!(f, "Neutral"),
            Self::Failure(code) => code.fmt(f),
        }
    }
}

impl Serialize for ValidationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Returns `Failure(code)` unless `condition` holds
pub fn check(condition: bool, code: FailureCode) -> ValidationResult {
    if condition {
        ValidationResult::Success
    } else {
        ValidationResult::Failure(code)
    }
}
