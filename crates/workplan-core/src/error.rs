//! Error types for the planning core
//!
//! Every rejected operation surfaces as a [`PlanError`]. Field-level and
//! domain-rule failures are ordinary values; only
//! [`PlanError::InvariantViolation`] signals corrupted prior state, and it is
//! raised through [`PlanError::invariant`] so the alarm is logged where the
//! corruption is observed.

use crate::types::{EntityKind, Hours, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Result alias used throughout the crate
pub type PlanResult<T> = Result<T, PlanError>;

/// Main planning error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// One or more field rules failed
    #[error("validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    /// The edge would close a cycle in the dependency graph
    #[error("dependency {predecessor} -> {successor} would close a cycle")]
    CycleDetected {
        predecessor: TaskId,
        successor: TaskId,
        /// Existing path from `successor` back to `predecessor`
        path: Vec<TaskId>,
    },

    /// Committing the hours would exceed the staff member's capacity
    #[error(
        "capacity exceeded: {requested}h requested with {committed}h committed of {available}h available"
    )]
    CapacityExceeded {
        requested: Hours,
        committed: Hours,
        available: Hours,
    },

    /// A referenced entity does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: Uuid },

    /// A concurrent writer committed first
    #[error(
        "conflicting concurrent write on {kind} {}",
        id.map_or_else(|| "table".to_string(), |id| id.to_string())
    )]
    Conflict { kind: EntityKind, id: Option<Uuid> },

    /// Stored state broke an invariant the core maintains
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl PlanError {
    /// Build an invariant violation and raise the internal alarm
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(alarm = true, %message, "invariant violation detected");
        Self::InvariantViolation(message)
    }

    /// Not-found error for an entity kind
    #[inline]
    #[must_use]
    pub fn not_found(kind: EntityKind, id: impl Into<Uuid>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Flat classification for callers
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    /// Human-readable messages, one per violated rule
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::ValidationFailed(errors) => errors.iter().map(|v| v.message.clone()).collect(),
            other => vec![other.to_string()],
        }
    }

    /// Whether re-running against fresh state may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether this indicates corrupted state rather than a rejected request
    #[inline]
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

impl From<ValidationErrors> for PlanError {
    fn from(value: ValidationErrors) -> Self {
        Self::ValidationFailed(value)
    }
}

/// Flat error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationFailed,
    CycleDetected,
    CapacityExceeded,
    NotFound,
    Conflict,
    InvariantViolation,
}

/// Which rule a field failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rule {
    NonNilId,
    Positive,
    NonEmpty,
    MaxLength,
    AtMost,
    DateOrder,
    Distinct,
    Format,
    AnyField,
    Unique,
    Reference,
}

/// A single failed rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: &'static str,
    pub rule: Rule,
    pub message: String,
}

impl Violation {
    /// Create a violation
    #[must_use]
    pub fn new(field: &'static str, rule: Rule, message: impl Into<String>) -> Self {
        Self {
            field,
            rule,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Every violation found for one command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(Vec<Violation>);

impl ValidationErrors {
    /// Empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-violation set
    #[must_use]
    pub fn single(violation: Violation) -> Self {
        Self(vec![violation])
    }

    /// Record a violation
    pub fn push(&mut self, violation: Violation) {
        self.0.push(violation);
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    /// Whether any violation concerns `field`
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|v| v.field == field)
    }

    /// `Ok` when empty, otherwise the collected violations
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl IntoIterator for ValidationErrors {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_are_listed_individually() {
        let mut errors = ValidationErrors::new();
        errors.push(Violation::new("name", Rule::NonEmpty, "name must not be empty"));
        errors.push(Violation::new("hours", Rule::Positive, "hours must be positive"));

        let err = PlanError::from(errors);
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(
            err.messages(),
            vec!["name must not be empty", "hours must be positive"]
        );
        assert!(err.to_string().contains("name must not be empty; hours must be positive"));
    }

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = PlanError::Conflict {
            kind: EntityKind::PeriodStaff,
            id: None,
        };
        assert!(conflict.is_retryable());
        assert!(conflict.to_string().contains("period_staff table"));

        let capacity = PlanError::CapacityExceeded {
            requested: 10,
            committed: 35,
            available: 40,
        };
        assert!(!capacity.is_retryable());
        assert_eq!(
            capacity.to_string(),
            "capacity exceeded: 10h requested with 35h committed of 40h available"
        );
    }

    #[test]
    fn invariant_is_internal() {
        let err = PlanError::invariant("total went negative");
        assert!(err.is_internal());
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
    }

    #[test]
    fn empty_errors_are_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
