//! Field rules
//!
//! Pure predicates plus [`Checks`], which applies them and keeps every
//! failure instead of stopping at the first one.

use crate::config::ValidationConfig;
use crate::error::{Rule, ValidationErrors, Violation};
use chrono::NaiveDate;
use uuid::Uuid;

#[inline]
#[must_use]
pub fn is_non_nil(id: Uuid) -> bool {
    !id.is_nil()
}

#[inline]
#[must_use]
pub fn is_positive(value: u32) -> bool {
    value > 0
}

#[inline]
#[must_use]
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

#[inline]
#[must_use]
pub fn dates_ordered(start: NaiveDate, end: NaiveDate) -> bool {
    start < end
}

/// One `@` with something on both sides and a dot in the domain
#[must_use]
pub fn looks_like_email(value: &str) -> bool {
    let mut parts = value.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        _ => false,
    }
}

/// Violation accumulator for one command
#[derive(Debug)]
pub struct Checks<'a> {
    limits: &'a ValidationConfig,
    errors: ValidationErrors,
}

impl<'a> Checks<'a> {
    #[must_use]
    pub fn new(limits: &'a ValidationConfig) -> Self {
        Self {
            limits,
            errors: ValidationErrors::new(),
        }
    }

    fn fail(&mut self, field: &'static str, rule: Rule, message: String) {
        self.errors.push(Violation::new(field, rule, message));
    }

    /// Identifier must not be nil
    pub fn id(&mut self, field: &'static str, id: impl Into<Uuid>) -> &mut Self {
        if !is_non_nil(id.into()) {
            self.fail(field, Rule::NonNilId, format!("{field} must be a non-empty identifier"));
        }
        self
    }

    /// Optional identifier, checked only when present
    pub fn opt_id<I: Into<Uuid>>(&mut self, field: &'static str, id: Option<I>) -> &mut Self {
        if let Some(id) = id {
            self.id(field, id);
        }
        self
    }

    /// Name must be non-blank and within the configured length
    pub fn name(&mut self, field: &'static str, value: &str) -> &mut Self {
        if is_blank(value) {
            self.fail(field, Rule::NonEmpty, format!("{field} must not be empty"));
        } else if value.chars().count() > self.limits.max_name_len {
            self.fail(
                field,
                Rule::MaxLength,
                format!("{field} must be at most {} characters", self.limits.max_name_len),
            );
        }
        self
    }

    /// Task hours: positive and within the per-task ceiling
    pub fn task_hours(&mut self, field: &'static str, hours: u32) -> &mut Self {
        if !is_positive(hours) {
            self.fail(field, Rule::Positive, format!("{field} must be positive"));
        } else if hours > self.limits.max_task_hours {
            self.fail(
                field,
                Rule::AtMost,
                format!("{field} must be at most {}", self.limits.max_task_hours),
            );
        }
        self
    }

    /// Staff capacity: zero allowed, bounded above
    pub fn capacity(&mut self, field: &'static str, hours: u32) -> &mut Self {
        if hours > self.limits.max_capacity_hours {
            self.fail(
                field,
                Rule::AtMost,
                format!("{field} must be at most {}", self.limits.max_capacity_hours),
            );
        }
        self
    }

    /// `start` strictly before `end`
    pub fn date_order(
        &mut self,
        field: &'static str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> &mut Self {
        if !dates_ordered(start, end) {
            self.fail(
                field,
                Rule::DateOrder,
                format!("{field}: start {start} must be before end {end}"),
            );
        }
        self
    }

    /// Two identifiers must differ
    pub fn distinct(
        &mut self,
        field: &'static str,
        a: impl Into<Uuid>,
        b: impl Into<Uuid>,
    ) -> &mut Self {
        if a.into() == b.into() {
            self.fail(
                field,
                Rule::Distinct,
                format!("{field} must reference two different entities"),
            );
        }
        self
    }

    pub fn email(&mut self, field: &'static str, value: &str) -> &mut Self {
        if !looks_like_email(value) {
            self.fail(field, Rule::Format, format!("{field} must be an email address"));
        }
        self
    }

    /// At least one optional field must be present
    pub fn any_field(&mut self, field: &'static str, present: bool) -> &mut Self {
        if !present {
            self.fail(field, Rule::AnyField, format!("{field} must change at least one field"));
        }
        self
    }

    #[must_use]
    pub fn finish(self) -> ValidationErrors {
        self.errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(looks_like_email("ada@example.org"));
        assert!(!looks_like_email("ada.example.org"));
        assert!(!looks_like_email("@example.org"));
        assert!(!looks_like_email("ada@example"));
        assert!(!looks_like_email("a@b@c.org"));
    }

    #[test]
    fn checks_accumulate_every_failure() {
        let limits = ValidationConfig::default();
        let mut checks = Checks::new(&limits);
        checks
            .id("staff", Uuid::nil())
            .name("name", "   ")
            .task_hours("hours", 0);

        let errors = checks.finish();
        assert_eq!(errors.len(), 3);
        assert!(errors.has_field("staff"));
        assert!(errors.has_field("name"));
        assert!(errors.has_field("hours"));
    }

    #[test]
    fn long_names_fail_length_rule_only() {
        let limits = ValidationConfig {
            max_name_len: 4,
            ..ValidationConfig::default()
        };
        let mut checks = Checks::new(&limits);
        checks.name("name", "abcdef");

        let errors = checks.finish();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.iter().next().unwrap().rule, Rule::MaxLength);
    }
}
