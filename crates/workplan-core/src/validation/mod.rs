//! Command Validator
//!
//! First of two validation phases. Every create/update command passes
//! through [`CommandValidator::validate`], which evaluates all field rules for
//! the command and returns either the command unchanged or the full list of
//! violations.
//!
//! Cross-entity rules (acyclicity, capacity, referential existence) are not
//! checked here; the dependency manager and capacity allocator run them as
//! the second phase inside the transaction.

mod commands;
pub mod rules;

pub use commands::{
    Command, NewDependency, NewPeriod, NewPeriodStaff, NewProject, NewSprint, NewStaff, NewTask,
    NewTeam, NewUser, PeriodStaffUpdate, StaffCapacityUpdate, TaskUpdate,
};
pub use rules::Checks;

use crate::config::ValidationConfig;
use crate::error::ValidationErrors;

/// Field rules for one command shape
pub trait Validate {
    /// Apply every rule for this shape
    fn check(&self, checks: &mut Checks<'_>);
}

impl Validate for NewTeam {
    fn check(&self, checks: &mut Checks<'_>) {
        checks.name("name", &self.name);
    }
}

impl Validate for NewStaff {
    fn check(&self, checks: &mut Checks<'_>) {
        checks
            .name("name", &self.name)
            .id("team", self.team)
            .capacity("available_hours_per_period", self.available_hours_per_period);
    }
}

impl Validate for StaffCapacityUpdate {
    fn check(&self, checks: &mut Checks<'_>) {
        checks
            .id("staff", self.staff)
            .capacity("available_hours_per_period", self.available_hours_per_period);
    }
}

impl Validate for NewPeriod {
    fn check(&self, checks: &mut Checks<'_>) {
        checks
            .name("name", &self.name)
            .date_order("dates", self.start, self.end);
    }
}

impl Validate for NewProject {
    fn check(&self, checks: &mut Checks<'_>) {
        checks.name("name", &self.name);
    }
}

impl Validate for NewSprint {
    fn check(&self, checks: &mut Checks<'_>) {
        checks
            .id("project", self.project)
            .name("name", &self.name)
            .date_order("dates", self.start, self.end);
    }
}

impl Validate for NewUser {
    fn check(&self, checks: &mut Checks<'_>) {
        checks.name("name", &self.name).email("email", &self.email);
    }
}

impl Validate for NewPeriodStaff {
    fn check(&self, checks: &mut Checks<'_>) {
        checks.id("staff", self.staff).id("period", self.period);
    }
}

impl Validate for PeriodStaffUpdate {
    fn check(&self, checks: &mut Checks<'_>) {
        checks
            .id("period_staff", self.period_staff)
            .id("staff", self.staff);
    }
}

impl Validate for NewTask {
    fn check(&self, checks: &mut Checks<'_>) {
        checks
            .id("period_staff", self.period_staff)
            .id("project", self.project)
            .opt_id("sprint", self.sprint)
            .name("name", &self.name)
            .task_hours("hours", self.hours);
    }
}

impl Validate for TaskUpdate {
    fn check(&self, checks: &mut Checks<'_>) {
        checks.id("task", self.task).any_field(
            "update",
            self.hours.is_some() || self.project.is_some() || self.name.is_some(),
        );
        if let Some(hours) = self.hours {
            checks.task_hours("hours", hours);
        }
        checks.opt_id("project", self.project);
        if let Some(name) = &self.name {
            checks.name("name", name);
        }
    }
}

impl Validate for NewDependency {
    fn check(&self, checks: &mut Checks<'_>) {
        checks
            .id("predecessor", self.predecessor)
            .id("successor", self.successor)
            .distinct("dependency", self.predecessor, self.successor);
    }
}

impl Validate for Command {
    fn check(&self, checks: &mut Checks<'_>) {
        match self {
            Self::CreateTeam(c) => c.check(checks),
            Self::CreateStaff(c) => c.check(checks),
            Self::UpdateStaffCapacity(c) => c.check(checks),
            Self::CreatePeriod(c) => c.check(checks),
            Self::CreateProject(c) => c.check(checks),
            Self::CreateSprint(c) => c.check(checks),
            Self::CreateUser(c) => c.check(checks),
            Self::CreatePeriodStaff(c) => c.check(checks),
            Self::UpdatePeriodStaff(c) => c.check(checks),
            Self::CreateTask(c) => c.check(checks),
            Self::UpdateTask(c) => c.check(checks),
            Self::CreateDependency(c) => c.check(checks),
        }
    }
}

/// The uniform pre-commit gate
#[derive(Debug, Clone, Default)]
pub struct CommandValidator {
    limits: ValidationConfig,
}

impl CommandValidator {
    #[must_use]
    pub fn new(limits: ValidationConfig) -> Self {
        Self { limits }
    }

    /// Evaluate every rule for `command`.
    ///
    /// # Errors
    ///
    /// All violations found, never just the first.
    pub fn validate<C: Validate>(&self, command: C) -> Result<C, ValidationErrors> {
        let mut checks = Checks::new(&self.limits);
        command.check(&mut checks);
        checks.finish().into_result()?;
        Ok(command)
    }

    /// Whether `command` has zero violations
    #[must_use]
    pub fn is_valid<C: Validate>(&self, command: &C) -> bool {
        let mut checks = Checks::new(&self.limits);
        command.check(&mut checks);
        checks.finish().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rule;
    use crate::types::{PeriodStaffId, ProjectId, StaffId, TaskId, TeamId};
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn valid_task_passes_unchanged() {
        let validator = CommandValidator::default();
        let cmd = NewTask::new(PeriodStaffId::new(), ProjectId::new(), 8).named("write docs");
        let out = validator.validate(cmd.clone()).unwrap();
        assert_eq!(out, cmd);
    }

    #[test]
    fn task_reports_all_violations_at_once() {
        let validator = CommandValidator::default();
        let cmd = NewTask {
            period_staff: PeriodStaffId::nil(),
            project: ProjectId::nil(),
            sprint: None,
            name: String::new(),
            hours: 0,
        };

        let errors = validator.validate(cmd).unwrap_err();
        assert_eq!(errors.len(), 4);
        for field in ["period_staff", "project", "name", "hours"] {
            assert!(errors.has_field(field), "missing {field}");
        }
    }

    #[test]
    fn task_hours_above_ceiling_rejected() {
        let validator = CommandValidator::new(ValidationConfig {
            max_task_hours: 40,
            ..ValidationConfig::default()
        });
        let errors = validator
            .validate(NewTask::new(PeriodStaffId::new(), ProjectId::new(), 41))
            .unwrap_err();
        assert_eq!(errors.iter().next().unwrap().rule, Rule::AtMost);
    }

    #[test]
    fn period_dates_must_be_ordered() {
        let validator = CommandValidator::default();
        let cmd = NewPeriod {
            name: "Q1".to_string(),
            start: date(2026, 4, 1),
            end: date(2026, 4, 1),
        };
        let errors = validator.validate(cmd).unwrap_err();
        assert_eq!(errors.iter().next().unwrap().rule, Rule::DateOrder);
    }

    #[test]
    fn self_dependency_rejected() {
        let validator = CommandValidator::default();
        let t = TaskId::new();
        let errors = validator
            .validate(NewDependency {
                predecessor: t,
                successor: t,
            })
            .unwrap_err();
        assert!(errors.has_field("dependency"));
    }

    #[test]
    fn empty_task_update_rejected() {
        let validator = CommandValidator::default();
        let errors = validator.validate(TaskUpdate::new(TaskId::new())).unwrap_err();
        assert_eq!(errors.iter().next().unwrap().rule, Rule::AnyField);
        assert!(validator.is_valid(&TaskUpdate::new(TaskId::new()).hours(4)));
    }

    #[test]
    fn tagged_command_dispatches_to_shape_rules() {
        let validator = CommandValidator::default();
        let bad = Command::from(NewStaff {
            name: "Grace".to_string(),
            team: TeamId::nil(),
            available_hours_per_period: 40,
        });
        assert!(validator.validate(bad).unwrap_err().has_field("team"));

        let good = Command::from(NewPeriodStaff {
            staff: StaffId::new(),
            period: crate::types::PeriodId::new(),
        });
        assert!(validator.is_valid(&good));
    }
}
