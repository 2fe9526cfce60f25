//! Command shapes accepted by the planner
//!
//! Each struct is the data for one create/update request. [`Command`] tags
//! them so a single gate can validate any of them.

use crate::types::{
    Hours, PeriodId, PeriodStaffId, ProjectId, SprintId, StaffId, TaskId, TeamId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTeam {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStaff {
    pub name: String,
    pub team: TeamId,
    pub available_hours_per_period: Hours,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffCapacityUpdate {
    pub staff: StaffId,
    pub available_hours_per_period: Hours,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPeriod {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSprint {
    pub project: ProjectId,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPeriodStaff {
    pub staff: StaffId,
    pub period: PeriodId,
}

/// Reassign a `PeriodStaff` to a different staff member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodStaffUpdate {
    pub period_staff: PeriodStaffId,
    pub staff: StaffId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub period_staff: PeriodStaffId,
    pub project: ProjectId,
    pub sprint: Option<SprintId>,
    pub name: String,
    pub hours: Hours,
}

impl NewTask {
    /// Task with a placeholder name and no sprint
    #[must_use]
    pub fn new(period_staff: PeriodStaffId, project: ProjectId, hours: Hours) -> Self {
        Self {
            period_staff,
            project,
            sprint: None,
            name: "task".to_string(),
            hours,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn in_sprint(mut self, sprint: SprintId) -> Self {
        self.sprint = Some(sprint);
        self
    }
}

/// Partial task update; at least one field must be set
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task: TaskId,
    pub hours: Option<Hours>,
    pub project: Option<ProjectId>,
    pub name: Option<String>,
}

impl TaskUpdate {
    /// Update nothing yet
    #[must_use]
    pub fn new(task: TaskId) -> Self {
        Self {
            task,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn hours(mut self, hours: Hours) -> Self {
        self.hours = Some(hours);
        self
    }

    #[must_use]
    pub fn project(mut self, project: ProjectId) -> Self {
        self.project = Some(project);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDependency {
    pub predecessor: TaskId,
    pub successor: TaskId,
}

/// Every create/update command, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    CreateTeam(NewTeam),
    CreateStaff(NewStaff),
    UpdateStaffCapacity(StaffCapacityUpdate),
    CreatePeriod(NewPeriod),
    CreateProject(NewProject),
    CreateSprint(NewSprint),
    CreateUser(NewUser),
    CreatePeriodStaff(NewPeriodStaff),
    UpdatePeriodStaff(PeriodStaffUpdate),
    CreateTask(NewTask),
    UpdateTask(TaskUpdate),
    CreateDependency(NewDependency),
}

macro_rules! command_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Command {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

command_from!(
    CreateTeam(NewTeam),
    CreateStaff(NewStaff),
    UpdateStaffCapacity(StaffCapacityUpdate),
    CreatePeriod(NewPeriod),
    CreateProject(NewProject),
    CreateSprint(NewSprint),
    CreateUser(NewUser),
    CreatePeriodStaff(NewPeriodStaff),
    UpdatePeriodStaff(PeriodStaffUpdate),
    CreateTask(NewTask),
    UpdateTask(TaskUpdate),
    CreateDependency(NewDependency),
);
