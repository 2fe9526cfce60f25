//! Testing utilities for the workplan workspace
//!
//! Shared fixtures for integration tests: a planner with one team, one
//! project and a period, plus builders for staff assigned to that period.

#![allow(missing_docs)]

use chrono::NaiveDate;
use workplan_core::{
    Hours, NewPeriod, NewPeriodStaff, NewProject, NewStaff, NewTask, NewTeam, Period, PeriodStaff,
    PlanConfig, PlanResult, Planner, Project, Staff, Task, Team,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Planner with a team, a project and one period already created
pub struct World {
    pub planner: Planner,
    pub team: Team,
    pub project: Project,
    pub period: Period,
}

impl World {
    pub fn new() -> Self {
        Self::with_config(PlanConfig::default())
    }

    pub fn with_config(config: PlanConfig) -> Self {
        let planner = Planner::new(config);
        let team = planner
            .create_team(NewTeam {
                name: "Platform".to_string(),
                description: "test team".to_string(),
            })
            .unwrap();
        let project = planner
            .create_project(NewProject {
                name: "Billing".to_string(),
                description: "test project".to_string(),
            })
            .unwrap();
        let period = planner
            .create_period(NewPeriod {
                name: "April".to_string(),
                start: date(2026, 4, 1),
                end: date(2026, 5, 1),
            })
            .unwrap();
        Self {
            planner,
            team,
            project,
            period,
        }
    }

    pub fn staff(&self, name: &str, capacity: Hours) -> Staff {
        self.planner
            .create_staff(NewStaff {
                name: name.to_string(),
                team: self.team.id,
                available_hours_per_period: capacity,
            })
            .unwrap()
    }

    /// Staff member with `capacity` hours, assigned to the world's period
    pub fn assigned(&self, name: &str, capacity: Hours) -> (Staff, PeriodStaff) {
        let staff = self.staff(name, capacity);
        let ps = self
            .planner
            .create_period_staff(NewPeriodStaff {
                staff: staff.id,
                period: self.period.id,
            })
            .unwrap();
        (staff, ps)
    }

    pub fn try_task(&self, ps: &PeriodStaff, hours: Hours) -> PlanResult<Task> {
        self.planner
            .create_task(NewTask::new(ps.id, self.project.id, hours))
    }

    pub fn task(&self, ps: &PeriodStaff, hours: Hours) -> Task {
        self.try_task(ps, hours).unwrap()
    }

    /// Current stored state of a `PeriodStaff`
    pub fn reload(&self, ps: &PeriodStaff) -> PeriodStaff {
        self.planner.get::<PeriodStaff>(ps.id).unwrap()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
