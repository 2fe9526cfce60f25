//! Contention stress run
//!
//! Many threads create tasks against one `PeriodStaff` at the same moment.
//! Every accepted task must show up in the aggregate and the aggregate must
//! never pass capacity.

use crate::config::PlanConfig;
use crate::error::{ErrorKind, PlanResult};
use crate::facade::Planner;
use crate::types::{Hours, PeriodStaff, PeriodStaffId, ProjectId, Task};
use crate::validation::{NewPeriod, NewPeriodStaff, NewProject, NewStaff, NewTask, NewTeam};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;

#[derive(Debug, Clone, Serialize)]
pub struct StressConfig {
    pub threads: usize,
    /// Task creations attempted by each thread
    pub attempts: usize,
    pub hours: Hours,
    pub capacity: Hours,
    /// Retry conflicts with fresh state instead of giving up
    pub retry_conflicts: bool,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            attempts: 20,
            hours: 5,
            capacity: 400,
            retry_conflicts: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StressReport {
    pub threads: usize,
    pub attempts: u64,
    pub accepted: u64,
    pub conflicts: u64,
    pub capacity_rejections: u64,
    pub other_errors: u64,
    pub final_hours: Hours,
    pub final_tasks: u32,
    /// Problems found after the run
    pub violations: Vec<String>,
}

impl StressReport {
    #[must_use]
    pub fn success(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Default)]
struct Tally {
    accepted: AtomicU64,
    conflicts: AtomicU64,
    capacity: AtomicU64,
    other: AtomicU64,
}

fn seed(planner: &Planner, capacity: Hours) -> PlanResult<(PeriodStaffId, ProjectId)> {
    let team = planner.create_team(NewTeam {
        name: "stress".to_string(),
        description: String::new(),
    })?;
    let staff = planner.create_staff(NewStaff {
        name: "stress".to_string(),
        team: team.id,
        available_hours_per_period: capacity,
    })?;
    let (start, end) = NaiveDate::from_ymd_opt(2026, 1, 1)
        .zip(NaiveDate::from_ymd_opt(2026, 2, 1))
        .ok_or_else(|| crate::error::PlanError::invariant("stress period dates"))?;
    let period = planner.create_period(NewPeriod {
        name: "stress".to_string(),
        start,
        end,
    })?;
    let ps = planner.create_period_staff(NewPeriodStaff {
        staff: staff.id,
        period: period.id,
    })?;
    let project = planner.create_project(NewProject {
        name: "stress".to_string(),
        description: String::new(),
    })?;
    Ok((ps.id, project.id))
}

/// Hammer one `PeriodStaff` from `config.threads` threads.
///
/// At least one thread runs. A run whose total attempt count does not fit in
/// a `u64` is refused with a violation before anything is spawned.
#[must_use]
pub fn run_stress(config: StressConfig) -> StressReport {
    let threads = config.threads.max(1);
    let mut report = StressReport {
        threads,
        ..StressReport::default()
    };
    match threads
        .checked_mul(config.attempts)
        .and_then(|total| u64::try_from(total).ok())
    {
        Some(total) => report.attempts = total,
        None => {
            report.violations.push(format!(
                "{threads} threads x {} attempts overflows the attempt counter",
                config.attempts
            ));
            return report;
        }
    }

    let max_capacity = config.capacity.max(1);
    let planner = Planner::new(PlanConfig::default().with_max_capacity_hours(max_capacity));

    let (ps, project) = match seed(&planner, config.capacity) {
        Ok(ids) => ids,
        Err(err) => {
            report.violations.push(format!("setup failed: {err}"));
            return report;
        }
    };

    let tally = Tally::default();
    let barrier = Barrier::new(threads);

    std::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..config.attempts {
                    let create =
                        |p: &Planner| p.create_task(NewTask::new(ps, project, config.hours));
                    let result = if config.retry_conflicts {
                        planner.retrying(create)
                    } else {
                        create(&planner)
                    };
                    let counter = match result.map_err(|e| e.kind()) {
                        Ok(_) => &tally.accepted,
                        Err(ErrorKind::Conflict) => &tally.conflicts,
                        Err(ErrorKind::CapacityExceeded) => &tally.capacity,
                        Err(_) => &tally.other,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    report.accepted = tally.accepted.load(Ordering::Relaxed);
    report.conflicts = tally.conflicts.load(Ordering::Relaxed);
    report.capacity_rejections = tally.capacity.load(Ordering::Relaxed);
    report.other_errors = tally.other.load(Ordering::Relaxed);

    match planner.get::<PeriodStaff>(ps) {
        Ok(row) => {
            report.final_hours = row.total_hours;
            report.final_tasks = row.task_number;
        }
        Err(err) => report.violations.push(format!("period staff vanished: {err}")),
    }

    let stored_tasks = planner.list::<Task>().len() as u64;
    if stored_tasks != report.accepted || u64::from(report.final_tasks) != report.accepted {
        report.violations.push(format!(
            "lost update: {} accepted, {} stored, aggregate counts {}",
            report.accepted, stored_tasks, report.final_tasks
        ));
    }
    let expected_hours = report.accepted.checked_mul(u64::from(config.hours));
    if expected_hours != Some(u64::from(report.final_hours)) {
        report.violations.push(format!(
            "aggregate holds {}h for {} accepted tasks of {}h",
            report.final_hours, report.accepted, config.hours
        ));
    }
    if report.final_hours > config.capacity {
        report.violations.push(format!(
            "{}h committed over {}h capacity",
            report.final_hours, config.capacity
        ));
    }
    if report.other_errors > 0 {
        report
            .violations
            .push(format!("{} unexpected errors", report.other_errors));
    }
    match planner.check_integrity() {
        Ok(integrity) if integrity.is_clean() => {}
        Ok(integrity) => report.violations.extend(integrity.findings()),
        Err(err) => report.violations.push(err.to_string()),
    }

    tracing::info!(
        accepted = report.accepted,
        conflicts = report.conflicts,
        capacity_rejections = report.capacity_rejections,
        final_hours = report.final_hours,
        "stress run finished"
    );
    report
}
