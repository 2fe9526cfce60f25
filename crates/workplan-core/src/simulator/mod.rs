//! Planner simulator
//!
//! Drives a [`Planner`] with a seeded stream of random operations and checks
//! every global invariant after each one. A run with the same seed and config
//! picks the same operations.

pub mod stress;

pub use stress::{run_stress, StressConfig, StressReport};

use crate::config::PlanConfig;
use crate::error::{ErrorKind, PlanError, PlanResult};
use crate::facade::Planner;
use crate::types::{
    EdgeRef, Hours, PeriodId, PeriodStaffId, ProjectId, StaffId, Task, TaskDependency, TaskId,
};
use crate::validation::{
    NewDependency, NewPeriod, NewPeriodStaff, NewProject, NewStaff, NewTask, NewTeam, TaskUpdate,
};
use chrono::{Days, NaiveDate};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub operations: u64,
    pub staff: usize,
    pub periods: usize,
    /// Per-period capacity given to every staff member
    pub capacity: Hours,
    /// Largest hours a generated task asks for
    pub max_task_hours: Hours,
    /// Share of operations that are deliberately invalid
    pub invalid_ratio: f64,
    pub stop_on_first_violation: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            operations: 2_000,
            staff: 4,
            periods: 3,
            capacity: 40,
            max_task_hours: 16,
            invalid_ratio: 0.10,
            stop_on_first_violation: true,
        }
    }
}

/// Operations the simulator can generate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedOperation {
    CreateTask(PeriodStaffId, Hours),
    UpdateTask(TaskId, Hours),
    DeleteTask(TaskId),
    AddDependency(TaskId, TaskId),
    RemoveDependency(EdgeRef),
    CreatePeriodStaff(StaffId, PeriodId),
    DeletePeriodStaff(PeriodStaffId),

    // Always rejected
    ZeroHourTask(PeriodStaffId),
    SelfDependency(TaskId),
    DependencyOnMissingTask(TaskId, TaskId),
}

impl SimulatedOperation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateTask(..) => "create_task",
            Self::UpdateTask(..) => "update_task",
            Self::DeleteTask(_) => "delete_task",
            Self::AddDependency(..) => "add_dependency",
            Self::RemoveDependency(_) => "remove_dependency",
            Self::CreatePeriodStaff(..) => "create_period_staff",
            Self::DeletePeriodStaff(_) => "delete_period_staff",
            Self::ZeroHourTask(_) => "zero_hour_task",
            Self::SelfDependency(_) => "self_dependency",
            Self::DependencyOnMissingTask(..) => "dependency_on_missing_task",
        }
    }

    /// Error kinds this operation may legitimately end with
    fn allowed_failures(&self) -> &'static [ErrorKind] {
        match self {
            Self::CreateTask(..) | Self::UpdateTask(..) => &[ErrorKind::CapacityExceeded],
            Self::AddDependency(..) => &[ErrorKind::CycleDetected],
            Self::ZeroHourTask(_) | Self::SelfDependency(_) => &[ErrorKind::ValidationFailed],
            Self::DependencyOnMissingTask(..) => &[ErrorKind::NotFound],
            Self::DeleteTask(_)
            | Self::RemoveDependency(_)
            | Self::CreatePeriodStaff(..)
            | Self::DeletePeriodStaff(_) => &[],
        }
    }

    fn must_fail(&self) -> bool {
        matches!(
            self,
            Self::ZeroHourTask(_) | Self::SelfDependency(_) | Self::DependencyOnMissingTask(..)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum InvariantCheck {
    /// Setup of the simulated organisation succeeded
    Setup,
    OutcomeMatchesOperation,
    GraphIsAcyclic,
    CycleWitnessIsRealPath,
    AggregatesMatchTasks,
    CapacityRespected,
    EdgesReferenceExistingTasks,
    RejectionWritesNothing,
    JournalChainIntact,
}

#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub operation_index: u64,
    pub operation: String,
    pub check: InvariantCheck,
    pub details: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub rejected_operations: u64,
    pub operations_by_type: BTreeMap<String, u64>,
    pub rejections_by_kind: BTreeMap<String, u64>,
}

impl OperationStats {
    fn record(&mut self, operation: &SimulatedOperation, result: &PlanResult<()>) {
        self.total_operations += 1;
        *self
            .operations_by_type
            .entry(operation.name().to_string())
            .or_insert(0) += 1;
        match result {
            Ok(()) => self.successful_operations += 1,
            Err(err) => {
                self.rejected_operations += 1;
                *self
                    .rejections_by_kind
                    .entry(format!("{:?}", err.kind()))
                    .or_insert(0) += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub stats: OperationStats,
    pub violations: Vec<Violation>,
    pub final_tasks: usize,
    pub final_edges: usize,
    pub journal_entries: usize,
}

impl SimulatorReport {
    /// Whether no invariant was broken
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    #[must_use]
    pub fn generate_text(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "=== Workplan Simulator Report ===\n");
        let _ = writeln!(out, "Seed: {}", self.config.seed);
        let _ = writeln!(out, "Total Operations: {}", self.stats.total_operations);
        let _ = writeln!(out, "Successful: {}", self.stats.successful_operations);
        let _ = writeln!(out, "Rejected: {}", self.stats.rejected_operations);
        for (kind, count) in &self.stats.rejections_by_kind {
            let _ = writeln!(out, "  {kind}: {count}");
        }
        let _ = writeln!(out, "Violations: {}", self.violations.len());
        let _ = writeln!(out, "Final Tasks: {}", self.final_tasks);
        let _ = writeln!(out, "Final Edges: {}", self.final_edges);
        let _ = writeln!(out, "Journal Entries: {}", self.journal_entries);

        if !self.violations.is_empty() {
            let _ = writeln!(out, "\n=== Violations ===");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "{}. [{:?}] op #{} {}: {}",
                    i + 1,
                    v.check,
                    v.operation_index,
                    v.operation,
                    v.details
                );
            }
        }

        let _ = writeln!(
            out,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        out
    }
}

/// What the simulator believes exists, in creation order
#[derive(Debug, Default)]
struct World {
    project: ProjectId,
    period_staff: Vec<(PeriodStaffId, StaffId, PeriodId)>,
    vacant: Vec<(StaffId, PeriodId)>,
    tasks: Vec<(TaskId, PeriodStaffId)>,
    edges: Vec<TaskDependency>,
}

impl World {
    fn seed(planner: &Planner, config: &SimulatorConfig) -> PlanResult<Self> {
        let team = planner.create_team(NewTeam {
            name: "simulated".to_string(),
            description: String::new(),
        })?;
        let project = planner.create_project(NewProject {
            name: "simulated".to_string(),
            description: String::new(),
        })?;

        let mut staff = Vec::with_capacity(config.staff);
        for i in 0..config.staff {
            staff.push(
                planner
                    .create_staff(NewStaff {
                        name: format!("staff-{i}"),
                        team: team.id,
                        available_hours_per_period: config.capacity,
                    })?
                    .id,
            );
        }

        let origin = NaiveDate::from_ymd_opt(2026, 1, 1)
            .ok_or_else(|| PlanError::invariant("simulator origin date"))?;
        let mut periods = Vec::with_capacity(config.periods);
        for i in 0..config.periods {
            let offset = u64::try_from(i * 14).map_err(|_| PlanError::invariant("period offset"))?;
            let start = origin
                .checked_add_days(Days::new(offset))
                .ok_or_else(|| PlanError::invariant("period start out of range"))?;
            let end = start
                .checked_add_days(Days::new(14))
                .ok_or_else(|| PlanError::invariant("period end out of range"))?;
            periods.push(
                planner
                    .create_period(NewPeriod {
                        name: format!("period-{i}"),
                        start,
                        end,
                    })?
                    .id,
            );
        }

        let mut world = Self {
            project: project.id,
            ..Self::default()
        };
        for &s in &staff {
            for &p in &periods {
                let ps = planner.create_period_staff(NewPeriodStaff { staff: s, period: p })?;
                world.period_staff.push((ps.id, s, p));
            }
        }
        Ok(world)
    }

    fn forget_task(&mut self, task: TaskId) {
        self.tasks.retain(|&(t, _)| t != task);
        self.edges.retain(|e| !e.touches(task));
    }

    fn is_path(&self, path: &[TaskId]) -> bool {
        path.windows(2)
            .all(|w| self.edges.iter().any(|e| e.predecessor == w[0] && e.successor == w[1]))
    }
}

fn pick<T: Copy>(rng: &mut StdRng, items: &[T]) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        Some(items[rng.gen_range(0..items.len())])
    }
}

fn generate(rng: &mut StdRng, config: &SimulatorConfig, world: &World) -> SimulatedOperation {
    let hours = rng.gen_range(1..=config.max_task_hours.max(1));
    let ps = pick(rng, &world.period_staff).map(|(id, _, _)| id);
    let task = pick(rng, &world.tasks).map(|(id, _)| id);

    if rng.gen_bool(config.invalid_ratio.clamp(0.0, 1.0)) {
        match (rng.gen_range(0..3), ps, task) {
            (0, Some(ps), _) => return SimulatedOperation::ZeroHourTask(ps),
            (1, _, Some(t)) => return SimulatedOperation::SelfDependency(t),
            (_, _, Some(t)) => return SimulatedOperation::DependencyOnMissingTask(t, TaskId::new()),
            _ => {}
        }
    }

    let roll = rng.gen_range(0..100);
    let op = match roll {
        0..=34 => ps.map(|ps| SimulatedOperation::CreateTask(ps, hours)),
        35..=49 => task.map(|t| SimulatedOperation::UpdateTask(t, hours)),
        50..=57 => task.map(SimulatedOperation::DeleteTask),
        58..=82 => {
            let other = pick(rng, &world.tasks).map(|(id, _)| id);
            match (task, other) {
                (Some(a), Some(b)) if a != b => Some(SimulatedOperation::AddDependency(a, b)),
                _ => None,
            }
        }
        83..=91 => pick(rng, &world.edges).map(|edge| {
            if rng.gen_bool(0.5) {
                SimulatedOperation::RemoveDependency(EdgeRef::Id(edge.id))
            } else {
                SimulatedOperation::RemoveDependency(EdgeRef::Pair {
                    predecessor: edge.predecessor,
                    successor: edge.successor,
                })
            }
        }),
        92..=95 => {
            pick(rng, &world.vacant).map(|(s, p)| SimulatedOperation::CreatePeriodStaff(s, p))
        }
        _ => ps.map(SimulatedOperation::DeletePeriodStaff),
    };

    op.or_else(|| ps.map(|ps| SimulatedOperation::CreateTask(ps, hours)))
        .or_else(|| {
            pick(rng, &world.vacant).map(|(s, p)| SimulatedOperation::CreatePeriodStaff(s, p))
        })
        .unwrap_or(SimulatedOperation::DependencyOnMissingTask(TaskId::new(), TaskId::new()))
}

/// Apply `op` and update the world on success
fn execute(
    planner: &Planner,
    world: &mut World,
    op: &SimulatedOperation,
    witness: &mut Option<Vec<TaskId>>,
) -> PlanResult<()> {
    match *op {
        SimulatedOperation::CreateTask(ps, hours) => {
            let task = planner.create_task(NewTask::new(ps, world.project, hours))?;
            world.tasks.push((task.id, ps));
        }
        SimulatedOperation::ZeroHourTask(ps) => {
            planner.create_task(NewTask::new(ps, world.project, 0))?;
        }
        SimulatedOperation::UpdateTask(task, hours) => {
            planner.update_task(TaskUpdate::new(task).hours(hours))?;
        }
        SimulatedOperation::DeleteTask(task) => {
            planner.delete_task(task)?;
            world.forget_task(task);
        }
        SimulatedOperation::AddDependency(predecessor, successor)
        | SimulatedOperation::DependencyOnMissingTask(predecessor, successor) => {
            let result = planner.add_dependency(NewDependency {
                predecessor,
                successor,
            });
            if let Err(PlanError::CycleDetected { path, .. }) = &result {
                *witness = Some(path.clone());
            }
            let edge = result?;
            if !world.edges.contains(&edge) {
                world.edges.push(edge);
            }
        }
        SimulatedOperation::SelfDependency(task) => {
            planner.add_dependency(NewDependency {
                predecessor: task,
                successor: task,
            })?;
        }
        SimulatedOperation::RemoveDependency(edge) => {
            let removed = planner.remove_dependency(edge)?;
            world.edges.retain(|e| e.id != removed.id);
        }
        SimulatedOperation::CreatePeriodStaff(staff, period) => {
            let ps = planner.create_period_staff(NewPeriodStaff { staff, period })?;
            world.vacant.retain(|&pair| pair != (staff, period));
            world.period_staff.push((ps.id, staff, period));
        }
        SimulatedOperation::DeletePeriodStaff(ps) => {
            planner.delete_period_staff(ps)?;
            let owned: Vec<TaskId> = world
                .tasks
                .iter()
                .filter(|&&(_, owner)| owner == ps)
                .map(|&(t, _)| t)
                .collect();
            for t in owned {
                world.forget_task(t);
            }
            if let Some(pos) = world.period_staff.iter().position(|&(id, _, _)| id == ps) {
                let (_, staff, period) = world.period_staff.remove(pos);
                world.vacant.push((staff, period));
            }
        }
    }
    Ok(())
}

/// Run the simulator
#[must_use]
pub fn run(config: SimulatorConfig) -> SimulatorReport {
    let planner = Planner::new(PlanConfig::default());
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = OperationStats::default();
    let mut violations = Vec::new();

    let mut world = match World::seed(&planner, &config) {
        Ok(world) => world,
        Err(err) => {
            violations.push(Violation {
                operation_index: 0,
                operation: "setup".to_string(),
                check: InvariantCheck::Setup,
                details: err.to_string(),
            });
            return finish(config, stats, violations, &planner);
        }
    };

    for index in 0..config.operations {
        let op = generate(&mut rng, &config, &world);
        let commits_before = planner.store().commit_count();
        let mut witness = None;
        let result = execute(&planner, &mut world, &op, &mut witness);
        stats.record(&op, &result);

        let mut found = Vec::new();
        let mut flag = |check: InvariantCheck, details: String| {
            found.push(Violation {
                operation_index: index,
                operation: format!("{op:?}"),
                check,
                details,
            });
        };

        match &result {
            Ok(()) if op.must_fail() => {
                flag(
                    InvariantCheck::OutcomeMatchesOperation,
                    "invalid operation was accepted".to_string(),
                );
            }
            Err(err) if !op.allowed_failures().contains(&err.kind()) => {
                flag(InvariantCheck::OutcomeMatchesOperation, format!("unexpected error: {err}"));
            }
            _ => {}
        }

        if result.is_err() && planner.store().commit_count() != commits_before {
            flag(
                InvariantCheck::RejectionWritesNothing,
                "rejected operation committed".to_string(),
            );
        }

        if let (Some(path), SimulatedOperation::AddDependency(pred, succ)) = (&witness, &op) {
            let ends = path.first() == Some(succ) && path.last() == Some(pred);
            if !ends || !world.is_path(path) {
                flag(
                    InvariantCheck::CycleWitnessIsRealPath,
                    format!("reported path of {} tasks is not a stored path", path.len()),
                );
            }
        }

        match planner.check_integrity() {
            Ok(report) => {
                if let Some(cycle) = report.cycle {
                    flag(
                        InvariantCheck::GraphIsAcyclic,
                        format!("cycle through {} tasks", cycle.len()),
                    );
                }
                for d in report.drift {
                    flag(
                        InvariantCheck::AggregatesMatchTasks,
                        format!("{} stores {:?}, live {:?}", d.period_staff, d.stored, d.live),
                    );
                }
                for ps in report.over_capacity {
                    flag(InvariantCheck::CapacityRespected, format!("{ps} over capacity"));
                }
                for edge in report.orphan_edges {
                    flag(
                        InvariantCheck::EdgesReferenceExistingTasks,
                        format!("{edge} is orphaned"),
                    );
                }
                if !report.journal_intact {
                    flag(InvariantCheck::JournalChainIntact, "hash chain broken".to_string());
                }
            }
            Err(err) => flag(InvariantCheck::AggregatesMatchTasks, err.to_string()),
        }

        if !found.is_empty() {
            tracing::warn!(
                index,
                operation = op.name(),
                violations = found.len(),
                "invariant violated"
            );
            violations.extend(found);
            if config.stop_on_first_violation {
                break;
            }
        }
    }

    finish(config, stats, violations, &planner)
}

fn finish(
    config: SimulatorConfig,
    stats: OperationStats,
    violations: Vec<Violation>,
    planner: &Planner,
) -> SimulatorReport {
    SimulatorReport {
        final_tasks: planner.list::<Task>().len(),
        final_edges: planner.list::<TaskDependency>().len(),
        journal_entries: planner.journal().len(),
        config,
        stats,
        violations,
    }
}
