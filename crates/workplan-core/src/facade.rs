//! Allocation/Dependency Facade
//!
//! [`Planner`] is the single entry point for callers. Every operation:
//! 1. Runs the command through the [`CommandValidator`]
//! 2. Opens one transaction and applies the domain rules (graph, capacity,
//!    references) inside it
//! 3. Commits all-or-nothing, then appends to the audit journal
//!
//! A rejected operation writes nothing and appends nothing. Journal entries
//! are appended under the commit lock, so their sequence follows commit
//! order.

use crate::capacity::{Aggregate, CapacityAllocator, TaskDraft};
use crate::config::PlanConfig;
use crate::error::{PlanError, PlanResult, Rule, ValidationErrors, Violation};
use crate::graph::{Adjacent, DependencyManager};
use crate::journal::{Journal, Operation};
use crate::store::{with_transaction, Entity, EntityStore, MemoryStore, Transaction};
use crate::types::{
    DependencyId, EdgeRef, Hours, Period, PeriodId, PeriodStaff, PeriodStaffId, Project,
    ProjectId, Sprint, SprintId, Staff, StaffId, Task, TaskDependency, TaskId, Team, TeamId, User,
    UserId,
};
use crate::validation::{
    CommandValidator, NewDependency, NewPeriod, NewPeriodStaff, NewProject, NewSprint, NewStaff,
    NewTask, NewTeam, NewUser, PeriodStaffUpdate, StaffCapacityUpdate, TaskUpdate, Validate,
};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::iter;
use uuid::Uuid;

/// What a cascading delete removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    pub period_staff_removed: usize,
    pub tasks_removed: usize,
    pub edges_removed: usize,
}

impl CascadeReport {
    fn absorb(&mut self, other: Self) {
        self.period_staff_removed += other.period_staff_removed;
        self.tasks_removed += other.tasks_removed;
        self.edges_removed += other.edges_removed;
    }
}

/// A `PeriodStaff` whose stored aggregate disagrees with its tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateDrift {
    pub period_staff: PeriodStaffId,
    pub stored: Aggregate,
    pub live: Aggregate,
}

/// Result of [`Planner::check_integrity`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Tasks along one dependency cycle, first task repeated at the end
    pub cycle: Option<Vec<TaskId>>,
    pub drift: Vec<AggregateDrift>,
    pub over_capacity: Vec<PeriodStaffId>,
    /// Edges naming a task that no longer exists
    pub orphan_edges: Vec<DependencyId>,
    pub journal_intact: bool,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.cycle.is_none()
            && self.drift.is_empty()
            && self.over_capacity.is_empty()
            && self.orphan_edges.is_empty()
            && self.journal_intact
    }

    /// One line per finding
    #[must_use]
    pub fn findings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(cycle) = &self.cycle {
            out.push(format!(
                "dependency cycle through {} tasks",
                cycle.len().saturating_sub(1)
            ));
        }
        for d in &self.drift {
            out.push(format!(
                "period staff {} stores {}h/{} tasks but holds {}h/{} tasks",
                d.period_staff,
                d.stored.total_hours,
                d.stored.task_number,
                d.live.total_hours,
                d.live.task_number
            ));
        }
        for ps in &self.over_capacity {
            out.push(format!("period staff {ps} exceeds capacity"));
        }
        for edge in &self.orphan_edges {
            out.push(format!("edge {edge} references a missing task"));
        }
        if !self.journal_intact {
            out.push("journal hash chain broken".to_string());
        }
        out
    }
}

fn reference_error(field: &'static str, message: impl Into<String>) -> PlanError {
    ValidationErrors::single(Violation::new(field, Rule::Reference, message)).into()
}

fn unique_error(field: &'static str, message: impl Into<String>) -> PlanError {
    ValidationErrors::single(Violation::new(field, Rule::Unique, message)).into()
}

/// Re-run `op` while it fails with [`PlanError::Conflict`].
///
/// Each attempt must read fresh state; `op` is called at most `max_attempts`
/// times (at least once).
///
/// # Errors
///
/// The last error from `op`, or the first error that is not retryable.
pub fn retry_on_conflict<T, F>(max_attempts: u32, mut op: F) -> PlanResult<T>
where
    F: FnMut() -> PlanResult<T>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::debug!(
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "retrying after conflict"
                );
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Outcome of [`Planner::execute`], holding the commit lock until it is
/// journaled
struct Committed<'p, T> {
    value: T,
    op: Operation,
    journal: &'p Journal,
    /// `None` when the transaction wrote nothing
    serial: Option<MutexGuard<'p, ()>>,
}

impl<T> Committed<'_, T> {
    /// Journal one entry, unless nothing was written
    fn record<U, D>(self, describe: D) -> T
    where
        U: Into<Uuid>,
        D: FnOnce(&T) -> (U, String),
    {
        self.record_each(|value| iter::once(describe(value)))
    }

    /// Journal one entry per item `describe` yields, unless nothing was written
    fn record_each<U, D, I>(self, describe: D) -> T
    where
        U: Into<Uuid>,
        D: FnOnce(&T) -> I,
        I: IntoIterator<Item = (U, String)>,
    {
        if let Some(_serial) = self.serial {
            for (subject, detail) in describe(&self.value) {
                let subject = subject.into();
                tracing::info!(operation = %self.op, %subject, "operation committed");
                self.journal.append(self.op, subject, detail);
            }
        }
        self.value
    }
}

/// The planning core's public entry point
#[derive(Debug)]
pub struct Planner<S: EntityStore = MemoryStore> {
    store: S,
    config: PlanConfig,
    validator: CommandValidator,
    graph: DependencyManager,
    allocator: CapacityAllocator,
    journal: Journal,
    commit_lock: Mutex<()>,
}

impl Default for Planner<MemoryStore> {
    fn default() -> Self {
        Self::new(PlanConfig::default())
    }
}

impl Planner<MemoryStore> {
    /// Planner over a fresh in-memory store
    #[must_use]
    pub fn new(config: PlanConfig) -> Self {
        Self::with_store(MemoryStore::new(), config)
    }
}

impl<S: EntityStore> Planner<S> {
    /// Planner over an existing store
    #[must_use]
    pub fn with_store(store: S, config: PlanConfig) -> Self {
        Self {
            validator: CommandValidator::new(config.validation.clone()),
            graph: DependencyManager::new(config.graph.clone()),
            allocator: CapacityAllocator::new(),
            journal: Journal::new(config.journal.enabled),
            commit_lock: Mutex::new(()),
            store,
            config,
        }
    }

    #[inline]
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    fn validated<C: Validate>(&self, op: Operation, command: C) -> PlanResult<C> {
        self.validator.validate(command).map_err(|errors| {
            tracing::debug!(
                operation = %op,
                violations = errors.len(),
                %errors,
                "command rejected"
            );
            PlanError::from(errors)
        })
    }

    /// Run `f` in a transaction and commit it. The returned value keeps the
    /// commit lock so the journal entry lands in commit order.
    fn execute<T, F>(&self, op: Operation, f: F) -> PlanResult<Committed<'_, T>>
    where
        F: FnOnce(&mut Transaction<'_, S>) -> PlanResult<T>,
    {
        let rejected = |err: PlanError| {
            if !err.is_internal() {
                tracing::debug!(
                    operation = %op,
                    kind = ?err.kind(),
                    error = %err,
                    "operation rejected"
                );
            }
            err
        };

        let mut tx = Transaction::new(&self.store);
        let value = f(&mut tx).map_err(rejected)?;
        let batch = tx.into_batch();
        let serial = if batch.is_read_only() {
            None
        } else {
            let serial = self.commit_lock.lock();
            self.store.commit(batch).map_err(rejected)?;
            Some(serial)
        };
        Ok(Committed {
            value,
            op,
            journal: &self.journal,
            serial,
        })
    }

    /// Run `op` against this planner, retrying conflicts up to
    /// `concurrency.max_conflict_retries` times
    ///
    /// # Errors
    ///
    /// See [`retry_on_conflict`].
    pub fn retrying<T, F>(&self, mut op: F) -> PlanResult<T>
    where
        F: FnMut(&Self) -> PlanResult<T>,
    {
        retry_on_conflict(self.config.concurrency.max_conflict_retries, || op(self))
    }

    // ---- reads ---------------------------------------------------------

    /// Fetch any entity by id.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn get<E: Entity>(&self, id: E::Id) -> PlanResult<E> {
        with_transaction(&self.store, |tx| tx.get::<E>(id))
    }

    /// Every stored entity of one kind
    #[must_use]
    pub fn list<E: Entity>(&self) -> Vec<E> {
        let mut tx = Transaction::new(&self.store);
        tx.scan::<E>()
    }

    // ---- administration ------------------------------------------------

    /// # Errors
    ///
    /// [`PlanError::ValidationFailed`] on a blank or overlong name.
    pub fn create_team(&self, command: NewTeam) -> PlanResult<Team> {
        let op = Operation::CreateTeam;
        let command = self.validated(op, command)?;
        let team = Team {
            id: TeamId::new(),
            name: command.name,
            description: command.description,
        };
        let team = self
            .execute(op, |tx| {
                tx.put(team.clone());
                Ok(team)
            })?
            .record(|team| (team.id, team.name.clone()));
        Ok(team)
    }

    /// Delete a team that no staff member belongs to.
    ///
    /// # Errors
    ///
    /// - [`PlanError::NotFound`] if absent
    /// - [`PlanError::ValidationFailed`] while any staff member still belongs
    ///   to the team
    pub fn delete_team(&self, team: TeamId) -> PlanResult<Team> {
        let op = Operation::DeleteTeam;
        let removed = self
            .execute(op, |tx| {
                tx.get::<Team>(team)?;
                let members = tx.scan_where::<Staff, _>(|s| s.team == team).len();
                if members > 0 {
                    return Err(reference_error(
                        "team",
                        format!("team {team} still has {members} staff members"),
                    ));
                }
                tx.delete::<Team>(team)
            })?
            .record(|removed| (removed.id, removed.name.clone()));
        Ok(removed)
    }

    /// # Errors
    ///
    /// [`PlanError::ValidationFailed`] on bad fields, [`PlanError::NotFound`]
    /// if the team is absent.
    pub fn create_staff(&self, command: NewStaff) -> PlanResult<Staff> {
        let op = Operation::CreateStaff;
        let command = self.validated(op, command)?;
        let staff = self
            .execute(op, |tx| {
                tx.get::<Team>(command.team)?;
                let staff = Staff {
                    id: StaffId::new(),
                    name: command.name,
                    team: command.team,
                    available_hours_per_period: command.available_hours_per_period,
                };
                tx.put(staff.clone());
                Ok(staff)
            })?
            .record(|staff| {
                let detail = format!(
                    "{} with {}h per period",
                    staff.name, staff.available_hours_per_period
                );
                (staff.id, detail)
            });
        Ok(staff)
    }

    /// Change a staff member's per-period capacity.
    ///
    /// # Errors
    ///
    /// [`PlanError::CapacityExceeded`] if any of the staff's periods already
    /// commits more than the new capacity.
    pub fn update_staff_capacity(&self, command: StaffCapacityUpdate) -> PlanResult<Staff> {
        let op = Operation::UpdateStaffCapacity;
        let command = self.validated(op, command)?;
        let staff = self
            .execute(op, |tx| {
                let mut staff = tx.get::<Staff>(command.staff)?;
                let committed = tx
                    .scan_where::<PeriodStaff, _>(|ps| ps.staff == command.staff)
                    .iter()
                    .map(|ps| ps.total_hours)
                    .max()
                    .unwrap_or(0);
                if committed > command.available_hours_per_period {
                    return Err(PlanError::CapacityExceeded {
                        requested: 0,
                        committed,
                        available: command.available_hours_per_period,
                    });
                }
                staff.available_hours_per_period = command.available_hours_per_period;
                tx.put(staff.clone());
                Ok(staff)
            })?
            .record(|staff| {
                let detail = format!("{}h per period", staff.available_hours_per_period);
                (staff.id, detail)
            });
        Ok(staff)
    }

    /// Delete a staff member and every `PeriodStaff` they hold.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn delete_staff(&self, staff: StaffId) -> PlanResult<CascadeReport> {
        let op = Operation::DeleteStaff;
        let report = self
            .execute(op, |tx| {
                tx.get::<Staff>(staff)?;
                let mut report = CascadeReport::default();
                for ps in tx.scan_where::<PeriodStaff, _>(|ps| ps.staff == staff) {
                    report.absorb(self.cascade_period_staff(tx, ps.id)?);
                }
                tx.delete::<Staff>(staff)?;
                Ok(report)
            })?
            .record(|report| (staff, format!("{report:?}")));
        Ok(report)
    }

    /// # Errors
    ///
    /// [`PlanError::ValidationFailed`] on a blank name or unordered dates.
    pub fn create_period(&self, command: NewPeriod) -> PlanResult<Period> {
        let op = Operation::CreatePeriod;
        let command = self.validated(op, command)?;
        let period = Period {
            id: PeriodId::new(),
            name: command.name,
            start: command.start,
            end: command.end,
        };
        let period = self
            .execute(op, |tx| {
                tx.put(period.clone());
                Ok(period)
            })?
            .record(|period| (period.id, format!("{} to {}", period.start, period.end)));
        Ok(period)
    }

    /// Delete a period and every `PeriodStaff` in it.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn delete_period(&self, period: PeriodId) -> PlanResult<CascadeReport> {
        let op = Operation::DeletePeriod;
        let report = self
            .execute(op, |tx| {
                tx.get::<Period>(period)?;
                let mut report = CascadeReport::default();
                for ps in tx.scan_where::<PeriodStaff, _>(|ps| ps.period == period) {
                    report.absorb(self.cascade_period_staff(tx, ps.id)?);
                }
                tx.delete::<Period>(period)?;
                Ok(report)
            })?
            .record(|report| (period, format!("{report:?}")));
        Ok(report)
    }

    /// # Errors
    ///
    /// [`PlanError::ValidationFailed`] on a blank or overlong name.
    pub fn create_project(&self, command: NewProject) -> PlanResult<Project> {
        let op = Operation::CreateProject;
        let command = self.validated(op, command)?;
        let project = Project {
            id: ProjectId::new(),
            name: command.name,
            description: command.description,
        };
        let project = self
            .execute(op, |tx| {
                tx.put(project.clone());
                Ok(project)
            })?
            .record(|project| (project.id, project.name.clone()));
        Ok(project)
    }

    /// Delete a project and its sprints.
    ///
    /// # Errors
    ///
    /// [`PlanError::ValidationFailed`] while any task still belongs to the
    /// project.
    pub fn delete_project(&self, project: ProjectId) -> PlanResult<Project> {
        let op = Operation::DeleteProject;
        let removed = self
            .execute(op, |tx| {
                let referencing = tx.scan_where::<Task, _>(|t| t.project == project).len();
                if referencing > 0 {
                    return Err(reference_error(
                        "project",
                        format!("project {project} is still referenced by {referencing} tasks"),
                    ));
                }
                for sprint in tx.scan_where::<Sprint, _>(|s| s.project == project) {
                    tx.delete::<Sprint>(sprint.id)?;
                }
                tx.delete::<Project>(project)
            })?
            .record(|removed| (removed.id, removed.name.clone()));
        Ok(removed)
    }

    /// # Errors
    ///
    /// [`PlanError::ValidationFailed`] on bad fields, [`PlanError::NotFound`]
    /// if the project is absent.
    pub fn create_sprint(&self, command: NewSprint) -> PlanResult<Sprint> {
        let op = Operation::CreateSprint;
        let command = self.validated(op, command)?;
        let sprint = self
            .execute(op, |tx| {
                tx.get::<Project>(command.project)?;
                let sprint = Sprint {
                    id: SprintId::new(),
                    project: command.project,
                    name: command.name,
                    start: command.start,
                    end: command.end,
                };
                tx.put(sprint.clone());
                Ok(sprint)
            })?
            .record(|sprint| (sprint.id, format!("{} in {}", sprint.name, sprint.project)));
        Ok(sprint)
    }

    /// Delete a sprint; tasks planned in it stay, with no sprint.
    ///
    /// Returns the ids of the tasks that lost their sprint.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn delete_sprint(&self, sprint: SprintId) -> PlanResult<Vec<TaskId>> {
        let op = Operation::DeleteSprint;
        let detached = self
            .execute(op, |tx| {
                tx.delete::<Sprint>(sprint)?;
                let mut detached = Vec::new();
                for mut task in tx.scan_where::<Task, _>(|t| t.sprint == Some(sprint)) {
                    task.sprint = None;
                    detached.push(task.id);
                    tx.put(task);
                }
                detached.sort_unstable();
                Ok(detached)
            })?
            .record(|detached| (sprint, format!("{} tasks detached", detached.len())));
        Ok(detached)
    }

    /// # Errors
    ///
    /// [`PlanError::ValidationFailed`] on bad fields or an email already in
    /// use.
    pub fn create_user(&self, command: NewUser) -> PlanResult<User> {
        let op = Operation::CreateUser;
        let command = self.validated(op, command)?;
        let user = self
            .execute(op, |tx| {
                let email = command.email.trim().to_lowercase();
                if !tx
                    .scan_where::<User, _>(|u| u.email.eq_ignore_ascii_case(&email))
                    .is_empty()
                {
                    return Err(unique_error(
                        "email",
                        format!("email {email} is already registered"),
                    ));
                }
                let user = User {
                    id: UserId::new(),
                    name: command.name,
                    email,
                };
                tx.put(user.clone());
                Ok(user)
            })?
            .record(|user| (user.id, user.email.clone()));
        Ok(user)
    }

    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn delete_user(&self, user: UserId) -> PlanResult<User> {
        let op = Operation::DeleteUser;
        let removed = self
            .execute(op, |tx| tx.delete::<User>(user))?
            .record(|removed| (removed.id, removed.email.clone()));
        Ok(removed)
    }

    // ---- period staff --------------------------------------------------

    /// Associate a staff member with a period.
    ///
    /// # Errors
    ///
    /// - [`PlanError::NotFound`] if the staff or period is absent
    /// - [`PlanError::ValidationFailed`] if the pair is already associated
    pub fn create_period_staff(&self, command: NewPeriodStaff) -> PlanResult<PeriodStaff> {
        let op = Operation::CreatePeriodStaff;
        let command = self.validated(op, command)?;
        let ps = self
            .execute(op, |tx| {
                tx.get::<Staff>(command.staff)?;
                tx.get::<Period>(command.period)?;
                Self::ensure_unassociated(tx, command.staff, command.period, None)?;
                let ps = PeriodStaff::new(command.staff, command.period);
                tx.put(ps.clone());
                Ok(ps)
            })?
            .record(|ps| (ps.id, format!("staff {} in period {}", ps.staff, ps.period)));
        Ok(ps)
    }

    /// Reassign a `PeriodStaff` to another staff member, keeping its tasks.
    /// Reassigning to the current staff member changes nothing.
    ///
    /// # Errors
    ///
    /// - [`PlanError::ValidationFailed`] if the new staff already has a
    ///   `PeriodStaff` in the same period
    /// - [`PlanError::CapacityExceeded`] if the committed hours exceed the new
    ///   staff member's capacity
    pub fn update_period_staff(&self, command: PeriodStaffUpdate) -> PlanResult<PeriodStaff> {
        let op = Operation::UpdatePeriodStaff;
        let command = self.validated(op, command)?;
        let ps = self
            .execute(op, |tx| {
                let mut ps = tx.get::<PeriodStaff>(command.period_staff)?;
                let staff = tx.get::<Staff>(command.staff)?;
                if ps.staff == staff.id {
                    return Ok(ps);
                }
                Self::ensure_unassociated(tx, staff.id, ps.period, Some(ps.id))?;
                if ps.total_hours > staff.available_hours_per_period {
                    return Err(PlanError::CapacityExceeded {
                        requested: ps.total_hours,
                        committed: 0,
                        available: staff.available_hours_per_period,
                    });
                }
                ps.staff = staff.id;
                tx.put(ps.clone());
                Ok(ps)
            })?
            .record(|ps| (ps.id, format!("reassigned to staff {}", ps.staff)));
        Ok(ps)
    }

    fn ensure_unassociated(
        tx: &mut Transaction<'_, S>,
        staff: StaffId,
        period: PeriodId,
        except: Option<PeriodStaffId>,
    ) -> PlanResult<()> {
        let taken = tx
            .scan_where::<PeriodStaff, _>(|ps| {
                ps.staff == staff && ps.period == period && Some(ps.id) != except
            })
            .into_iter()
            .next();
        match taken {
            Some(existing) => Err(unique_error(
                "period_staff",
                format!(
                    "staff {staff} already has period staff {} in period {period}",
                    existing.id
                ),
            )),
            None => Ok(()),
        }
    }

    /// Delete a `PeriodStaff`, its tasks, and every edge touching them.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn delete_period_staff(&self, period_staff: PeriodStaffId) -> PlanResult<CascadeReport> {
        let op = Operation::DeletePeriodStaff;
        let report = self
            .execute(op, |tx| self.cascade_period_staff(tx, period_staff))?
            .record(|report| {
                let detail = format!(
                    "{} tasks, {} edges",
                    report.tasks_removed, report.edges_removed
                );
                (period_staff, detail)
            });
        Ok(report)
    }

    fn cascade_period_staff(
        &self,
        tx: &mut Transaction<'_, S>,
        period_staff: PeriodStaffId,
    ) -> PlanResult<CascadeReport> {
        tx.get::<PeriodStaff>(period_staff)?;
        let mut report = CascadeReport {
            period_staff_removed: 1,
            ..CascadeReport::default()
        };
        for task in tx.scan_where::<Task, _>(|t| t.period_staff == period_staff) {
            report.edges_removed += self.graph.remove_edges_for_task(tx, task.id)?.len();
            self.allocator.remove_task(tx, task.id)?;
            report.tasks_removed += 1;
        }
        tx.delete::<PeriodStaff>(period_staff)?;
        Ok(report)
    }

    /// Every `PeriodStaff` in `period`.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if the period is absent.
    pub fn staff_in_period(&self, period: PeriodId) -> PlanResult<Vec<PeriodStaff>> {
        with_transaction(&self.store, |tx| {
            tx.get::<Period>(period)?;
            let mut rows = tx.scan_where::<PeriodStaff, _>(|ps| ps.period == period);
            rows.sort_by_key(|ps| ps.id);
            Ok(rows)
        })
    }

    // ---- tasks ---------------------------------------------------------

    /// Create a task and charge its hours to the owning `PeriodStaff`.
    ///
    /// # Errors
    ///
    /// - [`PlanError::ValidationFailed`] on bad fields, or a sprint that
    ///   belongs to another project
    /// - [`PlanError::NotFound`] if a referenced entity is absent
    /// - [`PlanError::CapacityExceeded`] if the hours do not fit
    /// - [`PlanError::Conflict`] if another write to the same `PeriodStaff`
    ///   committed first
    pub fn create_task(&self, command: NewTask) -> PlanResult<Task> {
        let op = Operation::CreateTask;
        let command = self.validated(op, command)?;
        let task = self
            .execute(op, |tx| {
                tx.get::<Project>(command.project)?;
                if let Some(sprint) = command.sprint {
                    let sprint = tx.get::<Sprint>(sprint)?;
                    if sprint.project != command.project {
                        return Err(reference_error(
                            "sprint",
                            format!("sprint {} belongs to project {}", sprint.id, sprint.project),
                        ));
                    }
                }
                self.allocator.assign_task(
                    tx,
                    command.period_staff,
                    TaskDraft {
                        project: command.project,
                        sprint: command.sprint,
                        name: command.name,
                        hours: command.hours,
                    },
                )
            })?
            .record(|task| {
                let detail = format!(
                    "#{} {}h on {}",
                    task.task_number, task.task_hours, task.period_staff
                );
                (task.id, detail)
            });
        Ok(task)
    }

    /// Change a task's hours, project or name.
    ///
    /// Moving a task to another project drops its sprint when the sprint
    /// belongs to the old project.
    ///
    /// # Errors
    ///
    /// As [`Planner::create_task`]; nothing is written on failure.
    pub fn update_task(&self, command: TaskUpdate) -> PlanResult<Task> {
        let op = Operation::UpdateTask;
        let command = self.validated(op, command)?;
        let task = self
            .execute(op, |tx| {
                let mut task = match command.hours {
                    Some(hours) => self.allocator.update_task(tx, command.task, hours)?,
                    None => tx.get::<Task>(command.task)?,
                };
                if let Some(project) = command.project {
                    tx.get::<Project>(project)?;
                    if project != task.project {
                        task.project = project;
                        if let Some(sprint) = task.sprint {
                            let keep =
                                tx.find::<Sprint>(sprint).is_some_and(|s| s.project == project);
                            if !keep {
                                task.sprint = None;
                            }
                        }
                    }
                }
                if let Some(name) = command.name {
                    task.name = name;
                }
                tx.put(task.clone());
                Ok(task)
            })?
            .record(|task| (task.id, format!("{}h", task.task_hours)));
        Ok(task)
    }

    /// Delete a task, its edges, and its hours.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn delete_task(&self, task: TaskId) -> PlanResult<CascadeReport> {
        let op = Operation::DeleteTask;
        let report = self
            .execute(op, |tx| {
                tx.get::<Task>(task)?;
                let edges = self.graph.remove_edges_for_task(tx, task)?.len();
                self.allocator.remove_task(tx, task)?;
                Ok(CascadeReport {
                    period_staff_removed: 0,
                    tasks_removed: 1,
                    edges_removed: edges,
                })
            })?
            .record(|report| (task, format!("{} edges", report.edges_removed)));
        Ok(report)
    }

    /// Hours still free on a `PeriodStaff`.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn remaining_hours(&self, period_staff: PeriodStaffId) -> PlanResult<Hours> {
        with_transaction(&self.store, |tx| self.allocator.remaining(tx, period_staff))
    }

    // ---- dependencies --------------------------------------------------

    /// Add `predecessor -> successor`; adding an existing edge returns it.
    ///
    /// Holds the graph insert lock across the check and the commit.
    ///
    /// # Errors
    ///
    /// - [`PlanError::ValidationFailed`] for a self-loop
    /// - [`PlanError::NotFound`] if either task is absent
    /// - [`PlanError::CycleDetected`] if the edge would close a cycle
    pub fn add_dependency(&self, command: NewDependency) -> PlanResult<TaskDependency> {
        let op = Operation::AddDependency;
        let command = self.validated(op, command)?;
        let _guard = self.graph.serialize();
        let edge = self
            .execute(op, |tx| {
                self.graph
                    .add_edge(tx, command.predecessor, command.successor)
            })?
            .record(|edge| (edge.id, format!("{} -> {}", edge.predecessor, edge.successor)));
        Ok(edge)
    }

    /// Remove an edge by id or by `(predecessor, successor)` pair.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if no edge matches.
    pub fn remove_dependency(&self, edge: impl Into<EdgeRef>) -> PlanResult<TaskDependency> {
        let op = Operation::RemoveDependency;
        let edge = edge.into();
        let removed = self
            .execute(op, |tx| self.graph.remove_edge(tx, edge))?
            .record(|removed| {
                let detail = format!("{} -> {}", removed.predecessor, removed.successor);
                (removed.id, detail)
            });
        Ok(removed)
    }

    /// Immediate predecessors of `task`.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if the task is absent.
    pub fn dependencies_of(&self, task: TaskId) -> PlanResult<Adjacent> {
        with_transaction(&self.store, |tx| self.graph.dependencies_of(tx, task))
    }

    /// Immediate successors of `task`.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if the task is absent.
    pub fn dependents_of(&self, task: TaskId) -> PlanResult<Adjacent> {
        with_transaction(&self.store, |tx| self.graph.dependents_of(tx, task))
    }

    // ---- integrity -----------------------------------------------------

    /// Rewrite one aggregate from its live tasks.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn recompute_aggregate(&self, period_staff: PeriodStaffId) -> PlanResult<Aggregate> {
        let op = Operation::RecomputeAggregate;
        let live = self
            .execute(op, |tx| self.allocator.recompute_aggregate(tx, period_staff))?
            .record(|live| {
                let detail = format!("{}h / {} tasks", live.total_hours, live.task_number);
                (period_staff, detail)
            });
        Ok(live)
    }

    /// Recompute every aggregate; returns what drifted.
    ///
    /// # Errors
    ///
    /// [`PlanError::Conflict`] if a concurrent write lands first.
    pub fn repair_aggregates(&self) -> PlanResult<Vec<AggregateDrift>> {
        let op = Operation::RecomputeAggregate;
        let repaired = self
            .execute(op, |tx| {
                let mut repaired = Vec::new();
                for ps in tx.scan::<PeriodStaff>() {
                    let stored = Aggregate::stored(&ps);
                    let live = self.allocator.recompute_aggregate(tx, ps.id)?;
                    if live != stored {
                        repaired.push(AggregateDrift {
                            period_staff: ps.id,
                            stored,
                            live,
                        });
                    }
                }
                Ok(repaired)
            })?
            .record_each(|repaired| {
                repaired
                    .iter()
                    .map(|drift| {
                        let detail = format!(
                            "{}h / {} tasks",
                            drift.live.total_hours, drift.live.task_number
                        );
                        (drift.period_staff, detail)
                    })
                    .collect::<Vec<_>>()
            });
        Ok(repaired)
    }

    /// Scan the whole store for broken invariants without writing.
    ///
    /// The scan reads one snapshot. If a writer commits while it runs, the
    /// snapshot fails verification and the scan starts over, up to
    /// `concurrency.max_conflict_retries` times.
    ///
    /// # Errors
    ///
    /// - [`PlanError::Conflict`] if writers kept moving the store on every
    ///   attempt
    /// - [`PlanError::InvariantViolation`] if an aggregate cannot even be
    ///   summed
    pub fn check_integrity(&self) -> PlanResult<IntegrityReport> {
        let report = self.retrying(|planner| {
            let mut tx = Transaction::new(&planner.store);
            let report = planner.integrity_snapshot(&mut tx)?;
            planner.store.verify(&tx.into_batch())?;
            Ok(report)
        })?;
        if !report.is_clean() {
            tracing::warn!(findings = report.findings().len(), "integrity check found problems");
        }
        Ok(report)
    }

    fn integrity_snapshot(&self, tx: &mut Transaction<'_, S>) -> PlanResult<IntegrityReport> {
        let mut report = IntegrityReport {
            cycle: self.graph.detect_cycle(tx),
            orphan_edges: self.graph.orphaned_edges(tx),
            journal_intact: self.journal.verify_integrity().is_ok(),
            ..IntegrityReport::default()
        };

        for ps in tx.scan::<PeriodStaff>() {
            let stored = Aggregate::stored(&ps);
            let live = self.allocator.live_aggregate(tx, ps.id)?;
            if live != stored {
                report.drift.push(AggregateDrift {
                    period_staff: ps.id,
                    stored,
                    live,
                });
            }
            let available = tx
                .find::<Staff>(ps.staff)
                .map_or(0, |s| s.available_hours_per_period);
            if live.total_hours > available {
                report.over_capacity.push(ps.id);
            }
        }
        report.drift.sort_by_key(|d| d.period_staff);
        report.over_capacity.sort_unstable();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::NaiveDate;

    struct Fixture {
        planner: Planner,
        staff: Staff,
        period: Period,
        ps: PeriodStaff,
        project: Project,
    }

    fn fixture(capacity: Hours) -> Fixture {
        let planner = Planner::default();
        let team = planner
            .create_team(NewTeam {
                name: "Platform".to_string(),
                description: String::new(),
            })
            .unwrap();
        let staff = planner
            .create_staff(NewStaff {
                name: "Ada".to_string(),
                team: team.id,
                available_hours_per_period: capacity,
            })
            .unwrap();
        let period = planner
            .create_period(NewPeriod {
                name: "April".to_string(),
                start: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2026, 5, 1).unwrap(),
            })
            .unwrap();
        let ps = planner
            .create_period_staff(NewPeriodStaff {
                staff: staff.id,
                period: period.id,
            })
            .unwrap();
        let project = planner
            .create_project(NewProject {
                name: "Billing".to_string(),
                description: String::new(),
            })
            .unwrap();
        Fixture {
            planner,
            staff,
            period,
            ps,
            project,
        }
    }

    impl Fixture {
        fn task(&self, hours: Hours) -> PlanResult<Task> {
            self.planner
                .create_task(NewTask::new(self.ps.id, self.project.id, hours))
        }
    }

    #[test]
    fn validation_runs_before_any_lookup() {
        let f = fixture(40);
        let err = f
            .planner
            .create_task(NewTask::new(PeriodStaffId::nil(), f.project.id, 0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(err.messages().len(), 2);
    }

    #[test]
    fn duplicate_period_staff_rejected() {
        let f = fixture(40);
        let err = f
            .planner
            .create_period_staff(NewPeriodStaff {
                staff: f.staff.id,
                period: f.period.id,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[test]
    fn capacity_cannot_drop_below_commitment() {
        let f = fixture(40);
        f.task(30).unwrap();

        let err = f
            .planner
            .update_staff_capacity(StaffCapacityUpdate {
                staff: f.staff.id,
                available_hours_per_period: 20,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

        let staff = f
            .planner
            .update_staff_capacity(StaffCapacityUpdate {
                staff: f.staff.id,
                available_hours_per_period: 30,
            })
            .unwrap();
        assert_eq!(staff.available_hours_per_period, 30);
        assert_eq!(f.planner.remaining_hours(f.ps.id).unwrap(), 0);
    }

    #[test]
    fn sprint_must_belong_to_task_project() {
        let f = fixture(40);
        let other = f
            .planner
            .create_project(NewProject {
                name: "Search".to_string(),
                description: String::new(),
            })
            .unwrap();
        let sprint = f
            .planner
            .create_sprint(NewSprint {
                project: other.id,
                name: "S1".to_string(),
                start: f.period.start,
                end: f.period.end,
            })
            .unwrap();

        let err = f
            .planner
            .create_task(NewTask::new(f.ps.id, f.project.id, 4).in_sprint(sprint.id))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
        assert_eq!(f.planner.get::<PeriodStaff>(f.ps.id).unwrap().total_hours, 0);
    }

    #[test]
    fn project_with_tasks_cannot_be_deleted() {
        let f = fixture(40);
        let task = f.task(4).unwrap();

        let err = f.planner.delete_project(f.project.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);

        f.planner.delete_task(task.id).unwrap();
        f.planner.delete_project(f.project.id).unwrap();
    }

    #[test]
    fn update_task_changes_name_and_hours() {
        let f = fixture(40);
        let task = f.task(10).unwrap();

        let updated = f
            .planner
            .update_task(TaskUpdate::new(task.id).hours(18).name("review"))
            .unwrap();
        assert_eq!((updated.task_hours, updated.name.as_str()), (18, "review"));
        assert_eq!(f.planner.get::<PeriodStaff>(f.ps.id).unwrap().total_hours, 18);
    }

    #[test]
    fn delete_task_removes_edges_and_hours() {
        let f = fixture(40);
        let a = f.task(5).unwrap();
        let b = f.task(5).unwrap();
        f.planner
            .add_dependency(NewDependency {
                predecessor: a.id,
                successor: b.id,
            })
            .unwrap();

        let report = f.planner.delete_task(a.id).unwrap();
        assert_eq!(report.edges_removed, 1);
        assert!(f.planner.dependencies_of(b.id).unwrap().is_empty());
        assert_eq!(f.planner.get::<PeriodStaff>(f.ps.id).unwrap().total_hours, 5);
    }

    #[test]
    fn rejected_operations_leave_journal_untouched() {
        let f = fixture(10);
        let before = f.planner.journal().len();
        assert!(f.task(11).is_err());
        assert_eq!(f.planner.journal().len(), before);

        f.task(10).unwrap();
        assert_eq!(f.planner.journal().len(), before + 1);
        assert!(f.planner.journal().verify_integrity().is_ok());
    }

    #[test]
    fn duplicate_dependency_is_journaled_once() {
        let f = fixture(40);
        let a = f.task(5).unwrap();
        let b = f.task(5).unwrap();
        let cmd = NewDependency {
            predecessor: a.id,
            successor: b.id,
        };

        let first = f.planner.add_dependency(cmd).unwrap();
        let before = f.planner.journal().len();
        let second = f.planner.add_dependency(cmd).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(f.planner.journal().len(), before);
    }

    #[test]
    fn reassigning_period_staff_checks_capacity() {
        let f = fixture(40);
        f.task(30).unwrap();
        let team = f.staff.team;
        let small = f
            .planner
            .create_staff(NewStaff {
                name: "Grace".to_string(),
                team,
                available_hours_per_period: 20,
            })
            .unwrap();

        let err = f
            .planner
            .update_period_staff(PeriodStaffUpdate {
                period_staff: f.ps.id,
                staff: small.id,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

        let big = f
            .planner
            .update_staff_capacity(StaffCapacityUpdate {
                staff: small.id,
                available_hours_per_period: 35,
            })
            .unwrap();
        let moved = f
            .planner
            .update_period_staff(PeriodStaffUpdate {
                period_staff: f.ps.id,
                staff: big.id,
            })
            .unwrap();
        assert_eq!(moved.staff, big.id);
        assert_eq!(f.planner.remaining_hours(f.ps.id).unwrap(), 5);
    }

    #[test]
    fn reassigning_to_same_staff_is_not_journaled() {
        let f = fixture(40);
        let before = f.planner.journal().len();
        let commits = f.planner.store().commit_count();

        let same = f
            .planner
            .update_period_staff(PeriodStaffUpdate {
                period_staff: f.ps.id,
                staff: f.staff.id,
            })
            .unwrap();
        assert_eq!(same, f.ps);
        assert_eq!(f.planner.journal().len(), before);
        assert_eq!(f.planner.store().commit_count(), commits);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: PlanResult<()> = retry_on_conflict(3, || {
            calls += 1;
            Err(PlanError::Conflict {
                kind: crate::types::EntityKind::PeriodStaff,
                id: None,
            })
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls, 3);

        let mut calls = 0;
        let result: PlanResult<()> = retry_on_conflict(3, || {
            calls += 1;
            Err(PlanError::invariant("boom"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn fresh_planner_is_clean() {
        let f = fixture(40);
        f.task(12).unwrap();
        let report = f.planner.check_integrity().unwrap();
        assert!(report.is_clean(), "{:?}", report.findings());
    }
}
