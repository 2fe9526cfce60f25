//! Capacity Allocator
//!
//! Keeps every `PeriodStaff` aggregate equal to the live sum of its tasks and
//! within the staff member's available hours.
//!
//! The allocator holds no state. Each mutation reads the `PeriodStaff` row
//! through the caller's transaction and writes it back, so the row version is
//! the serialization token: two concurrent assignments against the same
//! `PeriodStaff` cannot both commit, and the loser fails with
//! [`PlanError::Conflict`].

use crate::error::{PlanError, PlanResult, Rule, ValidationErrors, Violation};
use crate::store::{EntityStore, Transaction};
use crate::types::{
    Hours, PeriodStaff, PeriodStaffId, ProjectId, SprintId, Staff, Task, TaskId,
};

/// Committed hours and live task count for one `PeriodStaff`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Aggregate {
    pub total_hours: Hours,
    pub task_number: u32,
}

impl Aggregate {
    /// Aggregate as currently stored on the row
    #[must_use]
    pub fn stored(period_staff: &PeriodStaff) -> Self {
        Self {
            total_hours: period_staff.total_hours,
            task_number: period_staff.task_number,
        }
    }
}

/// Fields of a task that is about to be assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub project: ProjectId,
    pub sprint: Option<SprintId>,
    pub name: String,
    pub hours: Hours,
}

/// Capacity bound: `committed + requested <= available`.
///
/// # Errors
///
/// [`PlanError::CapacityExceeded`] if the bound would be broken, including on
/// arithmetic overflow.
pub fn check_capacity(committed: Hours, requested: Hours, available: Hours) -> PlanResult<Hours> {
    match committed.checked_add(requested) {
        Some(total) if total <= available => Ok(total),
        _ => Err(PlanError::CapacityExceeded {
            requested,
            committed,
            available,
        }),
    }
}

fn positive_hours(hours: Hours) -> PlanResult<()> {
    if hours == 0 {
        return Err(ValidationErrors::single(Violation::new(
            "hours",
            Rule::Positive,
            "hours must be positive",
        ))
        .into());
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CapacityAllocator;

impl CapacityAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn available<S: EntityStore + ?Sized>(
        tx: &mut Transaction<'_, S>,
        period_staff: &PeriodStaff,
    ) -> PlanResult<Hours> {
        Ok(tx.get::<Staff>(period_staff.staff)?.available_hours_per_period)
    }

    /// Create a task under `period_staff` and charge its hours.
    ///
    /// The task and the updated aggregate are written in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// - [`PlanError::ValidationFailed`] if `hours` is zero
    /// - [`PlanError::NotFound`] if the `PeriodStaff` or its staff is absent
    /// - [`PlanError::CapacityExceeded`] if the hours do not fit
    pub fn assign_task<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        period_staff: PeriodStaffId,
        draft: TaskDraft,
    ) -> PlanResult<Task> {
        positive_hours(draft.hours)?;
        let mut owner = tx.get::<PeriodStaff>(period_staff)?;
        let available = Self::available(tx, &owner)?;
        let total = check_capacity(owner.total_hours, draft.hours, available)?;

        let ordinal = owner
            .last_task_number
            .checked_add(1)
            .ok_or_else(|| {
                PlanError::invariant(format!("task ordinal overflow on {period_staff}"))
            })?;

        let task = Task {
            id: TaskId::new(),
            period_staff,
            task_number: ordinal,
            task_hours: draft.hours,
            project: draft.project,
            sprint: draft.sprint,
            name: draft.name,
        };

        owner.total_hours = total;
        owner.task_number = owner.task_number.saturating_add(1);
        owner.last_task_number = ordinal;

        tx.put(task.clone());
        tx.put(owner);
        Ok(task)
    }

    /// Change a task's hours, re-checking capacity against the other tasks.
    ///
    /// # Errors
    ///
    /// - [`PlanError::ValidationFailed`] if `new_hours` is zero
    /// - [`PlanError::CapacityExceeded`] if the new hours do not fit; nothing
    ///   is written in that case
    /// - [`PlanError::InvariantViolation`] if the stored aggregate is smaller
    ///   than the task's current hours
    pub fn update_task<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        task: TaskId,
        new_hours: Hours,
    ) -> PlanResult<Task> {
        positive_hours(new_hours)?;
        let mut stored = tx.get::<Task>(task)?;
        let mut owner = tx.get::<PeriodStaff>(stored.period_staff)?;

        let others = owner.total_hours.checked_sub(stored.task_hours).ok_or_else(|| {
            PlanError::invariant(format!(
                "period staff {} commits {}h but task {task} holds {}h",
                owner.id, owner.total_hours, stored.task_hours
            ))
        })?;

        let available = Self::available(tx, &owner)?;
        owner.total_hours = check_capacity(others, new_hours, available)?;
        stored.task_hours = new_hours;

        tx.put(stored.clone());
        tx.put(owner);
        Ok(stored)
    }

    /// Delete a task and release its hours.
    ///
    /// # Errors
    ///
    /// [`PlanError::InvariantViolation`] if releasing would take the aggregate
    /// below zero.
    pub fn remove_task<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        task: TaskId,
    ) -> PlanResult<Task> {
        let removed = tx.delete::<Task>(task)?;
        let mut owner = tx.get::<PeriodStaff>(removed.period_staff)?;

        owner.total_hours = owner.total_hours.checked_sub(removed.task_hours).ok_or_else(|| {
            PlanError::invariant(format!(
                "removing {}h from period staff {} would leave negative hours ({}h committed)",
                removed.task_hours, owner.id, owner.total_hours
            ))
        })?;
        owner.task_number = owner.task_number.checked_sub(1).ok_or_else(|| {
            PlanError::invariant(format!("period staff {} has no tasks to remove", owner.id))
        })?;

        tx.put(owner);
        Ok(removed)
    }

    /// Aggregate derived from the live task set, without writing
    pub fn live_aggregate<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        period_staff: PeriodStaffId,
    ) -> PlanResult<Aggregate> {
        let tasks = tx.scan_where::<Task, _>(|t| t.period_staff == period_staff);
        let mut total: Hours = 0;
        for task in &tasks {
            total = total.checked_add(task.task_hours).ok_or_else(|| {
                PlanError::invariant(format!("hours overflow summing tasks of {period_staff}"))
            })?;
        }
        Ok(Aggregate {
            total_hours: total,
            task_number: u32::try_from(tasks.len())
                .map_err(|_| PlanError::invariant("task count exceeds u32"))?,
        })
    }

    /// Rewrite the stored aggregate from the live task set.
    ///
    /// Writes only when the stored value drifted, so calling it twice in a row
    /// changes nothing the second time.
    pub fn recompute_aggregate<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        period_staff: PeriodStaffId,
    ) -> PlanResult<Aggregate> {
        let mut owner = tx.get::<PeriodStaff>(period_staff)?;
        let live = self.live_aggregate(tx, period_staff)?;
        let stored = Aggregate::stored(&owner);

        if live != stored {
            tracing::warn!(
                %period_staff,
                stored_hours = stored.total_hours,
                live_hours = live.total_hours,
                stored_tasks = stored.task_number,
                live_tasks = live.task_number,
                "aggregate drift repaired"
            );
            let highest = tx
                .scan_where::<Task, _>(|t| t.period_staff == period_staff)
                .iter()
                .map(|t| t.task_number)
                .max()
                .unwrap_or(0);
            owner.total_hours = live.total_hours;
            owner.task_number = live.task_number;
            owner.last_task_number = owner.last_task_number.max(highest);
            tx.put(owner);
        }
        Ok(live)
    }

    /// Hours still free for `period_staff`
    pub fn remaining<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        period_staff: PeriodStaffId,
    ) -> PlanResult<Hours> {
        let owner = tx.get::<PeriodStaff>(period_staff)?;
        let available = Self::available(tx, &owner)?;
        Ok(available.saturating_sub(owner.total_hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::{with_transaction, MemoryStore};
    use crate::types::{PeriodId, StaffId, TeamId};

    fn seed(store: &MemoryStore, capacity: Hours) -> PeriodStaffId {
        with_transaction(store, |tx| {
            let staff = Staff {
                id: StaffId::new(),
                name: "Ada".to_string(),
                team: TeamId::new(),
                available_hours_per_period: capacity,
            };
            let ps = PeriodStaff::new(staff.id, PeriodId::new());
            let id = ps.id;
            tx.put(staff);
            tx.put(ps);
            Ok(id)
        })
        .unwrap()
    }

    fn draft(hours: Hours) -> TaskDraft {
        TaskDraft {
            project: ProjectId::new(),
            sprint: None,
            name: format!("{hours}h task"),
            hours,
        }
    }

    fn stored(store: &MemoryStore, id: PeriodStaffId) -> PeriodStaff {
        with_transaction(store, |tx| tx.get::<PeriodStaff>(id)).unwrap()
    }

    #[test]
    fn check_capacity_bounds() {
        assert_eq!(check_capacity(35, 5, 40), Ok(40));
        assert_eq!(
            check_capacity(35, 10, 40),
            Err(PlanError::CapacityExceeded {
                requested: 10,
                committed: 35,
                available: 40
            })
        );
        assert!(check_capacity(Hours::MAX, 1, Hours::MAX).is_err());
    }

    #[test]
    fn assign_until_full() {
        let store = MemoryStore::new();
        let alloc = CapacityAllocator::new();
        let ps = seed(&store, 40);

        for hours in [15, 20] {
            with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(hours))).unwrap();
        }
        let err = with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(10))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);

        let row = stored(&store, ps);
        assert_eq!((row.total_hours, row.task_number), (35, 2));
    }

    #[test]
    fn zero_hours_rejected_before_lookup() {
        let store = MemoryStore::new();
        let alloc = CapacityAllocator::new();
        let err = with_transaction(&store, |tx| {
            alloc.assign_task(tx, PeriodStaffId::new(), draft(0))
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationFailed);
    }

    #[test]
    fn update_swaps_contribution() {
        let store = MemoryStore::new();
        let alloc = CapacityAllocator::new();
        let ps = seed(&store, 40);

        let a = with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(20))).unwrap();
        with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(15))).unwrap();

        // 15 + 25 = 40 fits exactly
        with_transaction(&store, |tx| alloc.update_task(tx, a.id, 25)).unwrap();
        assert_eq!(stored(&store, ps).total_hours, 40);

        let err = with_transaction(&store, |tx| alloc.update_task(tx, a.id, 26)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
        assert_eq!(stored(&store, ps).total_hours, 40);
    }

    #[test]
    fn ordinals_are_not_reused() {
        let store = MemoryStore::new();
        let alloc = CapacityAllocator::new();
        let ps = seed(&store, 40);

        let first = with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(5))).unwrap();
        let second = with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(5))).unwrap();
        with_transaction(&store, |tx| alloc.remove_task(tx, second.id)).unwrap();
        let third = with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(5))).unwrap();

        assert_eq!(first.task_number, 1);
        assert_eq!(third.task_number, 3);
        assert_eq!(stored(&store, ps).task_number, 2);
    }

    #[test]
    fn remove_below_zero_is_invariant_violation() {
        let store = MemoryStore::new();
        let alloc = CapacityAllocator::new();
        let ps = seed(&store, 40);
        let task = with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(10))).unwrap();

        with_transaction(&store, |tx| {
            let mut row = tx.get::<PeriodStaff>(ps)?;
            row.total_hours = 3;
            tx.put(row);
            Ok(())
        })
        .unwrap();

        let err = with_transaction(&store, |tx| alloc.remove_task(tx, task.id)).unwrap_err();
        assert!(err.is_internal());
        assert!(with_transaction(&store, |tx| Ok(tx.contains::<Task>(task.id))).unwrap());
    }

    #[test]
    fn recompute_repairs_drift_and_is_idempotent() {
        let store = MemoryStore::new();
        let alloc = CapacityAllocator::new();
        let ps = seed(&store, 40);
        with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(12))).unwrap();

        with_transaction(&store, |tx| {
            let mut row = tx.get::<PeriodStaff>(ps)?;
            row.total_hours = 30;
            row.task_number = 4;
            tx.put(row);
            Ok(())
        })
        .unwrap();

        let first = with_transaction(&store, |tx| alloc.recompute_aggregate(tx, ps)).unwrap();
        let commits = store.commit_count();
        let second = with_transaction(&store, |tx| alloc.recompute_aggregate(tx, ps)).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, Aggregate { total_hours: 12, task_number: 1 });
        assert_eq!(store.commit_count(), commits);
    }

    #[test]
    fn remaining_hours() {
        let store = MemoryStore::new();
        let alloc = CapacityAllocator::new();
        let ps = seed(&store, 40);
        with_transaction(&store, |tx| alloc.assign_task(tx, ps, draft(25))).unwrap();
        assert_eq!(with_transaction(&store, |tx| alloc.remaining(tx, ps)).unwrap(), 15);
    }
}
