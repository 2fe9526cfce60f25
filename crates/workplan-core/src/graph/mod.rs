//! Dependency Graph Manager
//!
//! Owns the rules for task-to-task edges: no self-loops, both endpoints must
//! exist, and the full edge set stays a DAG. Every check runs against the
//! edges visible in the caller's transaction.
//!
//! Insertions must be serialized: two insertions that each pass the
//! reachability check on their own can still close a cycle together. Callers
//! hold [`DependencyManager::serialize`] across check and commit; the store's
//! table-generation check backs this up for writers that bypass the lock.

mod task_graph;

pub use task_graph::TaskGraph;

use crate::config::GraphConfig;
use crate::error::{PlanError, PlanResult, Rule, ValidationErrors, Violation};
use crate::store::{EntityStore, Transaction};
use crate::types::{DependencyId, EdgeRef, EntityKind, Task, TaskDependency, TaskId};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Immediate neighbours of one task
///
/// A finite snapshot that can be iterated any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjacent {
    task: TaskId,
    ids: Arc<[TaskId]>,
}

impl Adjacent {
    fn new(task: TaskId, ids: Vec<TaskId>) -> Self {
        Self {
            task,
            ids: ids.into(),
        }
    }

    /// Task whose neighbours these are
    #[inline]
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Fresh iterator from the start
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + Clone + '_ {
        self.ids.iter().copied()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, task: TaskId) -> bool {
        self.ids.contains(&task)
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<TaskId> {
        self.ids.to_vec()
    }
}

impl<'a> IntoIterator for &'a Adjacent {
    type Item = TaskId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, TaskId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.iter().copied()
    }
}

/// Keeps the dependency edge set acyclic
#[derive(Debug, Default)]
pub struct DependencyManager {
    config: GraphConfig,
    insert_lock: Mutex<()>,
}

impl DependencyManager {
    #[must_use]
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            insert_lock: Mutex::new(()),
        }
    }

    /// Serialize edge insertions; hold the guard until the commit lands
    pub fn serialize(&self) -> MutexGuard<'_, ()> {
        self.insert_lock.lock()
    }

    /// Graph of every edge visible to `tx`
    pub fn load<S: EntityStore + ?Sized>(&self, tx: &mut Transaction<'_, S>) -> TaskGraph {
        TaskGraph::from_edges(&tx.scan::<TaskDependency>())
    }

    /// Insert `predecessor -> successor`.
    ///
    /// Inserting an edge that already exists returns the stored edge.
    ///
    /// # Errors
    ///
    /// - [`PlanError::ValidationFailed`] for a self-loop
    /// - [`PlanError::NotFound`] if either task is absent
    /// - [`PlanError::CycleDetected`] if `successor` already reaches
    ///   `predecessor`
    /// - [`PlanError::InvariantViolation`] if the stored graph is already
    ///   cyclic and verification is enabled
    pub fn add_edge<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        predecessor: TaskId,
        successor: TaskId,
    ) -> PlanResult<TaskDependency> {
        if predecessor == successor {
            return Err(ValidationErrors::single(Violation::new(
                "dependency",
                Rule::Distinct,
                "a task cannot depend on itself",
            ))
            .into());
        }
        tx.get::<Task>(predecessor)?;
        tx.get::<Task>(successor)?;

        let graph = self.load(tx);

        if self.config.verify_on_insert {
            if let Some(cycle) = graph.detect_cycle() {
                return Err(PlanError::invariant(format!(
                    "stored dependency graph already contains a cycle through {} tasks",
                    cycle.len().saturating_sub(1)
                )));
            }
        }

        if let Some(id) = graph.edge_between(predecessor, successor) {
            tracing::debug!(%id, %predecessor, %successor, "dependency already present");
            return tx.get::<TaskDependency>(id);
        }

        if let Some(path) = graph.would_close_cycle(predecessor, successor) {
            tracing::debug!(%predecessor, %successor, path_len = path.len(), "dependency rejected");
            return Err(PlanError::CycleDetected {
                predecessor,
                successor,
                path,
            });
        }

        let edge = TaskDependency {
            id: DependencyId::new(),
            predecessor,
            successor,
        };
        tx.put(edge);
        Ok(edge)
    }

    /// The stored edge `edge` names.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if no edge matches.
    pub fn resolve<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        edge: EdgeRef,
    ) -> PlanResult<TaskDependency> {
        match edge {
            EdgeRef::Id(id) => tx.get::<TaskDependency>(id),
            EdgeRef::Pair {
                predecessor,
                successor,
            } => tx
                .scan_where::<TaskDependency, _>(|e| edge.matches(e))
                .into_iter()
                .next()
                .ok_or_else(|| {
                    tracing::debug!(%predecessor, %successor, "no edge for pair");
                    PlanError::not_found(EntityKind::TaskDependency, predecessor)
                }),
        }
    }

    /// Remove one edge by id or by pair.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if no edge matches.
    pub fn remove_edge<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        edge: EdgeRef,
    ) -> PlanResult<TaskDependency> {
        let stored = self.resolve(tx, edge)?;
        tx.delete::<TaskDependency>(stored.id)
    }

    /// Remove every edge touching `task`; returns the removed ids
    pub fn remove_edges_for_task<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        task: TaskId,
    ) -> PlanResult<Vec<DependencyId>> {
        let touching = tx.scan_where::<TaskDependency, _>(|e| e.touches(task));
        let mut removed = Vec::with_capacity(touching.len());
        for edge in touching {
            tx.delete::<TaskDependency>(edge.id)?;
            removed.push(edge.id);
        }
        removed.sort_unstable();
        Ok(removed)
    }

    /// Immediate predecessors of `task`.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if the task is absent.
    pub fn dependencies_of<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        task: TaskId,
    ) -> PlanResult<Adjacent> {
        tx.get::<Task>(task)?;
        Ok(Adjacent::new(task, self.load(tx).predecessors(task)))
    }

    /// Immediate successors of `task`.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if the task is absent.
    pub fn dependents_of<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
        task: TaskId,
    ) -> PlanResult<Adjacent> {
        tx.get::<Task>(task)?;
        Ok(Adjacent::new(task, self.load(tx).successors(task)))
    }

    /// Full-graph scan; the tasks along one cycle if any exists
    pub fn detect_cycle<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
    ) -> Option<Vec<TaskId>> {
        self.load(tx).detect_cycle()
    }

    /// Edges whose endpoints no longer exist
    pub fn orphaned_edges<S: EntityStore + ?Sized>(
        &self,
        tx: &mut Transaction<'_, S>,
    ) -> Vec<DependencyId> {
        let edges = tx.scan::<TaskDependency>();
        let mut orphans: Vec<DependencyId> = edges
            .into_iter()
            .filter(|e| !tx.contains::<Task>(e.predecessor) || !tx.contains::<Task>(e.successor))
            .map(|e| e.id)
            .collect();
        orphans.sort_unstable();
        orphans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{with_transaction, MemoryStore};
    use crate::types::{PeriodStaffId, ProjectId};

    fn seed_tasks(store: &MemoryStore, n: usize) -> Vec<TaskId> {
        with_transaction(store, |tx| {
            let ids: Vec<TaskId> = (0..n)
                .map(|i| {
                    let task = Task {
                        id: TaskId::new(),
                        period_staff: PeriodStaffId::new(),
                        task_number: u32::try_from(i + 1).unwrap_or(u32::MAX),
                        task_hours: 1,
                        project: ProjectId::new(),
                        sprint: None,
                        name: format!("t{i}"),
                    };
                    let id = task.id;
                    tx.put(task);
                    id
                })
                .collect();
            Ok(ids)
        })
        .unwrap()
    }

    #[test]
    fn rejects_cycle_and_leaves_graph_unchanged() {
        let store = MemoryStore::new();
        let manager = DependencyManager::default();
        let t = seed_tasks(&store, 3);

        with_transaction(&store, |tx| {
            manager.add_edge(tx, t[0], t[1])?;
            manager.add_edge(tx, t[1], t[2])
        })
        .unwrap();

        let err = with_transaction(&store, |tx| manager.add_edge(tx, t[2], t[0])).unwrap_err();
        assert!(matches!(
            err,
            PlanError::CycleDetected { ref path, .. } if path == &vec![t[0], t[1], t[2]]
        ));
        assert_eq!(store.len(EntityKind::TaskDependency), 2);
    }

    #[test]
    fn self_loop_is_a_validation_failure() {
        let store = MemoryStore::new();
        let manager = DependencyManager::default();
        let t = seed_tasks(&store, 1);

        let err = with_transaction(&store, |tx| manager.add_edge(tx, t[0], t[0])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationFailed);
    }

    #[test]
    fn duplicate_edge_is_idempotent() {
        let store = MemoryStore::new();
        let manager = DependencyManager::default();
        let t = seed_tasks(&store, 2);

        let first = with_transaction(&store, |tx| manager.add_edge(tx, t[0], t[1])).unwrap();
        let second = with_transaction(&store, |tx| manager.add_edge(tx, t[0], t[1])).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(EntityKind::TaskDependency), 1);
    }

    #[test]
    fn missing_task_is_not_found() {
        let store = MemoryStore::new();
        let manager = DependencyManager::default();
        let t = seed_tasks(&store, 1);

        let err = with_transaction(&store, |tx| manager.add_edge(tx, t[0], TaskId::new()))
            .unwrap_err();
        assert!(matches!(err, PlanError::NotFound { kind: EntityKind::Task, .. }));
    }

    #[test]
    fn remove_by_pair_and_by_id_resolve_to_same_edge() {
        let store = MemoryStore::new();
        let manager = DependencyManager::default();
        let t = seed_tasks(&store, 3);

        let ab = with_transaction(&store, |tx| manager.add_edge(tx, t[0], t[1])).unwrap();
        let bc = with_transaction(&store, |tx| manager.add_edge(tx, t[1], t[2])).unwrap();

        let removed =
            with_transaction(&store, |tx| manager.remove_edge(tx, (t[0], t[1]).into())).unwrap();
        assert_eq!(removed, ab);

        let removed = with_transaction(&store, |tx| manager.remove_edge(tx, bc.id.into())).unwrap();
        assert_eq!(removed, bc);

        let err = with_transaction(&store, |tx| manager.remove_edge(tx, (t[0], t[1]).into()))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn neighbours_are_immediate_and_restartable() {
        let store = MemoryStore::new();
        let manager = DependencyManager::default();
        let t = seed_tasks(&store, 4);

        with_transaction(&store, |tx| {
            manager.add_edge(tx, t[0], t[2])?;
            manager.add_edge(tx, t[1], t[2])?;
            manager.add_edge(tx, t[2], t[3])
        })
        .unwrap();

        let deps = with_transaction(&store, |tx| manager.dependencies_of(tx, t[2])).unwrap();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(t[0]) && deps.contains(t[1]));
        assert_eq!(deps.iter().count(), deps.iter().count());

        let after = with_transaction(&store, |tx| manager.dependents_of(tx, t[0])).unwrap();
        assert_eq!(after.to_vec(), vec![t[2]]);
        assert!(!after.contains(t[3]));
    }

    #[test]
    fn removing_task_edges_clears_both_directions() {
        let store = MemoryStore::new();
        let manager = DependencyManager::default();
        let t = seed_tasks(&store, 3);

        with_transaction(&store, |tx| {
            manager.add_edge(tx, t[0], t[1])?;
            manager.add_edge(tx, t[1], t[2])
        })
        .unwrap();

        let removed =
            with_transaction(&store, |tx| manager.remove_edges_for_task(tx, t[1])).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(EntityKind::TaskDependency), 0);
    }

    #[test]
    fn corrupted_graph_raises_invariant_violation() {
        let store = MemoryStore::new();
        let manager = DependencyManager::default();
        let t = seed_tasks(&store, 3);

        // Write a cycle directly, bypassing the manager.
        with_transaction(&store, |tx| {
            for (a, b) in [(t[0], t[1]), (t[1], t[0])] {
                tx.put(TaskDependency {
                    id: DependencyId::new(),
                    predecessor: a,
                    successor: b,
                });
            }
            Ok(())
        })
        .unwrap();

        let err = with_transaction(&store, |tx| manager.add_edge(tx, t[1], t[2])).unwrap_err();
        assert!(err.is_internal());
        assert!(with_transaction(&store, |tx| Ok(manager.detect_cycle(tx))).unwrap().is_some());
    }
}
