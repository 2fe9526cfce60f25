use super::{CommitReceipt, EntityStore, Record, RecordKey, Scan, Versioned, WriteBatch};
use crate::error::{PlanError, PlanResult};
use crate::types::EntityKind;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Table {
    generation: u64,
    rows: BTreeMap<Uuid, Versioned<Record>>,
}

#[derive(Debug, Default)]
struct Tables {
    by_kind: HashMap<EntityKind, Table>,
    clock: u64,
    commits: u64,
    conflicts: u64,
}

impl Tables {
    fn version_of(&self, key: RecordKey) -> Option<u64> {
        self.by_kind
            .get(&key.kind)
            .and_then(|t| t.rows.get(&key.id))
            .map(|v| v.version)
    }

    fn generation_of(&self, kind: EntityKind) -> u64 {
        self.by_kind.get(&kind).map_or(0, |t| t.generation)
    }

    fn validate(&self, batch: &WriteBatch) -> PlanResult<()> {
        for (key, expected) in &batch.reads {
            if self.version_of(*key) != *expected {
                return Err(PlanError::Conflict {
                    kind: key.kind,
                    id: Some(key.id),
                });
            }
        }
        for (kind, generation) in &batch.scans {
            if self.generation_of(*kind) != *generation {
                return Err(PlanError::Conflict {
                    kind: *kind,
                    id: None,
                });
            }
        }
        Ok(())
    }
}

/// In-process optimistic store
///
/// Readers never block each other; a commit takes the write lock only long
/// enough to validate the batch's read set and apply its writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed records of one kind
    #[must_use]
    pub fn len(&self, kind: EntityKind) -> usize {
        self.inner.read().by_kind.get(&kind).map_or(0, |t| t.rows.len())
    }

    /// Whether the store holds no records at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_kind.values().all(|t| t.rows.is_empty())
    }

    /// Successful commits so far
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.inner.read().commits
    }

    /// Commits rejected with a conflict so far
    #[must_use]
    pub fn conflict_count(&self) -> u64 {
        self.inner.read().conflicts
    }

    /// Current version of a record, if present
    #[must_use]
    pub fn version_of(&self, key: RecordKey) -> Option<u64> {
        self.inner.read().version_of(key)
    }
}

impl EntityStore for MemoryStore {
    fn load(&self, key: RecordKey) -> Option<Versioned<Record>> {
        let tables = self.inner.read();
        tables
            .by_kind
            .get(&key.kind)
            .and_then(|t| t.rows.get(&key.id))
            .cloned()
    }

    fn scan(&self, kind: EntityKind) -> Scan {
        let tables = self.inner.read();
        match tables.by_kind.get(&kind) {
            Some(table) => Scan {
                generation: table.generation,
                records: table.rows.values().cloned().collect(),
            },
            None => Scan::default(),
        }
    }

    fn commit(&self, batch: WriteBatch) -> PlanResult<CommitReceipt> {
        let mut tables = self.inner.write();

        if let Err(err) = tables.validate(&batch) {
            tables.conflicts += 1;
            tracing::warn!(error = %err, "commit rejected");
            return Err(err);
        }

        tables.clock += 1;
        tables.commits += 1;
        let version = tables.clock;
        let writes = batch.writes.len();

        for (key, pending) in batch.writes {
            let table = tables.by_kind.entry(key.kind).or_default();
            table.generation = version;
            match pending {
                Some(value) => {
                    table.rows.insert(key.id, Versioned { version, value });
                }
                None => {
                    table.rows.remove(&key.id);
                }
            }
        }

        tracing::trace!(version, writes, "commit applied");
        Ok(CommitReceipt { version, writes })
    }

    fn verify(&self, batch: &WriteBatch) -> PlanResult<()> {
        self.inner.read().validate(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Entity;
    use crate::types::{Project, ProjectId};

    fn project() -> Project {
        Project {
            id: ProjectId::new(),
            name: "apollo".to_string(),
            description: String::new(),
        }
    }

    fn insert(store: &MemoryStore, p: &Project) -> CommitReceipt {
        let mut batch = WriteBatch::default();
        batch.writes.insert(p.key(), Some(p.clone().into_record()));
        store.commit(batch).unwrap()
    }

    #[test]
    fn versions_increase_per_commit() {
        let store = MemoryStore::new();
        let a = project();
        let b = project();

        let first = insert(&store, &a);
        let second = insert(&store, &b);

        assert!(second.version > first.version);
        assert_eq!(store.version_of(a.key()), Some(first.version));
        assert_eq!(store.len(EntityKind::Project), 2);
        assert_eq!(store.commit_count(), 2);
    }

    #[test]
    fn scan_generation_detects_phantoms() {
        let store = MemoryStore::new();
        let generation = store.scan(EntityKind::Project).generation;
        insert(&store, &project());

        let mut batch = WriteBatch::default();
        batch.scans.insert(EntityKind::Project, generation);
        let p = project();
        batch.writes.insert(p.key(), Some(p.into_record()));

        let err = store.commit(batch).unwrap_err();
        assert_eq!(
            err,
            PlanError::Conflict {
                kind: EntityKind::Project,
                id: None
            }
        );
        assert_eq!(store.len(EntityKind::Project), 1);
        assert_eq!(store.conflict_count(), 1);
    }

    #[test]
    fn absent_read_conflicts_once_created() {
        let store = MemoryStore::new();
        let p = project();

        let mut batch = WriteBatch::default();
        batch.reads.insert(p.key(), None);
        batch.writes.insert(p.key(), Some(p.clone().into_record()));

        insert(&store, &p);
        assert!(store.commit(batch).unwrap_err().is_retryable());
    }

    #[test]
    fn verify_checks_reads_without_committing() {
        let store = MemoryStore::new();
        let p = project();
        insert(&store, &p);

        let mut snapshot = WriteBatch::default();
        snapshot.reads.insert(p.key(), store.version_of(p.key()));
        snapshot
            .scans
            .insert(EntityKind::Project, store.scan(EntityKind::Project).generation);
        assert!(store.verify(&snapshot).is_ok());
        assert_eq!(store.commit_count(), 1);

        insert(&store, &project());
        assert_eq!(
            store.verify(&snapshot).unwrap_err(),
            PlanError::Conflict {
                kind: EntityKind::Project,
                id: None
            }
        );
        assert_eq!(store.commit_count(), 2);
    }
}
