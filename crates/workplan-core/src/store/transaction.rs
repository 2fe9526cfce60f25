use super::{Entity, EntityStore, Record, RecordKey, WriteBatch};
use crate::error::{PlanError, PlanResult};
use crate::types::EntityKind;
use std::collections::{BTreeMap, HashMap};

/// A unit of work against an [`EntityStore`]
///
/// Reads are repeatable: the first read of a key or table is cached and later
/// reads see the cached value overlaid with this transaction's own writes.
/// Dropping a transaction without committing discards every write.
pub struct Transaction<'s, S: EntityStore + ?Sized> {
    store: &'s S,
    reads: BTreeMap<RecordKey, Option<u64>>,
    cache: HashMap<RecordKey, Option<Record>>,
    scans: BTreeMap<EntityKind, u64>,
    scanned: HashMap<EntityKind, Vec<Record>>,
    writes: BTreeMap<RecordKey, Option<Record>>,
}

impl<'s, S: EntityStore + ?Sized> Transaction<'s, S> {
    /// Open a transaction over `store`
    #[must_use]
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            reads: BTreeMap::new(),
            cache: HashMap::new(),
            scans: BTreeMap::new(),
            scanned: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Look up an entity, `None` if absent
    pub fn find<E: Entity>(&mut self, id: E::Id) -> Option<E> {
        let key = RecordKey::new(E::KIND, id);
        if let Some(pending) = self.writes.get(&key) {
            return pending.clone().and_then(E::from_record);
        }
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone().and_then(E::from_record);
        }

        let loaded = self.store.load(key);
        self.reads.insert(key, loaded.as_ref().map(|v| v.version));
        let record = loaded.map(|v| v.value);
        self.cache.insert(key, record.clone());
        record.and_then(E::from_record)
    }

    /// Look up an entity that must exist.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn get<E: Entity>(&mut self, id: E::Id) -> PlanResult<E> {
        self.find::<E>(id)
            .ok_or_else(|| PlanError::not_found(E::KIND, id))
    }

    /// Whether an entity exists
    pub fn contains<E: Entity>(&mut self, id: E::Id) -> bool {
        self.find::<E>(id).is_some()
    }

    /// Insert or replace an entity
    pub fn put<E: Entity>(&mut self, entity: E) {
        let key = entity.key();
        self.writes.insert(key, Some(entity.into_record()));
    }

    /// Delete an entity that must exist.
    ///
    /// # Errors
    ///
    /// [`PlanError::NotFound`] if absent.
    pub fn delete<E: Entity>(&mut self, id: E::Id) -> PlanResult<E> {
        let existing = self.get::<E>(id)?;
        self.writes.insert(RecordKey::new(E::KIND, id), None);
        Ok(existing)
    }

    /// Every entity of one kind, including this transaction's own writes
    pub fn scan<E: Entity>(&mut self) -> Vec<E> {
        if !self.scanned.contains_key(&E::KIND) {
            let scan = self.store.scan(E::KIND);
            self.scans.insert(E::KIND, scan.generation);
            self.scanned
                .insert(E::KIND, scan.records.into_iter().map(|v| v.value).collect());
        }

        let base = self.scanned.get(&E::KIND).map(Vec::as_slice).unwrap_or_default();
        let mut out: Vec<E> = base
            .iter()
            .filter(|record| !self.writes.contains_key(&record.key()))
            .cloned()
            .filter_map(E::from_record)
            .collect();

        out.extend(
            self.writes
                .iter()
                .filter(|(key, _)| key.kind == E::KIND)
                .filter_map(|(_, pending)| pending.clone())
                .filter_map(E::from_record),
        );
        out
    }

    /// Entities of one kind matching `predicate`
    pub fn scan_where<E, P>(&mut self, mut predicate: P) -> Vec<E>
    where
        E: Entity,
        P: FnMut(&E) -> bool,
    {
        self.scan::<E>().into_iter().filter(|e| predicate(e)).collect()
    }

    /// Number of buffered writes
    #[inline]
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Hand the read set and buffered writes over for commit
    #[must_use]
    pub fn into_batch(self) -> WriteBatch {
        WriteBatch {
            reads: self.reads,
            scans: self.scans,
            writes: self.writes,
        }
    }
}

/// Run `f` in a fresh transaction and commit its writes all-or-nothing.
///
/// If `f` fails the transaction is dropped and the store is untouched.
/// Read-only transactions are not committed.
///
/// # Errors
///
/// Whatever `f` returns, or [`PlanError::Conflict`] from the commit.
pub fn with_transaction<S, T, F>(store: &S, f: F) -> PlanResult<T>
where
    S: EntityStore + ?Sized,
    F: FnOnce(&mut Transaction<'_, S>) -> PlanResult<T>,
{
    let mut tx = Transaction::new(store);
    let out = f(&mut tx)?;
    let batch = tx.into_batch();
    if !batch.is_read_only() {
        store.commit(batch)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Team, TeamId};

    fn team(name: &str) -> Team {
        Team {
            id: TeamId::new(),
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn writes_are_visible_inside_the_transaction() {
        let store = MemoryStore::new();
        let t = team("platform");
        let id = t.id;

        with_transaction(&store, |tx| {
            tx.put(t.clone());
            assert_eq!(tx.get::<Team>(id)?.name, "platform");
            assert_eq!(tx.scan::<Team>().len(), 1);
            Ok(())
        })
        .unwrap();

        assert_eq!(store.len(EntityKind::Team), 1);
    }

    #[test]
    fn failed_closure_discards_writes() {
        let store = MemoryStore::new();
        let result: PlanResult<()> = with_transaction(&store, |tx| {
            tx.put(team("doomed"));
            Err(PlanError::invariant("abort"))
        });

        assert!(result.is_err());
        assert_eq!(store.len(EntityKind::Team), 0);
    }

    #[test]
    fn delete_of_missing_entity_is_not_found() {
        let store = MemoryStore::new();
        let err = with_transaction(&store, |tx| tx.delete::<Team>(TeamId::new())).unwrap_err();
        assert!(matches!(err, PlanError::NotFound { kind: EntityKind::Team, .. }));
    }

    #[test]
    fn scan_overlays_pending_deletes() {
        let store = MemoryStore::new();
        let a = team("a");
        let b = team("b");
        let a_id = a.id;
        with_transaction(&store, |tx| {
            tx.put(a);
            tx.put(b);
            Ok(())
        })
        .unwrap();

        with_transaction(&store, |tx| {
            tx.delete::<Team>(a_id)?;
            let names: Vec<_> = tx.scan::<Team>().into_iter().map(|t| t.name).collect();
            assert_eq!(names, vec!["b".to_string()]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn stale_read_conflicts_at_commit() {
        let store = MemoryStore::new();
        let t = team("shared");
        let id = t.id;
        with_transaction(&store, |tx| {
            tx.put(t);
            Ok(())
        })
        .unwrap();

        let mut slow = Transaction::new(&store);
        let mut renamed = slow.get::<Team>(id).unwrap();
        renamed.name = "slow".to_string();
        slow.put(renamed);

        with_transaction(&store, |tx| {
            let mut fast = tx.get::<Team>(id)?;
            fast.name = "fast".to_string();
            tx.put(fast);
            Ok(())
        })
        .unwrap();

        let err = store.commit(slow.into_batch()).unwrap_err();
        assert!(err.is_retryable());
        let stored = with_transaction(&store, |tx| tx.get::<Team>(id)).unwrap();
        assert_eq!(stored.name, "fast");
    }
}
