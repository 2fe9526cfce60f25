//! Entity store
//!
//! One generic storage interface for every entity kind. Durable backends
//! implement [`EntityStore`]; domain code only ever talks to a
//! [`Transaction`], which records what it read and buffers what it writes so
//! the whole batch commits or nothing does.
//!
//! Every committed record carries a version. A commit fails with
//! [`PlanError::Conflict`] if any record the transaction read, or any table it
//! scanned, changed since it was read.

mod memory;
mod transaction;

pub use memory::MemoryStore;
pub use transaction::{with_transaction, Transaction};

use crate::error::PlanResult;
use crate::types::{
    DependencyId, EntityKind, Period, PeriodId, PeriodStaff, PeriodStaffId, Project, ProjectId,
    Sprint, SprintId, Staff, StaffId, Task, TaskDependency, TaskId, Team, TeamId, User, UserId,
};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Any stored entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Team(Team),
    Staff(Staff),
    Period(Period),
    PeriodStaff(PeriodStaff),
    Task(Task),
    TaskDependency(TaskDependency),
    Project(Project),
    Sprint(Sprint),
    User(User),
}

impl Record {
    /// Key this record is stored under
    #[must_use]
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Team(e) => e.key(),
            Self::Staff(e) => e.key(),
            Self::Period(e) => e.key(),
            Self::PeriodStaff(e) => e.key(),
            Self::Task(e) => e.key(),
            Self::TaskDependency(e) => e.key(),
            Self::Project(e) => e.key(),
            Self::Sprint(e) => e.key(),
            Self::User(e) => e.key(),
        }
    }
}

/// Store key: entity kind plus identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl RecordKey {
    #[inline]
    #[must_use]
    pub fn new(kind: EntityKind, id: impl Into<Uuid>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// A value with the store version it was committed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// A table snapshot
#[derive(Debug, Clone, Default)]
pub struct Scan {
    /// Table generation, bumped by every commit touching the table
    pub generation: u64,
    pub records: Vec<Versioned<Record>>,
}

/// Everything a transaction needs validated and applied at commit
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// Version each key had when first read; `None` means it was absent
    pub reads: BTreeMap<RecordKey, Option<u64>>,
    /// Generation each table had when first scanned
    pub scans: BTreeMap<EntityKind, u64>,
    /// `Some` upserts, `None` deletes
    pub writes: BTreeMap<RecordKey, Option<Record>>,
}

impl WriteBatch {
    /// Whether the batch changes nothing
    #[inline]
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Version stamped on every record written by the batch
    pub version: u64,
    pub writes: usize,
}

/// Storage backend
pub trait EntityStore: Send + Sync {
    /// Read the committed record under `key`
    fn load(&self, key: RecordKey) -> Option<Versioned<Record>>;

    /// Read every committed record of one kind
    fn scan(&self, kind: EntityKind) -> Scan;

    /// Validate the batch's reads and apply its writes atomically.
    ///
    /// # Errors
    ///
    /// [`crate::PlanError::Conflict`] if a read record or scanned table changed
    /// since it was read; nothing is applied in that case.
    fn commit(&self, batch: WriteBatch) -> PlanResult<CommitReceipt>;

    /// Check the batch's read set against the committed state, applying
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`crate::PlanError::Conflict`] under the same rules as
    /// [`EntityStore::commit`].
    fn verify(&self, batch: &WriteBatch) -> PlanResult<()>;

    /// Run `f` in a transaction and commit its writes all-or-nothing.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or a commit conflict.
    fn with_transaction<T, F>(&self, f: F) -> PlanResult<T>
    where
        Self: Sized,
        F: FnOnce(&mut Transaction<'_, Self>) -> PlanResult<T>,
    {
        with_transaction(self, f)
    }
}

/// A storable entity
pub trait Entity: Clone + Send + Sync + 'static {
    /// Typed identifier
    type Id: Copy + Into<Uuid> + fmt::Display;

    /// Table this entity lives in
    const KIND: EntityKind;

    fn id(&self) -> Self::Id;

    fn into_record(self) -> Record;

    fn from_record(record: Record) -> Option<Self>;

    /// Store key for this entity
    #[inline]
    fn key(&self) -> RecordKey {
        RecordKey::new(Self::KIND, self.id())
    }
}

macro_rules! impl_entity {
    ($ty:ident, $id:ty) => {
        impl Entity for $ty {
            type Id = $id;
            const KIND: EntityKind = EntityKind::$ty;

            #[inline]
            fn id(&self) -> Self::Id {
                self.id
            }

            #[inline]
            fn into_record(self) -> Record {
                Record::$ty(self)
            }

            #[inline]
            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$ty(e) => Some(e),
                    _ => None,
                }
            }
        }
    };
}

impl_entity!(Team, TeamId);
impl_entity!(Staff, StaffId);
impl_entity!(Period, PeriodId);
impl_entity!(PeriodStaff, PeriodStaffId);
impl_entity!(Task, TaskId);
impl_entity!(TaskDependency, DependencyId);
impl_entity!(Project, ProjectId);
impl_entity!(Sprint, SprintId);
impl_entity!(User, UserId);
