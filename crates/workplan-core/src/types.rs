//! Domain types for the planning core
//!
//! Identifiers are distinct newtypes over UUID v4 so a `TaskId` can never be
//! handed where a `PeriodStaffId` is expected. Entities carry only the
//! fields the scheduling rules need; storage versions live in the store.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The nil identifier, never valid for a stored entity
            #[inline]
            #[must_use]
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Whether this is the nil identifier
            #[inline]
            #[must_use]
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Underlying UUID
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

entity_id!(
    /// Team identifier
    TeamId
);
entity_id!(
    /// Staff member identifier
    StaffId
);
entity_id!(
    /// Period identifier
    PeriodId
);
entity_id!(
    /// Staff-in-period aggregate identifier
    PeriodStaffId
);
entity_id!(
    /// Task identifier
    TaskId
);
entity_id!(
    /// Dependency edge identifier
    DependencyId
);
entity_id!(
    /// Project identifier
    ProjectId
);
entity_id!(
    /// Sprint identifier
    SprintId
);
entity_id!(
    /// User identifier
    UserId
);

/// Whole hours
pub type Hours = u32;

/// Kind tag for every stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Team,
    Staff,
    Period,
    PeriodStaff,
    Task,
    TaskDependency,
    Project,
    Sprint,
    User,
}

impl EntityKind {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Staff => "staff",
            Self::Period => "period",
            Self::PeriodStaff => "period_staff",
            Self::Task => "task",
            Self::TaskDependency => "task_dependency",
            Self::Project => "project",
            Self::Sprint => "sprint",
            Self::User => "user",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A team owning zero or more staff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub description: String,
}

/// A staff member with a per-period hour ceiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: StaffId,
    pub name: String,
    pub team: TeamId,
    pub available_hours_per_period: Hours,
}

/// A bounded time window; `start < end`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// Length of the period in days, always derived from the dates
    #[inline]
    #[must_use]
    pub fn duration_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Whether `date` falls within `[start, end)`
    #[inline]
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }
}

/// One staff member's committed hours within one period
///
/// `total_hours` and `task_number` are aggregates over the live tasks and are
/// only ever changed by the capacity allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodStaff {
    pub id: PeriodStaffId,
    pub staff: StaffId,
    pub period: PeriodId,
    pub total_hours: Hours,
    pub task_number: u32,
    /// Highest task ordinal handed out; ordinals are never reused
    pub last_task_number: u32,
}

impl PeriodStaff {
    /// Fresh aggregate with nothing committed
    #[must_use]
    pub fn new(staff: StaffId, period: PeriodId) -> Self {
        Self {
            id: PeriodStaffId::new(),
            staff,
            period,
            total_hours: 0,
            task_number: 0,
            last_task_number: 0,
        }
    }
}

/// A unit of work consuming hours from a `PeriodStaff`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub period_staff: PeriodStaffId,
    /// 1-based ordinal within the owning `PeriodStaff`
    pub task_number: u32,
    pub task_hours: Hours,
    pub project: ProjectId,
    pub sprint: Option<SprintId>,
    pub name: String,
}

/// Directed edge: `predecessor` must precede `successor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDependency {
    pub id: DependencyId,
    pub predecessor: TaskId,
    pub successor: TaskId,
}

impl TaskDependency {
    /// Whether this edge touches `task` at either end
    #[inline]
    #[must_use]
    pub fn touches(&self, task: TaskId) -> bool {
        self.predecessor == task || self.successor == task
    }
}

/// Administrative grouping for tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
}

/// A dated iteration within a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: SprintId,
    pub project: ProjectId,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// An account holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

/// Canonical reference to a dependency edge
///
/// Both forms resolve to the same stored edge; the `(predecessor, successor)`
/// pair is the edge's identity and the id is a handle onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeRef {
    Id(DependencyId),
    Pair {
        predecessor: TaskId,
        successor: TaskId,
    },
}

impl EdgeRef {
    /// Whether `edge` is the one this reference names
    #[must_use]
    pub fn matches(&self, edge: &TaskDependency) -> bool {
        match *self {
            Self::Id(id) => edge.id == id,
            Self::Pair {
                predecessor,
                successor,
            } => edge.predecessor == predecessor && edge.successor == successor,
        }
    }
}

impl From<DependencyId> for EdgeRef {
    fn from(value: DependencyId) -> Self {
        Self::Id(value)
    }
}

impl From<(TaskId, TaskId)> for EdgeRef {
    fn from((predecessor, successor): (TaskId, TaskId)) -> Self {
        Self::Pair {
            predecessor,
            successor,
        }
    }
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "edge {id}"),
            Self::Pair {
                predecessor,
                successor,
            } => write!(f, "edge {predecessor} -> {successor}"),
        }
    }
}
