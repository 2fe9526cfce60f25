//! Workplan Core - task dependencies and staff capacity
//!
//! The scheduling core behind staff planning:
//! - Keeps the task dependency graph acyclic
//! - Keeps every staff member's committed hours within their capacity
//! - Validates every command before it touches storage
//! - Applies each use case as one all-or-nothing transaction
//!
//! # Example
//!
//! ```rust,ignore
//! use workplan_core::prelude::*;
//!
//! let planner = Planner::default();
//! let task = planner.create_task(NewTask::new(period_staff, project, 8))?;
//! let edge = planner.add_dependency(NewDependency {
//!     predecessor: task.id,
//!     successor: other.id,
//! })?;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod capacity;
pub mod config;
pub mod error;
pub mod facade;
pub mod graph;
pub mod journal;
pub mod simulator;
pub mod store;
pub mod types;
pub mod validation;

pub use capacity::{Aggregate, CapacityAllocator, TaskDraft};
pub use config::{
    ConcurrencyConfig, ConfigError, GraphConfig, JournalConfig, PlanConfig, ValidationConfig,
};
pub use error::{ErrorKind, PlanError, PlanResult, Rule, ValidationErrors, Violation};
pub use facade::{retry_on_conflict, AggregateDrift, CascadeReport, IntegrityReport, Planner};
pub use graph::{Adjacent, DependencyManager, TaskGraph};
pub use journal::{Journal, JournalEntry, Operation};
pub use store::{with_transaction, Entity, EntityStore, MemoryStore, Transaction};
pub use types::{
    DependencyId, EdgeRef, EntityKind, Hours, Period, PeriodId, PeriodStaff, PeriodStaffId,
    Project, ProjectId, Sprint, SprintId, Staff, StaffId, Task, TaskDependency, TaskId, Team,
    TeamId, User, UserId,
};
pub use validation::{
    Command, CommandValidator, NewDependency, NewPeriod, NewPeriodStaff, NewProject, NewSprint,
    NewStaff, NewTask, NewTeam, NewUser, PeriodStaffUpdate, StaffCapacityUpdate, TaskUpdate,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Workplan Core
    pub use crate::{
        EdgeRef, ErrorKind, NewDependency, NewPeriod, NewPeriodStaff, NewProject, NewStaff,
        NewTask, NewTeam, PlanConfig, PlanError, PlanResult, Planner, StaffCapacityUpdate,
        TaskUpdate,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
