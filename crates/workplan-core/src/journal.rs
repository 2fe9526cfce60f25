//! Audit journal
//!
//! Append-only record of every committed planner operation. Each entry is
//! chained to the previous one by SHA-256 so any rewrite of history is caught
//! by [`Journal::verify_integrity`].

use crate::error::{PlanError, PlanResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    CreateTeam,
    DeleteTeam,
    CreateStaff,
    UpdateStaffCapacity,
    DeleteStaff,
    CreatePeriod,
    DeletePeriod,
    CreateProject,
    DeleteProject,
    CreateSprint,
    DeleteSprint,
    CreateUser,
    DeleteUser,
    CreatePeriodStaff,
    UpdatePeriodStaff,
    DeletePeriodStaff,
    CreateTask,
    UpdateTask,
    DeleteTask,
    AddDependency,
    RemoveDependency,
    RecomputeAggregate,
}

impl Operation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTeam => "create_team",
            Self::DeleteTeam => "delete_team",
            Self::CreateStaff => "create_staff",
            Self::UpdateStaffCapacity => "update_staff_capacity",
            Self::DeleteStaff => "delete_staff",
            Self::CreatePeriod => "create_period",
            Self::DeletePeriod => "delete_period",
            Self::CreateProject => "create_project",
            Self::DeleteProject => "delete_project",
            Self::CreateSprint => "create_sprint",
            Self::DeleteSprint => "delete_sprint",
            Self::CreateUser => "create_user",
            Self::DeleteUser => "delete_user",
            Self::CreatePeriodStaff => "create_period_staff",
            Self::UpdatePeriodStaff => "update_period_staff",
            Self::DeletePeriodStaff => "delete_period_staff",
            Self::CreateTask => "create_task",
            Self::UpdateTask => "update_task",
            Self::DeleteTask => "delete_task",
            Self::AddDependency => "add_dependency",
            Self::RemoveDependency => "remove_dependency",
            Self::RecomputeAggregate => "recompute_aggregate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    /// Primary entity the operation acted on
    pub subject: Uuid,
    pub detail: String,
    pub prev_hash: [u8; 32],
    pub hash: [u8; 32],
}

#[derive(Debug)]
pub struct Journal {
    inner: Mutex<Vec<JournalEntry>>,
    enabled: bool,
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Journal {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            enabled,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Chain a new entry onto the journal; returns its sequence number, or
    /// `None` when journaling is disabled
    pub fn append(
        &self,
        operation: Operation,
        subject: impl Into<Uuid>,
        detail: impl Into<String>,
    ) -> Option<u64> {
        if !self.enabled {
            return None;
        }
        let mut guard = self.inner.lock();
        let mut entry = JournalEntry {
            seq: guard.len() as u64,
            timestamp: Utc::now(),
            operation,
            subject: subject.into(),
            detail: detail.into(),
            prev_hash: guard.last().map_or([0u8; 32], |e| e.hash),
            hash: [0u8; 32],
        };
        entry.hash = compute_hash(&entry);
        let seq = entry.seq;
        guard.push(entry);
        Some(seq)
    }

    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Entries as a JSON array, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&*self.inner.lock())
    }

    /// Re-derive the hash chain.
    ///
    /// # Errors
    ///
    /// [`PlanError::InvariantViolation`] naming the first broken entry.
    pub fn verify_integrity(&self) -> PlanResult<()> {
        let guard = self.inner.lock();
        let mut prev = [0u8; 32];
        for (idx, e) in guard.iter().enumerate() {
            if e.seq != idx as u64 || e.prev_hash != prev || e.hash != compute_hash(e) {
                return Err(PlanError::invariant(format!(
                    "journal chain broken at entry {idx} ({})",
                    e.operation
                )));
            }
            prev = e.hash;
        }
        Ok(())
    }

    #[cfg(test)]
    fn tamper(&self, idx: usize, detail: &str) {
        if let Some(e) = self.inner.lock().get_mut(idx) {
            e.detail = detail.to_string();
        }
    }
}

fn compute_hash(entry: &JournalEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(entry.operation.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(entry.subject.as_bytes());
    hasher.update(entry.detail.as_bytes());
    hasher.update([0]);
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}
