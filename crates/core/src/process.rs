//! Process model - a scheduled activity with a duration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::family::{Family, LifecycleStatus, Schedulable};
use crate::id::ProcessId;
use crate::policy::{process_verdict, Verdict};
use crate::Time;

/// A process runs from `start_at` for `duration_minutes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    /// Unique identifier
    pub id: ProcessId,

    /// Current status
    pub status: ProcessStatus,

    /// Instant the process starts
    pub start_at: Time,

    /// Length in minutes; negative values are malformed
    pub duration_minutes: i64,

    /// Creation timestamp
    pub created_at: Time,

    /// Last update timestamp
    pub updated_at: Time,
}

impl Process {
    /// Create a running process.
    pub fn new(start_at: Time, duration_minutes: i64) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: ProcessId::new(),
            status: ProcessStatus::Running,
            start_at,
            duration_minutes,
            created_at: now,
            updated_at: now,
        }
    }

    /// Derived end instant, `None` when the timestamp would overflow.
    pub fn end_at(&self) -> Option<Time> {
        Duration::try_minutes(self.duration_minutes)
            .and_then(|d| self.start_at.checked_add_signed(d))
    }
}

/// Process lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    /// In progress
    Running,
    /// Duration elapsed
    Finished,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LifecycleStatus for ProcessStatus {
    const LIVE: Self = ProcessStatus::Running;
    const TERMINAL: Self = ProcessStatus::Finished;

    fn as_str(self) -> &'static str {
        match self {
            ProcessStatus::Running => "RUNNING",
            ProcessStatus::Finished => "FINISHED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(ProcessStatus::Running),
            "FINISHED" => Some(ProcessStatus::Finished),
            _ => None,
        }
    }
}

impl Schedulable for Process {
    type Id = ProcessId;
    type Status = ProcessStatus;

    const FAMILY: Family = Family::Process;

    fn id(&self) -> ProcessId {
        self.id
    }

    fn status(&self) -> ProcessStatus {
        self.status
    }

    fn coarse_time(&self) -> Time {
        self.start_at
    }

    fn verdict(&self, now: Time) -> Verdict {
        process_verdict(self, now)
    }

    fn mark(&mut self, status: ProcessStatus, at: Time) {
        self.status = status;
        self.updated_at = at;
    }
}
