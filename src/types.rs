//! Core types for canvas-backup

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;

/// Canvas course identifier (the digits after `/courses/` in a course URL)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub String);

impl CourseId {
    /// Create a new CourseId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CourseId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CourseId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for CourseId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for CourseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backup status of a single course
///
/// `Pending → Queued → Backing up → Downloading → Completed | Failed | Stopped`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupStatus {
    /// Imported, not yet queued
    #[default]
    Pending,
    /// Waiting for a worker
    Queued,
    /// Export triggered and being polled
    #[serde(rename = "Backing up")]
    BackingUp,
    /// Archive being downloaded
    Downloading,
    /// Archive downloaded and retention applied
    Completed,
    /// Backup failed (details are in the log)
    Failed,
    /// Backup interrupted by cancellation
    Stopped,
}

impl BackupStatus {
    /// Display label used in status tables and events
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Pending => "Pending",
            BackupStatus::Queued => "Queued",
            BackupStatus::BackingUp => "Backing up",
            BackupStatus::Downloading => "Downloading",
            BackupStatus::Completed => "Completed",
            BackupStatus::Failed => "Failed",
            BackupStatus::Stopped => "Stopped",
        }
    }

    /// Whether the backup has finished, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            BackupStatus::Completed | BackupStatus::Failed | BackupStatus::Stopped
        )
    }

    /// Whether a task in this state is picked up again by "retry failed"
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackupStatus::Failed | BackupStatus::Stopped)
    }
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A course to back up, as imported from the course list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseTask {
    /// Course name (used for the archive directory and file name)
    pub course_name: String,
    /// Canvas course ID
    pub course_id: CourseId,
    /// Current backup status
    pub status: BackupStatus,
    /// Progress of the current step (0-100)
    pub progress: u8,
}

impl CourseTask {
    /// Create a pending task
    pub fn new(course_name: impl Into<String>, course_id: impl Into<CourseId>) -> Self {
        Self {
            course_name: course_name.into(),
            course_id: course_id.into(),
            status: BackupStatus::Pending,
            progress: 0,
        }
    }
}

/// Status transition or progress report for one course
///
/// This is the single observer contract between the backup core and any
/// front-end: consumers subscribe and receive every update in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Course name
    pub course_name: String,
    /// Canvas course ID
    pub course_id: CourseId,
    /// New status
    pub status: BackupStatus,
    /// Progress percentage (0-100)
    pub progress: u8,
}

impl StatusUpdate {
    /// Build an update for a task
    pub fn for_task(task: &CourseTask, status: BackupStatus, progress: u8) -> Self {
        Self {
            course_name: task.course_name.clone(),
            course_id: task.course_id.clone(),
            status,
            progress: progress.min(100),
        }
    }
}

/// A course archive on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Full path of the archive
    pub path: PathBuf,
    /// Course the archive belongs to
    pub course_name: String,
    /// Creation time (modification time where the platform lacks birth time)
    pub created: SystemTime,
}

/// Outcome counts of a queue run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    /// Tasks that completed
    pub completed: usize,
    /// Tasks that failed
    pub failed: usize,
    /// Tasks that were interrupted by cancellation
    pub stopped: usize,
    /// Tasks never started because the run was cancelled
    pub not_started: usize,
}

impl QueueSummary {
    /// Whether every task completed
    pub fn all_completed(&self) -> bool {
        self.failed == 0 && self.stopped == 0 && self.not_started == 0
    }
}
