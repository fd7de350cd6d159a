//! Backup coordinator: trigger → poll → download → prune, per course
//!
//! [`BackupCoordinator`] runs one course at a time through the pipeline
//! ([`run_backup`](BackupCoordinator::run_backup)) and fans a course list out
//! across a bounded worker pool ([`process_queue`](BackupCoordinator::process_queue)).
//! Every status change is written to the shared status table and broadcast
//! to subscribers.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::canvas::{CanvasClient, ExportOrchestrator};
use crate::config::Config;
use crate::error::{Error, ExportError, Result};
use crate::types::{ArchiveFile, BackupStatus, CourseId, CourseTask, QueueSummary, StatusUpdate};

mod download;
mod queue_processor;
mod retention;
mod status;

pub use download::ArchiveDownloader;
pub use retention::RetentionManager;
pub use status::{StatusBoard, StatusTable};

#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(test)]
mod tests;

/// Runs course backups and tracks their status
///
/// Cloning is cheap; clones share the API client, the status table, the
/// event channel and the cancellation token.
#[derive(Clone)]
pub struct BackupCoordinator {
    config: Arc<Config>,
    exports: ExportOrchestrator,
    downloader: ArchiveDownloader,
    retention: RetentionManager,
    status: StatusBoard,
    cancel: Arc<Mutex<CancellationToken>>,
    /// Limits outstanding backups (max_concurrent_backups)
    backup_limit: Arc<Semaphore>,
}

impl std::fmt::Debug for BackupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupCoordinator")
            .field("output_dir", &self.config.backup.output_dir)
            .field(
                "max_concurrent_backups",
                &self.config.backup.max_concurrent_backups,
            )
            .field("cancelled", &self.cancellation_token().is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BackupCoordinator {
    /// Create a coordinator from a configuration
    ///
    /// Fails if the configuration does not validate. No network request is
    /// made; call [`CanvasClient::validate_token`] through [`client`](Self::client)
    /// to check credentials up front.
    pub fn new(config: Config) -> Result<Self> {
        let client = CanvasClient::new(&config)?;
        let downloader = ArchiveDownloader::new(&config)?;
        let retention =
            RetentionManager::new(&config.backup.output_dir, config.backup.retention_count);
        let exports = ExportOrchestrator::new(client, config.export.clone());
        let backup_limit = Arc::new(Semaphore::new(config.backup.max_concurrent_backups));

        Ok(Self {
            config: Arc::new(config),
            exports,
            downloader,
            retention,
            status: StatusBoard::new(),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            backup_limit,
        })
    }

    /// The configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared Canvas API client
    pub fn client(&self) -> &CanvasClient {
        self.exports.client()
    }

    /// Subscribe to status updates
    ///
    /// Every transition and progress report of every course is delivered in
    /// the order it was recorded.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status.subscribe()
    }

    /// The shared status table
    pub fn status_table(&self) -> StatusTable {
        self.status.table()
    }

    /// Copy of every tracked task
    pub fn snapshot(&self) -> Vec<CourseTask> {
        self.status.snapshot()
    }

    /// Current state of one course
    pub fn task(&self, course_id: &CourseId) -> Option<CourseTask> {
        self.status.get(course_id)
    }

    /// Add tasks to the status table as `Pending`
    pub fn register(&self, tasks: &[CourseTask]) {
        for task in tasks {
            self.status.report(task, BackupStatus::Pending, 0);
        }
    }

    /// The current cancellation token
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Ask every running backup to stop at its next checkpoint
    ///
    /// Queued backups are not started.
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancellation_token().cancel();
    }

    /// Install a fresh token if the current one has been cancelled
    pub fn reset_cancellation(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }

    /// Back up a single course
    ///
    /// Reports `Backing up`, then `Downloading`, then `Completed`; on error
    /// the course ends `Failed` (or `Stopped` if it was cancelled). Errors are
    /// logged, never returned. Safe to call again for the same course.
    pub async fn run_backup(&self, task: &CourseTask) -> bool {
        let cancel = self.cancellation_token();

        match self.backup_course(task, &cancel).await {
            Ok(archive) => {
                tracing::info!(
                    course_id = %task.course_id,
                    course = %task.course_name,
                    path = %archive.path.display(),
                    "Backup completed"
                );
                self.status.report(task, BackupStatus::Completed, 100);
                true
            }
            Err(e) if e.is_cancelled() => {
                tracing::warn!(
                    course_id = %task.course_id,
                    course = %task.course_name,
                    "Backup stopped"
                );
                self.status.report(task, BackupStatus::Stopped, 0);
                false
            }
            Err(e) => {
                tracing::error!(
                    course_id = %task.course_id,
                    course = %task.course_name,
                    error = %e,
                    "Backup failed"
                );
                self.status.report(task, BackupStatus::Failed, 0);
                false
            }
        }
    }

    async fn backup_course(
        &self,
        task: &CourseTask,
        cancel: &CancellationToken,
    ) -> Result<ArchiveFile> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.status.report(task, BackupStatus::BackingUp, 0);

        let export_id = self.exports.trigger_export(&task.course_id).await?;
        let url = self
            .exports
            .poll_export(&task.course_id, &export_id, cancel, |progress| {
                self.status.report(task, BackupStatus::BackingUp, progress)
            })
            .await?;

        let url = match url {
            Some(url) => url,
            None if cancel.is_cancelled() => return Err(Error::Cancelled),
            None => {
                return Err(ExportError::TimedOut {
                    course_id: task.course_id.to_string(),
                    export_id,
                    attempts: self.config.export.max_poll_attempts,
                }
                .into());
            }
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.status.report(task, BackupStatus::Downloading, 0);

        let archive = self
            .downloader
            .download(task, &url, cancel, |progress| {
                self.status.report(task, BackupStatus::Downloading, progress)
            })
            .await?;

        self.retention
            .prune(&task.course_name, &task.course_id)
            .await?;

        Ok(archive)
    }

    /// Re-run every course whose last backup failed or was stopped
    ///
    /// Installs a fresh cancellation token first. Returns the outcome of the
    /// re-run; an empty summary when nothing needed retrying.
    pub async fn retry_failed(&self) -> QueueSummary {
        let retry: Vec<CourseTask> = self.status.retryable();
        if retry.is_empty() {
            return QueueSummary::default();
        }

        tracing::info!(count = retry.len(), "Retrying failed backups");
        self.reset_cancellation();
        for task in &retry {
            self.status.report(task, BackupStatus::Pending, 0);
        }
        self.process_queue(retry).await
    }
}
