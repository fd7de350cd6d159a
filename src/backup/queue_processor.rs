//! Queue processor: a fixed pool of workers draining a shared course queue

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::BackupCoordinator;
use crate::types::{BackupStatus, CourseId, CourseTask, QueueSummary};
use crate::utils::sanitize_course_name;

impl BackupCoordinator {
    /// Back up every task using a pool of `max_concurrent_backups` workers
    ///
    /// All tasks are marked `Queued` up front. Each worker:
    /// 1. Stops if cancellation was requested
    /// 2. Pops the next task from the shared queue, stopping when it is empty
    /// 3. Acquires a permit from the backup limiter
    /// 4. Runs [`run_backup`](Self::run_backup) for the task
    ///
    /// Returns once every worker has finished. Tasks that were never started
    /// because of cancellation are marked `Stopped` so they can be retried.
    /// Duplicate course IDs in `tasks` are only backed up once. Distinct
    /// courses whose names sanitize to the same directory are renamed to
    /// `{name} ({id})` so they never share an archive path.
    pub async fn process_queue(&self, tasks: Vec<CourseTask>) -> QueueSummary {
        let mut seen = HashSet::new();
        let mut tasks: Vec<CourseTask> = tasks
            .into_iter()
            .filter(|task| seen.insert(task.course_id.clone()))
            .collect();
        if tasks.is_empty() {
            return QueueSummary::default();
        }
        disambiguate_names(&mut tasks);

        for task in &tasks {
            self.status.report(task, BackupStatus::Queued, 0);
        }

        let queue = Arc::new(Mutex::new(tasks.iter().cloned().collect::<VecDeque<_>>()));
        let worker_count = self.config.backup.max_concurrent_backups.clamp(1, tasks.len());
        let cancel = self.cancellation_token();

        tracing::info!(
            courses = tasks.len(),
            workers = worker_count,
            "Starting backup queue"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let coordinator = self.clone();
            let queue = queue.clone();
            let cancel = cancel.clone();

            workers.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        tracing::debug!(worker_id, "Worker stopping: cancelled");
                        break;
                    }

                    let next = {
                        let mut queue_guard = queue.lock().await;
                        queue_guard.pop_front()
                    };
                    let Some(task) = next else {
                        break;
                    };

                    let permit = match coordinator.backup_limit.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            // Limiter closed; put the task back so it is reported as not started
                            queue.lock().await.push_front(task);
                            break;
                        }
                    };

                    coordinator.run_backup(&task).await;
                    drop(permit);
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Backup worker panicked");
            }
        }

        let mut summary = QueueSummary::default();
        for task in &tasks {
            let status = self
                .status
                .get(&task.course_id)
                .map(|t| t.status)
                .unwrap_or(BackupStatus::Queued);
            match status {
                BackupStatus::Completed => summary.completed += 1,
                BackupStatus::Failed => summary.failed += 1,
                BackupStatus::Stopped => summary.stopped += 1,
                BackupStatus::Pending
                | BackupStatus::Queued
                | BackupStatus::BackingUp
                | BackupStatus::Downloading => {
                    self.status.report(task, BackupStatus::Stopped, 0);
                    summary.not_started += 1;
                }
            }
        }

        tracing::info!(
            completed = summary.completed,
            failed = summary.failed,
            stopped = summary.stopped,
            not_started = summary.not_started,
            "Backup queue finished"
        );
        summary
    }
}

/// Append the course ID to every name whose archive directory is shared
/// with another course
fn disambiguate_names(tasks: &mut [CourseTask]) {
    let mut owners: HashMap<String, HashSet<CourseId>> = HashMap::new();
    for task in tasks.iter() {
        owners
            .entry(sanitize_course_name(&task.course_name, &task.course_id))
            .or_default()
            .insert(task.course_id.clone());
    }

    for task in tasks.iter_mut() {
        let shared = owners
            .get(&sanitize_course_name(&task.course_name, &task.course_id))
            .is_some_and(|ids| ids.len() > 1);
        if shared {
            let renamed = format!("{} ({})", task.course_name, task.course_id);
            tracing::warn!(
                course_id = %task.course_id,
                course = %task.course_name,
                renamed = %renamed,
                "Course name shared with another course, archiving under a distinct name"
            );
            task.course_name = renamed;
        }
    }
}
