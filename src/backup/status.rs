//! Course status table and the status event channel

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::types::{BackupStatus, CourseId, CourseTask, StatusUpdate};

/// Buffered events per subscriber before slow receivers start lagging
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Shared course status table, keyed by course ID
pub type StatusTable = Arc<RwLock<HashMap<CourseId, CourseTask>>>;

/// Records every status transition and fans it out to subscribers
///
/// The table and the event stream always agree: an update is written to the
/// table before it is broadcast.
#[derive(Clone, Debug)]
pub struct StatusBoard {
    table: StatusTable,
    event_tx: broadcast::Sender<StatusUpdate>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    /// Create an empty board
    pub fn new() -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            table: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Subscribe to status updates
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.event_tx.subscribe()
    }

    /// The shared status table
    pub fn table(&self) -> StatusTable {
        self.table.clone()
    }

    /// Copy of every tracked task, ordered by course name then ID
    pub fn snapshot(&self) -> Vec<CourseTask> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let mut tasks: Vec<CourseTask> = table.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.course_name
                .cmp(&b.course_name)
                .then_with(|| a.course_id.cmp(&b.course_id))
        });
        tasks
    }

    /// Current state of one course
    pub fn get(&self, course_id: &CourseId) -> Option<CourseTask> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        table.get(course_id).cloned()
    }

    /// Tasks whose status is `Failed` or `Stopped`
    pub fn retryable(&self) -> Vec<CourseTask> {
        self.snapshot()
            .into_iter()
            .filter(|task| task.status.is_retryable())
            .collect()
    }

    /// Record a transition for `task` and broadcast it
    pub fn report(&self, task: &CourseTask, status: BackupStatus, progress: u8) {
        let update = StatusUpdate::for_task(task, status, progress);

        {
            let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
            let entry = table
                .entry(task.course_id.clone())
                .or_insert_with(|| task.clone());
            entry.course_name.clone_from(&update.course_name);
            entry.status = update.status;
            entry.progress = update.progress;
        }

        tracing::debug!(
            course_id = %update.course_id,
            status = %update.status,
            progress = update.progress,
            "Course status changed"
        );

        // send() returns Err if there are no receivers, which is fine
        self.event_tx.send(update).ok();
    }
}
