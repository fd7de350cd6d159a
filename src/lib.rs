//! # canvas-backup
//!
//! Backs up Canvas LMS courses: for every course in a list it triggers a
//! content export, polls it until the archive is ready, downloads the
//! archive and prunes old backups.
//!
//! ## Design
//!
//! - **Explicit configuration** - a [`Config`] value is handed to constructors
//!   and validated up front; nothing is read from global state
//! - **Bounded concurrency** - a fixed worker pool for courses and a separate
//!   admission gate for API requests
//! - **Cooperative cancellation** - one shared token, checked between polls
//!   and after every downloaded chunk
//! - **Event-driven** - consumers subscribe to [`StatusUpdate`]s, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use canvas_backup::{BackupCoordinator, Config, course_import};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.canvas.base_url = "https://school.instructure.com".to_string();
//!     config.apply_env();
//!
//!     let coordinator = BackupCoordinator::new(config)?;
//!     coordinator.client().validate_token().await?;
//!
//!     // Subscribe to status updates
//!     let mut updates = coordinator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(update) = updates.recv().await {
//!             println!("{} {} {}%", update.course_name, update.status, update.progress);
//!         }
//!     });
//!
//!     let report = course_import::import_courses_from_path(Path::new("courses.csv"))?;
//!     let summary = canvas_backup::run_with_shutdown(&coordinator, report.tasks).await;
//!     println!("{} completed, {} failed", summary.completed, summary.failed);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Backup coordinator, downloader and retention
pub mod backup;
/// Canvas REST API client and export orchestration
pub mod canvas;
/// Configuration types
pub mod config;
/// Course list import
pub mod course_import;
/// Error types
pub mod error;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use backup::{ArchiveDownloader, BackupCoordinator, RetentionManager, StatusBoard};
pub use canvas::{CanvasClient, ExportOrchestrator};
pub use config::Config;
pub use error::{Error, ExportError, Result};
pub use types::{
    ArchiveFile, BackupStatus, CourseId, CourseTask, QueueSummary, StatusUpdate,
};

/// Back up `tasks`, cancelling cooperatively on a termination signal.
///
/// Runs [`BackupCoordinator::process_queue`] while listening for a signal;
/// on receipt the coordinator is cancelled, running backups stop at their
/// next checkpoint and queued ones are not started.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(
    coordinator: &BackupCoordinator,
    tasks: Vec<CourseTask>,
) -> QueueSummary {
    let listener = cancel_on_signal(coordinator);
    let summary = coordinator.process_queue(tasks).await;
    listener.abort();
    summary
}

/// Spawn a task that cancels `coordinator` when a termination signal arrives.
///
/// Abort the returned handle to stop listening.
pub fn cancel_on_signal(coordinator: &BackupCoordinator) -> tokio::task::JoinHandle<()> {
    let coordinator = coordinator.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        coordinator.cancel();
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
