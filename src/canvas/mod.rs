//! Canvas LMS REST API access
//!
//! - [`CanvasClient`] — authenticated requests with rate-limit backoff and a
//!   shared admission gate
//! - [`ExportOrchestrator`] — find-or-create a content export and poll it to
//!   a download URL
//! - [`models`] — the response payloads the pipeline reads

mod client;
mod exports;
pub mod models;

pub use client::CanvasClient;
pub use exports::ExportOrchestrator;
pub use models::{ExportJob, ExportProgress, UserProfile, WorkflowState};
