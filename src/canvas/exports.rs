//! Content export lifecycle: find-or-create, then poll to a download URL

use chrono::NaiveDate;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::types::CourseId;

use super::client::CanvasClient;
use super::models::{ExportJob, ExportList, ExportProgress, WorkflowState};

/// Page size requested when listing a course's exports
const EXPORT_LIST_PAGE_SIZE: &str = "100";

/// Drives one course's content export from trigger to download URL
#[derive(Clone, Debug)]
pub struct ExportOrchestrator {
    client: CanvasClient,
    config: ExportConfig,
}

impl ExportOrchestrator {
    /// Create an orchestrator issuing requests through `client`
    pub fn new(client: CanvasClient, config: ExportConfig) -> Self {
        Self { client, config }
    }

    /// The API client used for export requests
    pub fn client(&self) -> &CanvasClient {
        &self.client
    }

    /// Find today's export for the course or create a new one
    ///
    /// Returns the export ID. At most one export is created per course per
    /// local calendar day. Only the first page of exports is searched, which
    /// relies on Canvas listing the newest exports first; an export from today
    /// beyond the first `per_page=100` entries is not found.
    pub async fn trigger_export(&self, course_id: &CourseId) -> Result<String> {
        self.trigger_export_on(course_id, chrono::Local::now().date_naive())
            .await
    }

    /// [`trigger_export`](Self::trigger_export) with an explicit calendar date
    pub async fn trigger_export_on(&self, course_id: &CourseId, date: NaiveDate) -> Result<String> {
        let endpoint = exports_endpoint(course_id);
        let day = date.format("%Y-%m-%d").to_string();

        let existing: ExportList = self
            .client
            .get_json_with(&endpoint, &[("per_page", EXPORT_LIST_PAGE_SIZE)])
            .await?;

        let reusable = existing
            .into_jobs()
            .into_iter()
            .filter(|job| job.created_on(&day))
            .find_map(|job| job.id);
        if let Some(export_id) = reusable {
            tracing::info!(
                course_id = %course_id,
                export_id = %export_id,
                "Reusing export created today"
            );
            return Ok(export_id);
        }

        let created: ExportJob = self
            .client
            .post_json(&endpoint, &json!({ "export_type": self.config.export_type }))
            .await?;

        let export_id = created.id.ok_or_else(|| ExportError::MissingId {
            course_id: course_id.to_string(),
        })?;

        tracing::info!(
            course_id = %course_id,
            export_id = %export_id,
            export_type = %self.config.export_type,
            "Created content export"
        );
        Ok(export_id)
    }

    /// Poll an export until its archive is downloadable
    ///
    /// `on_progress` receives the server's completion percentage after every
    /// progress check. Returns `Ok(None)` if `cancel` fires or the polling
    /// budget (`max_poll_attempts`) runs out. A server-side failure is an
    /// error since the export will not recover.
    pub async fn poll_export<P>(
        &self,
        course_id: &CourseId,
        export_id: &str,
        cancel: &CancellationToken,
        on_progress: P,
    ) -> Result<Option<String>>
    where
        P: Fn(u8),
    {
        let export_endpoint = export_endpoint(course_id, export_id);

        let export: ExportJob = self.client.get_json(&export_endpoint).await?;
        let progress_url = export
            .progress_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ExportError::MissingProgressUrl {
                course_id: course_id.to_string(),
                export_id: export_id.to_string(),
            })?;
        let progress_endpoint = self.client.strip_base_url(&progress_url).to_string();

        for attempt in 1..=self.config.max_poll_attempts {
            if cancel.is_cancelled() {
                tracing::info!(course_id = %course_id, export_id, "Export polling cancelled");
                return Ok(None);
            }

            let progress: ExportProgress = self.client.get_json(&progress_endpoint).await?;
            on_progress(progress.percent());

            match progress.workflow_state {
                Some(WorkflowState::Completed) => {
                    let finished: ExportJob = self.client.get_json(&export_endpoint).await?;
                    if let Some(url) = finished.attachment_url() {
                        tracing::debug!(course_id = %course_id, export_id, attempt, "Export ready");
                        return Ok(Some(url.to_string()));
                    }
                    tracing::debug!(
                        course_id = %course_id,
                        export_id,
                        "Export completed but attachment not available yet"
                    );
                }
                Some(WorkflowState::Failed) => {
                    return Err(ExportError::Failed {
                        course_id: course_id.to_string(),
                        export_id: export_id.to_string(),
                    }
                    .into());
                }
                _ => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(course_id = %course_id, export_id, "Export polling cancelled");
                    return Ok(None);
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::error!(
            course_id = %course_id,
            export_id,
            attempts = self.config.max_poll_attempts,
            "Timed out waiting for export"
        );
        Ok(None)
    }
}

fn exports_endpoint(course_id: &CourseId) -> String {
    format!("/api/v1/courses/{}/content_exports", course_id)
}

fn export_endpoint(course_id: &CourseId, export_id: &str) -> String {
    format!("/api/v1/courses/{}/content_exports/{}", course_id, export_id)
}
