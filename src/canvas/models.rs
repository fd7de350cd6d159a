//! Canvas REST API payloads used by the backup pipeline.
//!
//! Only the fields the pipeline reads are modelled; everything else in the
//! server's responses is ignored.

use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle stage of a content export or its progress object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Accepted, not started
    Queued,
    /// Being processed
    Running,
    /// Export-specific intermediate state
    Exporting,
    /// Finished; the attachment is (or will shortly be) available
    Completed,
    /// The server gave up on the export
    Failed,
    /// Any state this client does not know about
    #[serde(other)]
    Unknown,
}

/// A content export job (`/api/v1/courses/:id/content_exports/:export_id`)
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExportJob {
    /// Export ID (Canvas sends a number; strings are accepted too)
    #[serde(default, deserialize_with = "optional_id")]
    pub id: Option<String>,
    /// ISO-8601 creation timestamp
    #[serde(default)]
    pub created_at: Option<String>,
    /// Export lifecycle stage
    #[serde(default)]
    pub workflow_state: Option<WorkflowState>,
    /// URL of the progress object tracking this export
    #[serde(default)]
    pub progress_url: Option<String>,
    /// The archive, once the export has completed
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

impl ExportJob {
    /// Whether the export was created on `date` (`YYYY-MM-DD` prefix match)
    pub fn created_on(&self, date: &str) -> bool {
        self.created_at
            .as_deref()
            .is_some_and(|created| created.starts_with(date))
    }

    /// Download URL of the finished archive, if attached
    pub fn attachment_url(&self) -> Option<&str> {
        self.attachment
            .as_ref()
            .and_then(|a| a.url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

/// File attached to a completed export
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Attachment {
    /// Pre-signed download URL
    #[serde(default)]
    pub url: Option<String>,
}

/// Listing of a course's exports
///
/// Canvas returns a bare array; some proxies wrap it in `{"content_exports": [...]}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ExportList {
    /// Bare array
    Plain(Vec<ExportJob>),
    /// Wrapped array
    Wrapped {
        /// The exports
        #[serde(default)]
        content_exports: Vec<ExportJob>,
    },
}

impl ExportList {
    /// The listed exports
    pub fn into_jobs(self) -> Vec<ExportJob> {
        match self {
            ExportList::Plain(jobs) => jobs,
            ExportList::Wrapped { content_exports } => content_exports,
        }
    }
}

/// Progress object polled while an export runs (`/api/v1/progress/:id`)
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExportProgress {
    /// Progress lifecycle stage
    #[serde(default)]
    pub workflow_state: Option<WorkflowState>,
    /// Completion percentage (0.0-100.0, may be null)
    #[serde(default)]
    pub completion: Option<f64>,
}

impl ExportProgress {
    /// Completion as a whole percentage clamped to 0-100
    pub fn percent(&self) -> u8 {
        match self.completion {
            Some(c) if c.is_finite() => c.clamp(0.0, 100.0) as u8,
            _ => 0,
        }
    }
}

/// The authenticated user (`/api/v1/users/self`)
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserProfile {
    /// Canvas user ID
    #[serde(default, deserialize_with = "optional_id")]
    pub id: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Email, when the token may read it
    #[serde(default)]
    pub email: Option<String>,
    /// Primary email (older Canvas versions)
    #[serde(default)]
    pub primary_email: Option<String>,
}

impl UserProfile {
    /// Best available email address
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().or(self.primary_email.as_deref())
    }
}

/// Accept a JSON number, string or null as an optional ID
fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    use serde_json::Value;

    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected an id number or string, got {other}"
        ))),
    }
}
