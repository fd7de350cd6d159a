//! Shared test helpers for running the backup pipeline against wiremock

use super::BackupCoordinator;
use crate::canvas::test_support::test_config;
use crate::config::Config;
use serde_json::json;
use tempfile::{TempDir, tempdir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config for `server` writing archives into `output` with fast timings
pub(crate) fn pipeline_config(server: &MockServer, output: &TempDir) -> Config {
    let mut config = test_config(&server.uri());
    config.backup.output_dir = output.path().join("backups");
    config.backup.chunk_size = 16;
    config.disk_space.enabled = false;
    config
}

/// Create a coordinator for `server` with a fresh output directory.
/// Returns the coordinator and the tempdir (which must be kept alive).
pub(crate) fn create_test_coordinator(server: &MockServer) -> (BackupCoordinator, TempDir) {
    let output = tempdir().unwrap();
    let config = pipeline_config(server, &output);
    (BackupCoordinator::new(config).unwrap(), output)
}

/// Archive body served for `course_id`
pub(crate) fn archive_body(course_id: &str) -> Vec<u8> {
    format!("PK-archive-of-course-{course_id}-")
        .repeat(4)
        .into_bytes()
}

/// Mount a complete export for `course_id`: no prior exports, a new export
/// `export_id` that is already completed, and its archive under `/files/`
pub(crate) async fn mount_course_export(server: &MockServer, course_id: &str, export_id: &str) {
    mount_export_api(server, course_id, export_id).await;
    Mock::given(method("GET"))
        .and(path(format!("/files/{course_id}.imscc")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive_body(course_id)))
        .mount(server)
        .await;
}

/// Mount the API side of an export (list, create, export, progress) without the file
pub(crate) async fn mount_export_api(server: &MockServer, course_id: &str, export_id: &str) {
    let exports = format!("/api/v1/courses/{course_id}/content_exports");
    let progress = format!("/api/v1/progress/{export_id}");

    Mock::given(method("GET"))
        .and(path(exports.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(exports.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": export_id})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{exports}/{export_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": export_id,
            "workflow_state": "exporting",
            "progress_url": format!("{}{}", server.uri(), progress),
            "attachment": {"url": format!("{}/files/{course_id}.imscc", server.uri())}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(progress))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"workflow_state": "completed", "completion": 100})),
        )
        .mount(server)
        .await;
}
