//! Common test utilities for canvas-backup integration tests
//!
//! A wiremock server stands in for both the Canvas API and the file host.

#![allow(dead_code)]

use canvas_backup::config::CanvasConfig;
use canvas_backup::{BackupCoordinator, Config, StatusUpdate};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "integration-token";

/// Config for `server` writing into `output`, with every delay shrunk
pub fn test_config(server: &MockServer, output: &TempDir) -> Config {
    let mut config = Config {
        canvas: CanvasConfig {
            base_url: server.uri(),
            api_token: Some(TOKEN.to_string()),
        },
        ..Default::default()
    };
    config.backup.output_dir = output.path().to_path_buf();
    config.backup.chunk_size = 64;
    config.api.courtesy_delay = Duration::ZERO;
    config.api.rate_limit_delay = Duration::from_millis(10);
    config.export.poll_interval = Duration::from_millis(5);
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.jitter = false;
    config.disk_space.enabled = false;
    config
}

/// Coordinator plus its output directory (which must be kept alive)
pub fn create_coordinator(server: &MockServer) -> (BackupCoordinator, TempDir) {
    let output = tempfile::tempdir().unwrap();
    let config = test_config(server, &output);
    (BackupCoordinator::new(config).unwrap(), output)
}

pub fn archive_bytes(course_id: &str) -> Vec<u8> {
    format!("imscc-{course_id};").repeat(40).into_bytes()
}

/// Mount a course whose export goes queued → running → completed
pub async fn mount_course(server: &MockServer, course_id: &str, export_id: &str) {
    let exports = format!("/api/v1/courses/{course_id}/content_exports");
    let progress = format!("/api/v1/progress/{export_id}");
    let file = format!("/files/{course_id}/download");

    Mock::given(method("GET"))
        .and(path(exports.clone()))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
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
            "progress_url": format!("{}{}", server.uri(), progress),
            "attachment": {"url": format!("{}{}?verifier=abc", server.uri(), file)}
        })))
        .mount(server)
        .await;

    for (state, completion) in [("queued", 0), ("running", 50)] {
        Mock::given(method("GET"))
            .and(path(progress.clone()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"workflow_state": state, "completion": completion})),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(progress))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"workflow_state": "completed", "completion": 100})),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(file))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive_bytes(course_id)))
        .mount(server)
        .await;
}

/// Collect status updates until `stop` matches or `timeout` elapses
pub async fn collect_updates_until<F>(
    coordinator: &BackupCoordinator,
    timeout: Duration,
    stop: F,
) -> Vec<StatusUpdate>
where
    F: Fn(&StatusUpdate) -> bool,
{
    let mut updates = coordinator.subscribe();
    let mut collected = Vec::new();

    let _ = tokio::time::timeout(timeout, async {
        while let Ok(update) = updates.recv().await {
            let should_stop = stop(&update);
            collected.push(update);
            if should_stop {
                break;
            }
        }
    })
    .await;

    collected
}
