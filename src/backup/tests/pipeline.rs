use super::*;
use serde_json::json;

#[tokio::test]
async fn run_backup_completes_and_emits_transitions_in_order() {
    let server = MockServer::start().await;
    mount_course_export(&server, "5551", "900").await;

    let (coordinator, output) = create_test_coordinator(&server);
    let mut rx = coordinator.subscribe();
    let task = CourseTask::new("Intro to Biology", "5551");

    assert!(coordinator.run_backup(&task).await);

    let archive = output
        .path()
        .join("backups")
        .join("Intro to Biology")
        .join(format!("Intro to Biology_{}.zip", today().format("%Y-%m-%d")));
    assert_eq!(std::fs::read(&archive).unwrap(), archive_body("5551"));

    let updates = drain(&mut rx);
    let first = updates.first().unwrap();
    assert_eq!((first.status, first.progress), (BackupStatus::BackingUp, 0));
    let last = updates.last().unwrap();
    assert_eq!((last.status, last.progress), (BackupStatus::Completed, 100));

    let downloading_at = updates
        .iter()
        .position(|u| u.status == BackupStatus::Downloading)
        .expect("a Downloading update");
    assert_eq!(updates[downloading_at].progress, 0);
    assert!(
        updates[..downloading_at]
            .iter()
            .all(|u| u.status == BackupStatus::BackingUp),
        "export must finish before the download starts"
    );

    let stored = coordinator.task(&task.course_id).unwrap();
    assert_eq!(stored.status, BackupStatus::Completed);
    assert_eq!(stored.progress, 100);
}

#[tokio::test]
async fn run_backup_reports_failure_instead_of_returning_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses/404/content_exports"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let (coordinator, _output) = create_test_coordinator(&server);
    let mut rx = coordinator.subscribe();
    let task = CourseTask::new("Restricted Course", "404");

    assert!(!coordinator.run_backup(&task).await);

    let last = drain(&mut rx).pop().unwrap();
    assert_eq!((last.status, last.progress), (BackupStatus::Failed, 0));
    assert_eq!(
        coordinator.task(&task.course_id).unwrap().status,
        BackupStatus::Failed
    );
}

#[tokio::test]
async fn export_that_never_completes_fails_the_backup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses/12/content_exports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/courses/12/content_exports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 3})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses/12/content_exports/3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 3, "progress_url": "/api/v1/progress/3"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/progress/3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"workflow_state": "running", "completion": 5})),
        )
        .mount(&server)
        .await;

    let output = tempfile::tempdir().unwrap();
    let mut config = pipeline_config(&server, &output);
    config.export.max_poll_attempts = 3;
    let coordinator = BackupCoordinator::new(config).unwrap();
    let task = CourseTask::new("Slow Export", "12");

    assert!(!coordinator.run_backup(&task).await);
    assert_eq!(
        coordinator.task(&task.course_id).unwrap().status,
        BackupStatus::Failed
    );
}

#[tokio::test]
async fn cancelled_before_start_is_stopped_without_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let (coordinator, _output) = create_test_coordinator(&server);
    coordinator.cancel();
    let task = CourseTask::new("Intro to Biology", "5551");

    assert!(!coordinator.run_backup(&task).await);
    assert_eq!(
        coordinator.task(&task.course_id).unwrap().status,
        BackupStatus::Stopped
    );
}

#[tokio::test]
async fn run_backup_applies_retention() {
    let server = MockServer::start().await;
    mount_course_export(&server, "5551", "900").await;

    let (coordinator, output) = create_test_coordinator(&server);
    let course_dir = output.path().join("backups").join("Bio");
    std::fs::create_dir_all(&course_dir).unwrap();
    for day in 1..=10 {
        std::fs::write(course_dir.join(format!("Bio_2000-01-{day:02}.zip")), b"old").unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
    }

    assert!(coordinator.run_backup(&CourseTask::new("Bio", "5551")).await);

    let mut names: Vec<String> = std::fs::read_dir(&course_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 10);
    assert!(!names.contains(&"Bio_2000-01-01.zip".to_string()));
    assert!(names.contains(&format!("Bio_{}.zip", today().format("%Y-%m-%d"))));
}

#[tokio::test]
async fn rerunning_a_backup_reuses_the_same_day_export() {
    let server = MockServer::start().await;
    let created_at = chrono::Local::now().to_rfc3339();
    Mock::given(method("GET"))
        .and(path("/api/v1/courses/5551/content_exports"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"id": 900, "created_at": created_at}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/courses/5551/content_exports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 901})))
        .expect(0)
        .mount(&server)
        .await;
    mount_course_export(&server, "5551", "900").await;

    let (coordinator, _output) = create_test_coordinator(&server);
    let task = CourseTask::new("Intro to Biology", "5551");

    assert!(coordinator.run_backup(&task).await);
    assert!(coordinator.run_backup(&task).await, "second run must succeed too");
}

#[test]
fn reset_cancellation_installs_fresh_token() {
    let server_uri = "http://127.0.0.1:9";
    let config = crate::canvas::test_support::test_config(server_uri);
    let coordinator = BackupCoordinator::new(config).unwrap();

    let old = coordinator.cancellation_token();
    coordinator.cancel();
    assert!(old.is_cancelled());

    coordinator.reset_cancellation();
    assert!(!coordinator.cancellation_token().is_cancelled());
    assert!(old.is_cancelled(), "the old token stays cancelled");
}
