use super::*;
use crate::backup::download::partial_path;
use crate::error::Error;
use std::sync::Mutex as StdMutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn downloader(server: &MockServer, output: &tempfile::TempDir) -> ArchiveDownloader {
    ArchiveDownloader::new(&pipeline_config(server, output)).unwrap()
}

#[tokio::test]
async fn download_writes_archive_and_reports_progress() {
    let server = MockServer::start().await;
    let body = vec![7u8; 64];
    Mock::given(method("GET"))
        .and(path("/files/5551.imscc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let output = tempfile::tempdir().unwrap();
    let downloader = downloader(&server, &output);
    let task = CourseTask::new("Intro to Biology", "5551");

    let reported = StdMutex::new(Vec::new());
    let archive = downloader
        .download(
            &task,
            &format!("{}/files/5551.imscc", server.uri()),
            &CancellationToken::new(),
            |p| reported.lock().unwrap().push(p),
        )
        .await
        .unwrap();

    let expected = output
        .path()
        .join("backups")
        .join("Intro to Biology")
        .join(format!("Intro to Biology_{}.zip", today().format("%Y-%m-%d")));
    assert_eq!(archive.path, expected);
    assert_eq!(archive.course_name, "Intro to Biology");
    assert_eq!(std::fs::read(&expected).unwrap(), body);
    assert!(!partial_path(&expected).exists());

    // 64 bytes in 16-byte chunks
    assert_eq!(*reported.lock().unwrap(), vec![25, 50, 75, 100]);
}

#[tokio::test]
async fn download_error_status_creates_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/gone.imscc"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let output = tempfile::tempdir().unwrap();
    let downloader = downloader(&server, &output);
    let task = CourseTask::new("Chemistry", "7");

    let err = downloader
        .download(
            &task,
            &format!("{}/files/gone.imscc?sig=abc", server.uri()),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();

    match err {
        Error::Http { status, endpoint } => {
            assert_eq!(status, 404);
            assert!(!endpoint.contains("sig="), "signature leaked: {endpoint}");
        }
        other => panic!("expected Http error, got {other:?}"),
    }
    let archive = downloader.archive_path(&task, today());
    assert!(!archive.exists());
    assert!(!partial_path(&archive).exists());
}

#[tokio::test]
async fn cancellation_stops_at_chunk_boundary_and_removes_partial() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/5551.imscc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 160]))
        .mount(&server)
        .await;

    let output = tempfile::tempdir().unwrap();
    let downloader = downloader(&server, &output);
    let task = CourseTask::new("Intro to Biology", "5551");

    let cancel = CancellationToken::new();
    let chunks = StdMutex::new(0u32);
    let err = downloader
        .download(
            &task,
            &format!("{}/files/5551.imscc", server.uri()),
            &cancel,
            |_| {
                *chunks.lock().unwrap() += 1;
                cancel.cancel();
            },
        )
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "got {err:?}");
    assert_eq!(*chunks.lock().unwrap(), 1, "must halt after the first chunk");

    let archive = downloader.archive_path(&task, today());
    assert!(!archive.exists(), "no archive after cancellation");
    assert!(!partial_path(&archive).exists(), "partial file removed");
}

/// Serve one response whose body is cut off after `sent` of `declared` bytes
async fn serve_truncated_body(declared: usize, sent: usize) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {declared}\r\nConnection: close\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&vec![9u8; sent]).await.unwrap();
        socket.flush().await.unwrap();
        // Dropping the socket ends the body early
    });

    format!("http://{addr}/files/truncated.imscc")
}

#[tokio::test]
async fn mid_stream_error_removes_partial_file() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();
    let downloader = downloader(&server, &output);
    let task = CourseTask::new("Physics", "31");

    let url = format!("{}?verifier=s3cr3t", serve_truncated_body(4096, 48).await);
    let err = downloader
        .download(&task, &url, &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_)), "got {err:?}");
    assert!(!format!("{err} {err:?}").contains("s3cr3t"), "signed URL leaked: {err:?}");
    let archive = downloader.archive_path(&task, today());
    assert!(!archive.exists());
    assert!(
        !partial_path(&archive).exists(),
        "partial file must be deleted on error"
    );
}

#[tokio::test]
async fn connection_error_does_not_leak_signed_url() {
    let server = MockServer::start().await;
    let output = tempfile::tempdir().unwrap();
    let downloader = downloader(&server, &output);
    let task = CourseTask::new("Physics", "31");

    // Nothing listens on the discard port
    let err = downloader
        .download(
            &task,
            "http://127.0.0.1:9/files/31.imscc?verifier=s3cr3t",
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Network(_)), "got {err:?}");
    assert!(!format!("{err} {err:?}").contains("s3cr3t"), "signed URL leaked: {err:?}");
}

#[tokio::test]
async fn insufficient_disk_space_fails_before_writing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/5551.imscc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 32]))
        .mount(&server)
        .await;

    let output = tempfile::tempdir().unwrap();
    let mut config = pipeline_config(&server, &output);
    config.disk_space.enabled = true;
    config.disk_space.min_free_space = u64::MAX / 2;
    let downloader = ArchiveDownloader::new(&config).unwrap();
    let task = CourseTask::new("Intro to Biology", "5551");

    let err = downloader
        .download(
            &task,
            &format!("{}/files/5551.imscc", server.uri()),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InsufficientSpace { .. }), "got {err:?}");
    assert!(!partial_path(&downloader.archive_path(&task, today())).exists());
}
