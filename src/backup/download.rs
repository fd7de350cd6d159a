//! Streaming archive download with progress and cancellation

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::NaiveDate;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, DiskSpaceConfig};
use crate::error::{Error, Result};
use crate::types::{ArchiveFile, CourseTask};
use crate::utils::{PARTIAL_SUFFIX, archive_file_name, check_disk_space, sanitize_course_name};

/// Downloads finished exports into the per-course archive directories
///
/// Archives land at `{output_dir}/{name}/{name}_{YYYY-MM-DD}.zip`. The body
/// is first written to `{archive}.part` and only renamed into place once it
/// is complete, so a partial download never sits at the archive path.
#[derive(Clone, Debug)]
pub struct ArchiveDownloader {
    http: reqwest::Client,
    output_dir: PathBuf,
    chunk_size: usize,
    disk_space: DiskSpaceConfig,
}

impl ArchiveDownloader {
    /// Create a downloader with its own long-timeout HTTP client
    ///
    /// Export attachments are pre-signed URLs, so no bearer token is sent.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.api.download_timeout)
            .user_agent(concat!("canvas-backup/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            output_dir: config.backup.output_dir.clone(),
            chunk_size: config.backup.chunk_size.max(1),
            disk_space: config.disk_space.clone(),
        })
    }

    /// Directory holding every archive of the course
    pub fn course_dir(&self, task: &CourseTask) -> PathBuf {
        self.output_dir
            .join(sanitize_course_name(&task.course_name, &task.course_id))
    }

    /// Archive path for the course on `date`
    pub fn archive_path(&self, task: &CourseTask, date: NaiveDate) -> PathBuf {
        let sanitized = sanitize_course_name(&task.course_name, &task.course_id);
        self.output_dir
            .join(&sanitized)
            .join(archive_file_name(&sanitized, date))
    }

    /// Download today's archive for `task` from `url`
    pub async fn download<P>(
        &self,
        task: &CourseTask,
        url: &str,
        cancel: &CancellationToken,
        on_progress: P,
    ) -> Result<ArchiveFile>
    where
        P: Fn(u8),
    {
        self.download_on(task, url, chrono::Local::now().date_naive(), cancel, on_progress)
            .await
    }

    /// [`download`](Self::download) with an explicit archive date
    ///
    /// `on_progress` receives the percentage written after every chunk (0
    /// when the server sends no `Content-Length`). Cancellation is checked
    /// after each chunk; on cancellation or any error the partial file is
    /// removed.
    pub async fn download_on<P>(
        &self,
        task: &CourseTask,
        url: &str,
        date: NaiveDate,
        cancel: &CancellationToken,
        on_progress: P,
    ) -> Result<ArchiveFile>
    where
        P: Fn(u8),
    {
        let target = self.archive_path(task, date);
        let course_dir = self.course_dir(task);
        tokio::fs::create_dir_all(&course_dir).await?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Network(e.without_url()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                endpoint: redact_url(url),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        if let Some(total) = total {
            check_disk_space(&course_dir, total, &self.disk_space)?;
        }

        tracing::info!(
            course_id = %task.course_id,
            path = %target.display(),
            size = total,
            "Downloading course archive"
        );

        let partial = partial_path(&target);
        let written = match self
            .stream_to_file(response, &partial, total, cancel, &on_progress)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                remove_partial(&partial).await;
                if e.is_cancelled() {
                    tracing::info!(course_id = %task.course_id, "Download cancelled, partial file removed");
                } else {
                    tracing::warn!(course_id = %task.course_id, error = %e, "Download failed, partial file removed");
                }
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            remove_partial(&partial).await;
            return Err(e.into());
        }

        tracing::info!(
            course_id = %task.course_id,
            path = %target.display(),
            bytes = written,
            "Archive downloaded"
        );

        let created = tokio::fs::metadata(&target)
            .await
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .unwrap_or_else(|_| SystemTime::now());

        Ok(ArchiveFile {
            path: target,
            course_name: task.course_name.clone(),
            created,
        })
    }

    async fn stream_to_file<P>(
        &self,
        response: reqwest::Response,
        partial: &Path,
        total: Option<u64>,
        cancel: &CancellationToken,
        on_progress: &P,
    ) -> Result<u64>
    where
        P: Fn(u8),
    {
        let mut file = tokio::fs::File::create(partial).await?;
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::with_capacity(self.chunk_size);
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Network(e.without_url()))?;
            buffer.extend_from_slice(&chunk);
            if buffer.len() < self.chunk_size {
                continue;
            }

            file.write_all(&buffer).await?;
            written += buffer.len() as u64;
            buffer.clear();

            on_progress(percent(written, total));
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        if !buffer.is_empty() {
            file.write_all(&buffer).await?;
            written += buffer.len() as u64;
            on_progress(percent(written, total));
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// `{target}.part`
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn remove_partial(partial: &Path) {
    match tokio::fs::remove_file(partial).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %partial.display(), error = %e, "Failed to remove partial download");
        }
    }
}

fn percent(written: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => (written.saturating_mul(100) / total).min(100) as u8,
        _ => 0,
    }
}

/// Drop the query string so pre-signed credentials stay out of logs and errors
fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => raw.split('?').next().unwrap_or(raw).to_string(),
    }
}
