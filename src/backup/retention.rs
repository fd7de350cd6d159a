//! Per-course archive retention

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::Result;
use crate::types::{ArchiveFile, CourseId};
use crate::utils::{is_course_archive, sanitize_course_name};

/// Keeps only the most recent archives of each course
#[derive(Clone, Debug)]
pub struct RetentionManager {
    output_dir: PathBuf,
    retention_count: usize,
}

impl RetentionManager {
    /// Keep `retention_count` archives per course under `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>, retention_count: usize) -> Self {
        Self {
            output_dir: output_dir.into(),
            retention_count,
        }
    }

    /// Archives of a course, oldest first
    ///
    /// Ordered by creation time (modification time where the filesystem has
    /// no birth time), then by file name. A missing directory yields nothing.
    pub async fn list_archives(
        &self,
        course_name: &str,
        course_id: &CourseId,
    ) -> Result<Vec<ArchiveFile>> {
        let sanitized = sanitize_course_name(course_name, course_id);
        let dir = self.output_dir.join(&sanitized);

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut archives = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !is_course_archive(&sanitized, file_name) {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            archives.push(ArchiveFile {
                path: entry.path(),
                course_name: course_name.to_string(),
                created,
            });
        }

        archives.sort_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
        });
        Ok(archives)
    }

    /// Delete the oldest archives until at most `retention_count` remain
    ///
    /// Returns the deleted paths. Deletion is permanent.
    pub async fn prune(&self, course_name: &str, course_id: &CourseId) -> Result<Vec<PathBuf>> {
        let archives = self.list_archives(course_name, course_id).await?;
        if archives.len() <= self.retention_count {
            return Ok(Vec::new());
        }

        let excess = archives.len() - self.retention_count;
        let mut deleted = Vec::with_capacity(excess);
        for archive in archives.into_iter().take(excess) {
            delete_archive(&archive.path, course_id).await?;
            deleted.push(archive.path);
        }

        Ok(deleted)
    }
}

async fn delete_archive(path: &Path, course_id: &CourseId) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            tracing::info!(course_id = %course_id, path = %path.display(), "Deleted old backup");
            Ok(())
        }
        // Already gone (another run pruned it); nothing to do
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::error!(
                course_id = %course_id,
                path = %path.display(),
                error = %e,
                "Failed to delete old backup"
            );
            Err(e.into())
        }
    }
}
