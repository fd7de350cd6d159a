//! Utility functions for archive naming, path sanitizing and disk space

use crate::config::DiskSpaceConfig;
use crate::error::{Error, Result};
use crate::types::CourseId;
use chrono::NaiveDate;
use std::path::Path;

/// Extension of course archives produced by Canvas exports
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Suffix of in-progress downloads
pub const PARTIAL_SUFFIX: &str = "part";

/// Make a course name safe to use as a directory and file name
///
/// Replaces path separators, characters reserved on Windows and control
/// characters with `_`, trims surrounding whitespace and trailing dots.
/// Names that end up empty become `course_{id}`.
///
/// # Examples
///
/// ```
/// use canvas_backup::types::CourseId;
/// use canvas_backup::utils::sanitize_course_name;
///
/// let id = CourseId::new("5551");
/// assert_eq!(sanitize_course_name("Intro to Biology", &id), "Intro to Biology");
/// assert_eq!(sanitize_course_name("BIO 101: Cells/Tissues", &id), "BIO 101_ Cells_Tissues");
/// assert_eq!(sanitize_course_name("  ...  ", &id), "course_5551");
/// ```
#[must_use]
pub fn sanitize_course_name(name: &str, course_id: &CourseId) -> String {
    const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    let replaced: String = name
        .chars()
        .map(|c| {
            if RESERVED.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let cleaned = replaced.trim().trim_end_matches('.').trim_end();
    if cleaned.is_empty() {
        format!("course_{}", course_id)
    } else {
        cleaned.to_string()
    }
}

/// File name of the archive for a course on a given day
///
/// ```
/// use canvas_backup::utils::archive_file_name;
/// use chrono::NaiveDate;
///
/// let date = NaiveDate::from_ymd_opt(2024, 9, 3).unwrap();
/// assert_eq!(archive_file_name("Intro to Biology", date), "Intro to Biology_2024-09-03.zip");
/// ```
#[must_use]
pub fn archive_file_name(sanitized_name: &str, date: NaiveDate) -> String {
    format!(
        "{}_{}.{}",
        sanitized_name,
        date.format("%Y-%m-%d"),
        ARCHIVE_EXTENSION
    )
}

/// Whether `file_name` is a finished archive of the course `sanitized_name`
///
/// Matches `{sanitized_name}_*.zip`; partial downloads never match.
#[must_use]
pub fn is_course_archive(sanitized_name: &str, file_name: &str) -> bool {
    let Some(rest) = file_name.strip_prefix(sanitized_name) else {
        return false;
    };
    let Some(rest) = rest.strip_prefix('_') else {
        return false;
    };
    match rest.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION),
        None => false,
    }
}

/// Verify that `path` has room for `size_bytes` plus the configured free-space buffer
///
/// The nearest existing ancestor of `path` is checked, so the course
/// directory does not have to exist yet.
pub fn check_disk_space(path: &Path, size_bytes: u64, config: &DiskSpaceConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let required = size_bytes.saturating_add(config.min_free_space);

    let check_path = path.ancestors().find(|p| p.exists()).ok_or_else(|| {
        Error::DiskSpaceCheckFailed(format!(
            "no existing ancestor directory for '{}'",
            path.display()
        ))
    })?;

    let available = get_available_space(check_path).map_err(|e| {
        Error::DiskSpaceCheckFailed(format!(
            "Failed to check disk space for '{}': {}",
            check_path.display(),
            e
        ))
    })?;

    if available < required {
        return Err(Error::InsufficientSpace {
            required,
            available,
        });
    }

    Ok(())
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux/macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zero-initialised
        // and only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail: blocks available to unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and every out-pointer refers to a
        // live, aligned u64 that is only read after a successful call.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id() -> CourseId {
        CourseId::new("42")
    }

    #[test]
    fn sanitize_keeps_ordinary_names() {
        assert_eq!(sanitize_course_name("Intro to Biology", &id()), "Intro to Biology");
        assert_eq!(sanitize_course_name("Álgebra – Sección 2", &id()), "Álgebra – Sección 2");
    }

    #[test]
    fn sanitize_replaces_reserved_and_control_characters() {
        assert_eq!(
            sanitize_course_name("a<b>c:d\"e/f\\g|h?i*j", &id()),
            "a_b_c_d_e_f_g_h_i_j"
        );
        assert_eq!(sanitize_course_name("tab\there", &id()), "tab_here");
    }

    #[test]
    fn sanitize_trims_whitespace_and_trailing_dots() {
        assert_eq!(sanitize_course_name("  History 1.  ", &id()), "History 1");
        assert_eq!(sanitize_course_name("Notes...", &id()), "Notes");
    }

    #[test]
    fn sanitize_falls_back_to_course_id() {
        assert_eq!(sanitize_course_name("", &id()), "course_42");
        assert_eq!(sanitize_course_name(" . ", &id()), "course_42");
    }

    #[test]
    fn archive_matching_requires_prefix_separator_and_zip() {
        assert!(is_course_archive("Bio", "Bio_2024-09-03.zip"));
        assert!(is_course_archive("Bio", "Bio_2024-09-03.ZIP"));
        assert!(!is_course_archive("Bio", "Bio_2024-09-03.zip.part"));
        assert!(!is_course_archive("Bio", "Biology_2024-09-03.zip"));
        assert!(!is_course_archive("Bio", "Bio2024.zip"));
        assert!(!is_course_archive("Bio", "Bio_.zip"));
        assert!(!is_course_archive("Bio", "notes.txt"));
    }

    #[test]
    fn get_available_space_reports_for_temp_dir() {
        let temp_dir = TempDir::new().unwrap();
        let space = get_available_space(temp_dir.path());
        assert!(space.is_ok(), "statvfs on a temp dir should succeed");
    }

    #[test]
    fn check_disk_space_disabled_always_passes() {
        let config = DiskSpaceConfig {
            enabled: false,
            min_free_space: u64::MAX,
        };
        check_disk_space(Path::new("/definitely/not/here"), u64::MAX, &config).unwrap();
    }

    #[test]
    fn check_disk_space_uses_nearest_existing_ancestor() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("course").join("nested");
        let config = DiskSpaceConfig {
            enabled: true,
            min_free_space: 0,
        };
        check_disk_space(&missing, 1, &config).expect("one byte should fit");
    }

    #[test]
    fn check_disk_space_reports_insufficient_space() {
        let temp_dir = TempDir::new().unwrap();
        let config = DiskSpaceConfig {
            enabled: true,
            min_free_space: u64::MAX / 2,
        };
        match check_disk_space(temp_dir.path(), u64::MAX / 2, &config) {
            Err(Error::InsufficientSpace { required, .. }) => {
                assert_eq!(required, u64::MAX - 1);
            }
            other => panic!("expected InsufficientSpace, got {other:?}"),
        }
    }
}
