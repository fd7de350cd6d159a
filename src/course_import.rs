//! Course list import from CSV
//!
//! The file's header must start with `Course Name` and `Course URL` (or
//! `Course Link`), matched case-insensitively. Every data row needs a course
//! name and an absolute http(s) course URL containing `/courses/<digits>`.
//! Bad rows and repeated course IDs are reported and skipped; only a bad
//! header or an unreadable file fails the import.
//!
//! ```
//! use canvas_backup::course_import::import_courses;
//!
//! let csv = "Course Name,Course URL\n\
//!            Intro to Biology,https://school.instructure.com/courses/5551\n";
//! let report = import_courses(csv.as_bytes()).unwrap();
//! assert_eq!(report.tasks[0].course_id.as_str(), "5551");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::types::{CourseId, CourseTask};

#[allow(clippy::expect_used)]
static COURSE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/courses/(\d+)(?:/|$)").expect("valid course id regex"));

const NAME_HEADER: &str = "course name";
const URL_HEADERS: &[&str] = &["course url", "course link"];

/// Outcome of importing a course list
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// One pending task per valid, unique course, in file order
    pub tasks: Vec<CourseTask>,
    /// Rows that were skipped as invalid
    pub invalid: Vec<InvalidRow>,
    /// Rows that were skipped because their course ID appeared earlier
    pub duplicates: Vec<DuplicateRow>,
}

impl ImportReport {
    /// Whether any row was skipped
    pub fn has_skipped_rows(&self) -> bool {
        !self.invalid.is_empty() || !self.duplicates.is_empty()
    }
}

/// A skipped row and why
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidRow {
    /// 1-based line number in the file (the header is line 1)
    pub line: u64,
    /// What was wrong with the row
    pub reason: InvalidReason,
}

/// Why a row was skipped
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidReason {
    /// Fewer than two columns
    MissingColumns,
    /// The course name is blank
    EmptyName,
    /// The URL is not an absolute http(s) URL
    InvalidUrl(String),
    /// The URL does not contain `/courses/<digits>`
    NoCourseId(String),
    /// A field is not valid UTF-8
    Encoding,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::MissingColumns => f.write_str("expected a course name and a course URL"),
            InvalidReason::EmptyName => f.write_str("course name is empty"),
            InvalidReason::InvalidUrl(url) => write!(f, "'{}' is not an absolute http(s) URL", url),
            InvalidReason::NoCourseId(url) => {
                write!(f, "'{}' does not contain /courses/<id>", url)
            }
            InvalidReason::Encoding => f.write_str("row is not valid UTF-8 (save the list as UTF-8)"),
        }
    }
}

/// A row repeating an earlier course ID
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DuplicateRow {
    /// 1-based line number of the duplicate
    pub line: u64,
    /// Course name given on the duplicate row
    pub course_name: String,
    /// The repeated course ID
    pub course_id: CourseId,
    /// Line of the first occurrence, which is kept
    pub first_line: u64,
}

/// Extract the course ID from an absolute Canvas course URL
///
/// ```
/// use canvas_backup::course_import::extract_course_id;
///
/// let id = extract_course_id("https://school.instructure.com/courses/5551/modules");
/// assert_eq!(id.unwrap().as_str(), "5551");
/// assert!(extract_course_id("https://school.instructure.com/courses/abc").is_none());
/// assert!(extract_course_id("/courses/5551").is_none());
/// ```
pub fn extract_course_id(raw: &str) -> Option<CourseId> {
    parse_course_url(raw).ok()
}

fn parse_course_url(raw: &str) -> std::result::Result<CourseId, InvalidReason> {
    let parsed = url::Url::parse(raw).map_err(|_| InvalidReason::InvalidUrl(raw.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(InvalidReason::InvalidUrl(raw.to_string()));
    }
    COURSE_ID_RE
        .captures(parsed.path())
        .and_then(|caps| caps.get(1))
        .map(|id| CourseId::new(id.as_str()))
        .ok_or_else(|| InvalidReason::NoCourseId(raw.to_string()))
}

/// Import a course list from a CSV file
pub fn import_courses_from_path(path: &Path) -> Result<ImportReport> {
    let file = std::fs::File::open(path)?;
    let report = import_courses(file)?;
    tracing::info!(
        path = %path.display(),
        courses = report.tasks.len(),
        invalid = report.invalid.len(),
        duplicates = report.duplicates.len(),
        "Imported course list"
    );
    Ok(report)
}

/// Import a course list from CSV text
pub fn import_courses<R: std::io::Read>(reader: R) -> Result<ImportReport> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = csv_reader.byte_records();
    let header = match records.next() {
        Some(header) => header.map_err(csv_error)?,
        None => return Err(Error::Csv("the file is empty".to_string())),
    };
    let header = csv::StringRecord::from_byte_record(header)
        .map_err(|e| Error::Csv(format!("line 1: header is not valid UTF-8: {}", e)))?;
    check_header(&header)?;

    let mut report = ImportReport::default();
    let mut first_seen: HashMap<CourseId, u64> = HashMap::new();

    for record in records {
        let record = record.map_err(csv_error)?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let Ok(record) = csv::StringRecord::from_byte_record(record) else {
            reject(&mut report, line, InvalidReason::Encoding);
            continue;
        };

        let (name, url) = match (record.get(0), record.get(1)) {
            (Some(name), Some(url)) => (name, url),
            _ => {
                reject(&mut report, line, InvalidReason::MissingColumns);
                continue;
            }
        };
        if name.is_empty() {
            reject(&mut report, line, InvalidReason::EmptyName);
            continue;
        }
        let course_id = match parse_course_url(url) {
            Ok(id) => id,
            Err(reason) => {
                reject(&mut report, line, reason);
                continue;
            }
        };

        if let Some(&first_line) = first_seen.get(&course_id) {
            tracing::warn!(line, course_id = %course_id, first_line, "Skipping duplicate course");
            report.duplicates.push(DuplicateRow {
                line,
                course_name: name.to_string(),
                course_id,
                first_line,
            });
            continue;
        }

        first_seen.insert(course_id.clone(), line);
        report.tasks.push(CourseTask::new(name, course_id));
    }

    Ok(report)
}

fn check_header(header: &csv::StringRecord) -> Result<()> {
    let column = |i: usize| {
        header
            .get(i)
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
    };

    let name_ok = column(0).is_some_and(|h| h == NAME_HEADER);
    let url_ok = column(1).is_some_and(|h| URL_HEADERS.contains(&h.as_str()));
    if name_ok && url_ok {
        return Ok(());
    }

    Err(Error::Csv(format!(
        "expected the first two columns to be 'Course Name' and 'Course URL', found {:?}",
        header.iter().take(2).collect::<Vec<_>>()
    )))
}

fn reject(report: &mut ImportReport, line: u64, reason: InvalidReason) {
    tracing::warn!(line, reason = %reason, "Skipping invalid course row");
    report.invalid.push(InvalidRow { line, reason });
}

fn csv_error(e: csv::Error) -> Error {
    match e.position() {
        Some(pos) => Error::Csv(format!("line {}: {}", pos.line(), e)),
        None => Error::Csv(e.to_string()),
    }
}
