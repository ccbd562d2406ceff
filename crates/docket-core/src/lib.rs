use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use time::{Date, Month, OffsetDateTime, UtcOffset};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum IndexError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// One object as reported by the object store listing. Keys ending in `/`
/// denote folder placeholders and never produce manifest records.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
}

/// Provenance of a record's best date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    Filename,
    StorageTimestamp,
    Unknown,
}

impl DateSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::StorageTimestamp => "storage_timestamp",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "filename" => Some(Self::Filename),
            "storage_timestamp" => Some(Self::StorageTimestamp),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Three-way result of the best-date derivation. Keeping the date and its
/// provenance in one tag makes the `date_source`/`best_date_utc` pairing
/// consistent by construction.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BestDate {
    FromFilename(Date),
    FromTimestamp(OffsetDateTime),
    Unavailable,
}

impl BestDate {
    #[must_use]
    pub fn source(&self) -> DateSource {
        match self {
            Self::FromFilename(_) => DateSource::Filename,
            Self::FromTimestamp(_) => DateSource::StorageTimestamp,
            Self::Unavailable => DateSource::Unknown,
        }
    }

    /// Second-precision `YYYY-MM-DDThh:mm:ssZ` string, or empty when
    /// unavailable. At fixed precision, lexicographic order over these
    /// strings equals chronological order, and the empty string sorts first.
    #[must_use]
    pub fn format_utc(&self) -> String {
        match self {
            Self::FromFilename(date) => format!(
                "{:04}-{:02}-{:02}T00:00:00Z",
                date.year(),
                u8::from(date.month()),
                date.day()
            ),
            Self::FromTimestamp(timestamp) => format_timestamp_utc(*timestamp),
            Self::Unavailable => String::new(),
        }
    }
}

/// Formats a timestamp as UTC with whole-second precision.
#[must_use]
pub fn format_timestamp_utc(timestamp: OffsetDateTime) -> String {
    let utc = timestamp.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        utc.year(),
        u8::from(utc.month()),
        utc.day(),
        utc.hour(),
        utc.minute(),
        utc.second()
    )
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum FieldOrder {
    YearFirst,
    MonthFirst,
}

/// Ordered pattern table. Priority is positional: the first pattern with a
/// textual match decides the outcome for the whole filename.
const PATTERN_TABLE: &[(FieldOrder, &str)] = &[
    // 2026-02-08 or 2026_02_08
    (FieldOrder::YearFirst, r"(20\d{2})[-_](\d{2})[-_](\d{2})"),
    // 02-08-2026 or 02_08_2026
    (FieldOrder::MonthFirst, r"(\d{2})[-_](\d{2})[-_](20\d{2})"),
];

#[derive(Debug)]
struct DatePattern {
    regex: Regex,
    order: FieldOrder,
}

/// Derives calendar dates from filenames using the ordered pattern table.
#[derive(Debug)]
pub struct DateExtractor {
    patterns: Vec<DatePattern>,
}

impl DateExtractor {
    #[must_use]
    pub fn new() -> Self {
        let patterns: Vec<DatePattern> = PATTERN_TABLE
            .iter()
            .filter_map(|(order, source)| {
                // Pattern sources are static and compile unconditionally.
                Regex::new(source).ok().map(|regex| DatePattern { regex, order: *order })
            })
            .collect();
        // A dropped entry would silently shift extraction priority.
        debug_assert_eq!(patterns.len(), PATTERN_TABLE.len());
        Self { patterns }
    }

    /// Returns the date carried by the first matching pattern, scanning
    /// left-to-right and accepting the first textual match position. A match
    /// that fails calendar validation ends extraction for this filename; no
    /// later pattern or other substring is tried.
    #[must_use]
    pub fn extract(&self, filename: &str) -> Option<Date> {
        for pattern in &self.patterns {
            if let Some(captures) = pattern.regex.captures(filename) {
                return calendar_date(&captures, pattern.order);
            }
        }
        None
    }
}

impl Default for DateExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn calendar_date(captures: &Captures<'_>, order: FieldOrder) -> Option<Date> {
    let (year_group, month_group, day_group) = match order {
        FieldOrder::YearFirst => (1, 2, 3),
        FieldOrder::MonthFirst => (3, 1, 2),
    };
    let year: i32 = captures.get(year_group)?.as_str().parse().ok()?;
    let month: u8 = captures.get(month_group)?.as_str().parse().ok()?;
    let day: u8 = captures.get(day_group)?.as_str().parse().ok()?;
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// Applies the fallback chain: filename pattern, then storage timestamp,
/// then unavailable.
#[must_use]
pub fn resolve_best_date(
    extractor: &DateExtractor,
    filename: &str,
    last_modified: Option<OffsetDateTime>,
) -> BestDate {
    if let Some(date) = extractor.extract(filename) {
        return BestDate::FromFilename(date);
    }
    match last_modified {
        Some(timestamp) => BestDate::FromTimestamp(timestamp),
        None => BestDate::Unavailable,
    }
}

/// One row of the manifest. `best_date_utc` is the formatted sort key, empty
/// when no date could be derived.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ManifestRecord {
    pub best_date_utc: String,
    pub date_source: DateSource,
    pub key: String,
    pub filename: String,
    pub size_bytes: u64,
}

/// The sorted index of one case's documents, rebuilt from scratch on every
/// invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Manifest {
    pub records: Vec<ManifestRecord>,
}

impl Manifest {
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

fn final_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Builds the manifest for a complete object listing: drops folder
/// placeholders, derives a best date per object, and sorts ascending by
/// `(best_date_utc, filename)` using plain string comparison. Records with an
/// empty best date (source `unknown`) sort first, the empty string being the
/// least sort key. Never fails; malformed inputs degrade to `unknown`.
#[must_use]
pub fn build_manifest(objects: &[StoredObject]) -> Manifest {
    let extractor = DateExtractor::new();
    let mut records: Vec<ManifestRecord> = objects
        .iter()
        .filter(|object| !object.key.ends_with('/'))
        .map(|object| {
            let filename = final_segment(&object.key).to_string();
            let best_date = resolve_best_date(&extractor, &filename, object.last_modified);
            ManifestRecord {
                best_date_utc: best_date.format_utc(),
                date_source: best_date.source(),
                key: object.key.clone(),
                filename,
                size_bytes: object.size_bytes,
            }
        })
        .collect();
    records.sort_by(|lhs, rhs| {
        lhs.best_date_utc
            .cmp(&rhs.best_date_utc)
            .then_with(|| lhs.filename.cmp(&rhs.filename))
    });
    Manifest { records }
}

const MANIFEST_HEADER: &str = "best_date_utc,date_source,filename,size_bytes,key";

fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Serializes the manifest as UTF-8 CSV. Row order is the manifest's own
/// order; no row is omitted or reordered.
#[must_use]
pub fn serialize_manifest(manifest: &Manifest) -> Vec<u8> {
    let mut out = String::with_capacity(64 * (manifest.records.len() + 1));
    out.push_str(MANIFEST_HEADER);
    out.push('\n');
    for record in &manifest.records {
        out.push_str(&csv_field(&record.best_date_utc));
        out.push(',');
        out.push_str(record.date_source.as_str());
        out.push(',');
        out.push_str(&csv_field(&record.filename));
        out.push(',');
        out.push_str(&record.size_bytes.to_string());
        out.push(',');
        out.push_str(&csv_field(&record.key));
        out.push('\n');
    }
    out.into_bytes()
}

/// Checks a case identifier taken from a request path.
///
/// # Errors
/// Returns [`IndexError::Validation`] for empty identifiers or identifiers
/// containing path separators, whitespace, or `..`.
pub fn validate_case_id(case_id: &str) -> Result<(), IndexError> {
    if case_id.is_empty() {
        return Err(IndexError::Validation("case_id MUST be non-empty".to_string()));
    }
    if case_id.contains('/')
        || case_id.contains('\\')
        || case_id.contains("..")
        || case_id.chars().any(char::is_whitespace)
    {
        return Err(IndexError::Validation(format!(
            "case_id contains unsupported characters: {case_id}"
        )));
    }
    Ok(())
}

/// Checks a client-chosen upload filename.
///
/// # Errors
/// Returns [`IndexError::Validation`] for empty names, names containing path
/// separators, and dot-prefixed names.
pub fn validate_upload_filename(filename: &str) -> Result<(), IndexError> {
    if filename.is_empty() {
        return Err(IndexError::Validation("filename MUST be non-empty".to_string()));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(IndexError::Validation(
            "filename MUST NOT contain path separators".to_string(),
        ));
    }
    if filename.starts_with('.') {
        return Err(IndexError::Validation(
            "filename MUST NOT be dot-prefixed".to_string(),
        ));
    }
    Ok(())
}

/// Prefix under which a case's raw documents are stored.
#[must_use]
pub fn raw_prefix(case_id: &str) -> String {
    format!("cases/{case_id}/raw/")
}

/// Storage key for one uploaded document.
#[must_use]
pub fn upload_key(case_id: &str, filename: &str) -> String {
    format!("cases/{case_id}/raw/{filename}")
}

/// Storage key of the persisted manifest, distinct from the raw prefix.
#[must_use]
pub fn index_key(case_id: &str) -> String {
    format!("cases/{case_id}/outputs/index.csv")
}
