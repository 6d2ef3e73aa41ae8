//! CSV record normalization
//!
//! Turns audit-log export records into typed [`LogRow`]s. Bad cell values are
//! defaulted rather than rejected; only a structurally unreadable file fails.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::IngestError;

/// Format of the `Time Group - 1 Minute` column, e.g. `02/26/2025 11:59:00 PM`
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

pub const COL_TIME_GROUP: &str = "Time Group - 1 Minute";
pub const COL_USER: &str = "User";

/// One audit-log record as it appears in the export
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "Time Group - 1 Minute", default)]
    time_group: Option<String>,
    #[serde(rename = "User", default)]
    user: Option<String>,
    #[serde(rename = "Event Type", default)]
    event_type: Option<String>,
    #[serde(rename = "Object", default)]
    object: Option<String>,
    #[serde(rename = "Affected Rows", default)]
    affected_rows: Option<String>,
    #[serde(rename = "Response Size", default)]
    response_size: Option<String>,
    #[serde(rename = "Query", default)]
    query: Option<String>,
}

/// A normalized audit-log row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub timestamp: Option<NaiveDateTime>,
    pub user: String,
    pub event_type: Option<String>,
    pub object_name: Option<String>,
    pub affected_rows: i64,
    pub response_size: i64,
    pub query: Option<String>,
}

impl LogRow {
    pub fn date(&self) -> Option<NaiveDate> {
        self.timestamp.map(|ts| ts.date())
    }

    pub fn hour(&self) -> Option<u32> {
        self.timestamp.map(|ts| ts.hour())
    }
}

impl From<RawRecord> for LogRow {
    fn from(raw: RawRecord) -> Self {
        Self {
            timestamp: raw.time_group.as_deref().and_then(parse_timestamp),
            user: raw.user.unwrap_or_default(),
            event_type: non_empty(raw.event_type),
            object_name: non_empty(raw.object),
            affected_rows: parse_count(raw.affected_rows.as_deref()),
            response_size: parse_count(raw.response_size.as_deref()),
            query: non_empty(raw.query),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}

/// Parse a row/byte count. Integral decimals such as `12.0` are truncated;
/// anything non-numeric becomes 0. Negative values pass through.
pub fn parse_count(raw: Option<&str>) -> i64 {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return 0;
    };
    raw.parse::<i64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v as i64)
        })
        .unwrap_or(0)
}

/// Read and normalize every record of an export file
pub fn read_log_file(path: &Path) -> Result<Vec<LogRow>, IngestError> {
    let file = File::open(path)?;
    read_log(file)
}

pub fn read_log<R: Read>(reader: R) -> Result<Vec<LogRow>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    for required in [COL_TIME_GROUP, COL_USER] {
        if !headers.iter().any(|h| h == required) {
            return Err(IngestError::MissingColumn(required));
        }
    }

    // Short records are padded with defaults; long ones mean an unquoted
    // delimiter split a field, so the whole file is rejected.
    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader.read_record(&mut record)? {
        if record.len() > headers.len() {
            return Err(IngestError::TooManyFields {
                line: record.position().map_or(0, |p| p.line()),
                expected: headers.len(),
                found: record.len(),
            });
        }
        let raw: RawRecord = record.deserialize(Some(&headers))?;
        rows.push(LogRow::from(raw));
    }
    Ok(rows)
}
