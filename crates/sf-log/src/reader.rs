//! CSV event-log reading with configurable column names.

use std::path::Path;

use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use sf_types::{ColumnMapping, EventLog, EventRecord, LogError, SfResult};

/// Read an event log from a CSV file.
///
/// Timestamps must be timezone-aware; naive timestamps are rejected rather
/// than silently assumed to be UTC.
pub fn read_csv(path: &Path, columns: &ColumnMapping) -> SfResult<EventLog> {
    if !path.exists() {
        return Err(LogError::NotFound(path.to_path_buf()).into());
    }
    tracing::info!("Reading event log from: {}", path.display());

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LogError::MalformedRow {
            row: 0,
            message: format!("failed to open {}: {e}", path.display()),
        })?;

    let headers = reader
        .headers()
        .map_err(|e| LogError::MalformedRow {
            row: 0,
            message: format!("failed to read headers: {e}"),
        })?
        .clone();

    let column_index = |name: &str| -> Result<usize, LogError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LogError::MissingColumn {
                column: name.to_string(),
                path: path.to_path_buf(),
            })
    };

    let case_idx = column_index(&columns.case)?;
    let activity_idx = column_index(&columns.activity)?;
    let resource_idx = column_index(&columns.resource)?;
    let start_idx = column_index(&columns.start_time)?;
    let end_idx = column_index(&columns.end_time)?;

    let mut records = Vec::new();
    for (row_number, row) in reader.records().enumerate() {
        let row = row.map_err(|e| LogError::MalformedRow {
            row: row_number + 1,
            message: e.to_string(),
        })?;

        let field = |idx: usize| -> Result<&str, LogError> {
            row.get(idx).ok_or_else(|| LogError::MalformedRow {
                row: row_number + 1,
                message: format!("missing field {idx}"),
            })
        };

        let start_time = parse_timestamp(field(start_idx)?, row_number + 1)?;
        let end_time = parse_timestamp(field(end_idx)?, row_number + 1)?;
        let case_id = field(case_idx)?.to_string();

        if start_time > end_time {
            return Err(LogError::StartAfterEnd {
                case_id,
                row: row_number + 1,
            }
            .into());
        }

        records.push(EventRecord {
            case_id,
            activity: field(activity_idx)?.to_string(),
            resource: field(resource_idx)?.to_string(),
            start_time,
            end_time,
        });
    }

    if records.is_empty() {
        return Err(LogError::Empty(path.to_path_buf()).into());
    }

    let process_name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "process".to_string());

    let log = EventLog::new(process_name, records)?;
    tracing::info!(
        "Loaded {} events across {} cases from {}",
        log.len(),
        log.case_count(),
        path.display()
    );
    Ok(log)
}

fn parse_timestamp(value: &str, row: usize) -> Result<DateTime<Utc>, LogError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f %z"] {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    Err(LogError::Timestamp {
        value: value.to_string(),
        row,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_default_columns() {
        let file = write_log(
            "case_id,activity,resource,start_time,end_time\n\
             c1,Submit,bob,2023-05-08T09:00:00Z,2023-05-08T09:30:00Z\n\
             c1,Review,ann,2023-05-08T09:45:00+00:00,2023-05-08T10:30:00+00:00\n",
        );
        let log = read_csv(file.path(), &ColumnMapping::default()).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.records[0].resource, "bob");
    }

    #[test]
    fn reads_custom_columns_with_offsets() {
        let file = write_log(
            "Case ID,Activity,Resource,Start,End\n\
             7,Check,sam,2023-05-08 09:00:00+02:00,2023-05-08 10:00:00+02:00\n",
        );
        let columns = ColumnMapping {
            case: "Case ID".into(),
            activity: "Activity".into(),
            resource: "Resource".into(),
            start_time: "Start".into(),
            end_time: "End".into(),
        };
        let log = read_csv(file.path(), &columns).unwrap();
        // +02:00 normalizes to 07:00 UTC
        assert_eq!(log.records[0].start_time.to_rfc3339(), "2023-05-08T07:00:00+00:00");
    }

    #[test]
    fn rejects_naive_timestamps() {
        let file = write_log(
            "case_id,activity,resource,start_time,end_time\n\
             c1,Submit,bob,2023-05-08 09:00:00,2023-05-08 09:30:00\n",
        );
        let error = read_csv(file.path(), &ColumnMapping::default()).unwrap_err();
        assert!(error.to_string().contains("timezone-aware"));
    }

    #[test]
    fn rejects_missing_column() {
        let file = write_log("case_id,activity,start_time,end_time\n");
        let error = read_csv(file.path(), &ColumnMapping::default()).unwrap_err();
        assert!(error.to_string().contains("resource"));
    }

    #[test]
    fn rejects_inverted_record() {
        let file = write_log(
            "case_id,activity,resource,start_time,end_time\n\
             c1,Submit,bob,2023-05-08T10:00:00Z,2023-05-08T09:30:00Z\n",
        );
        assert!(read_csv(file.path(), &ColumnMapping::default()).is_err());
    }
}
