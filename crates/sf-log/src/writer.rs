//! CSV event-log writing, used for miner input files and archived output.

use std::path::Path;

use csv::WriterBuilder;
use sf_types::{ColumnMapping, EventLog, LogError, SfResult};

/// Write an event log as CSV with the given column names.
pub fn write_csv(log: &EventLog, path: &Path, columns: &ColumnMapping) -> SfResult<()> {
    let write_error = |e: csv::Error| LogError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut writer = WriterBuilder::new().from_path(path).map_err(write_error)?;

    writer
        .write_record([
            columns.case.as_str(),
            columns.activity.as_str(),
            columns.resource.as_str(),
            columns.start_time.as_str(),
            columns.end_time.as_str(),
        ])
        .map_err(write_error)?;

    for record in &log.records {
        writer
            .write_record([
                record.case_id.as_str(),
                record.activity.as_str(),
                record.resource.as_str(),
                &record.start_time.to_rfc3339(),
                &record.end_time.to_rfc3339(),
            ])
            .map_err(write_error)?;
    }

    writer.flush()?;
    tracing::debug!("Wrote {} events to {}", log.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_csv;
    use chrono::TimeZone;
    use chrono::Utc;
    use sf_types::{EventRecord, EventLog};

    #[test]
    fn written_log_reads_back() {
        let start = Utc.with_ymd_and_hms(2023, 5, 8, 9, 0, 0).unwrap();
        let log = EventLog::new(
            "claims",
            vec![EventRecord::new(
                "c1",
                "Submit",
                "bob",
                start,
                start + chrono::Duration::minutes(30),
            )],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claims.csv");
        let columns = ColumnMapping::default();
        write_csv(&log, &path, &columns).unwrap();

        let loaded = read_csv(&path, &columns).unwrap();
        assert_eq!(loaded.records, log.records);
    }
}
