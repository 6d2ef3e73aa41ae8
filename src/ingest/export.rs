//! CSV export of a batch's fact tables

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::{FactSet, IngestError};

/// Write one CSV per fact table into `output_dir/batch_<id>/`, replacing any
/// earlier export of the same batch. Returns the batch directory.
pub fn write_fact_csvs(output_dir: &Path, batch_id: i64, facts: &FactSet) -> Result<PathBuf, IngestError> {
    let dir = output_dir.join(format!("batch_{batch_id}"));
    fs::create_dir_all(&dir)?;

    write_table(&dir, "daily_query_count.csv", &facts.daily_query_counts)?;
    write_table(&dir, "daily_user_query_count.csv", &facts.daily_user_query_counts)?;
    write_table(&dir, "daily_affected_rows.csv", &facts.daily_affected_rows)?;
    write_table(&dir, "daily_user_affected_rows.csv", &facts.daily_user_affected_rows)?;
    write_table(&dir, "hourly_query_volume.csv", &facts.hourly_query_volume)?;
    write_table(&dir, "suspicious_queries.csv", &facts.suspicious_queries)?;
    write_table(&dir, "security_events.csv", &facts.security_events)?;
    write_table(&dir, "dml_activity.csv", &facts.dml_activity)?;
    write_table(&dir, "ddl_activity.csv", &facts.ddl_activity)?;

    Ok(dir)
}

fn write_table<T: Serialize>(dir: &Path, name: &str, rows: &[T]) -> Result<(), IngestError> {
    let mut writer = csv::Writer::from_path(dir.join(name))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::aggregate;
    use crate::ingest::normalize::read_log;
    use tempfile::TempDir;

    #[test]
    fn writes_every_table() {
        let csv = "Time Group - 1 Minute,User,Event Type,Object,Affected Rows,Response Size,Query\n\
                   02/26/2025 10:00:00 AM,alice,Query,,4,0,\"DELETE FROM Customers WHERE id=1\"\n";
        let facts = aggregate(&read_log(csv.as_bytes()).unwrap());
        let tmp = TempDir::new().unwrap();

        let dir = write_fact_csvs(tmp.path(), 7, &facts).unwrap();
        assert!(dir.ends_with("batch_7"));
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 9);

        let daily = fs::read_to_string(dir.join("daily_query_count.csv")).unwrap();
        assert_eq!(daily, "date,total_queries\n2025-02-26,1\n");

        let suspicious = fs::read_to_string(dir.join("suspicious_queries.csv")).unwrap();
        assert!(suspicious.contains("DELETE FROM Customers WHERE id=1"));
    }
}
