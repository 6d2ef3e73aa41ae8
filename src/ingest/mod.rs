//! Audit-log ingestion pipeline
//!
//! Normalize → classify → aggregate → persist, driven by [`Ingestor`] for one
//! input file per run.

mod aggregate;
mod archive;
mod classify;
mod error;
mod export;
pub mod normalize;

pub use aggregate::{
    aggregate, DailyAffectedRows, DailyQueryCount, DailyUserAffectedRows, DailyUserQueryCount,
    DdlActivity, DmlActivity, FactSet, HourlyQueryVolume, SecurityEvent, SuspiciousQuery,
};
pub use error::{IngestError, IngestOutcome, IngestStage, ResultCode, Status};
pub use normalize::LogRow;

use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::db::BatchStore;

/// Sequences one ingestion run against a [`BatchStore`].
///
/// Runs are not mutually exclusive; callers must serialize them.
pub struct Ingestor<S> {
    config: IngestConfig,
    store: S,
}

impl<S: BatchStore> Ingestor<S> {
    pub fn new(config: IngestConfig, store: S) -> Self {
        Self { config, store }
    }

    /// Ingest the configured input file, if one is waiting
    pub async fn ingest(&self) -> IngestOutcome {
        let input = self.config.input_path.clone();

        match tokio::fs::try_exists(&input).await {
            Ok(true) => {}
            Ok(false) => {
                info!("No input file at {}", input.display());
                return IngestOutcome::error(
                    ResultCode::ImportFileNotFound,
                    format!("Input file not found: {}", input.display()),
                )
                .at(IngestStage::NoInput);
            }
            Err(e) => return failed(IngestStage::NoInput, ResultCode::ImportException, e.into()),
        }
        let mut stage = IngestStage::FileFound;
        debug!(?stage, "Reading {}", input.display());

        let path = input.clone();
        let rows = match tokio::task::spawn_blocking(move || normalize::read_log_file(&path)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => return failed(stage, ResultCode::ImportInvalidFile, e),
            Err(e) => return failed(stage, ResultCode::ImportException, e.into()),
        };
        stage = IngestStage::Parsed;
        debug!(?stage, "Normalized {} rows", rows.len());

        // Pure, so computed before anything is committed
        let facts = aggregate(&rows);

        let filename = file_label(&input);
        let batch = match self.store.create_batch(&filename, &rows).await {
            Ok(batch) => batch,
            Err(e) => return failed(stage, ResultCode::ImportException, e.into()),
        };
        stage = IngestStage::RowsPersisted;
        debug!(?stage, batch_id = batch.id, "Stored {} raw rows", rows.len());

        if let Err(e) = self.store.replace_facts(batch.id, &facts).await {
            // Leave nothing half-committed: drop the batch so the file can be re-ingested
            let outcome = failed(stage, ResultCode::ImportException, e.into());
            return match self.store.delete_batch(batch.id).await {
                Ok(_) => outcome,
                Err(rollback) => {
                    error!(
                        batch_id = batch.id,
                        "Rollback failed, re-aggregate the batch to recover: {:#}", rollback
                    );
                    outcome.with_batch(batch.id)
                }
            };
        }
        stage = IngestStage::Aggregated;
        debug!(?stage, batch_id = batch.id, "Stored {} fact rows", facts.total_rows());

        self.export(batch.id, &facts).await;

        let earliest = rows.iter().filter_map(|r| r.timestamp).min();
        let archived_to = self.archive(&input, earliest).await;
        if archived_to.is_some() {
            stage = IngestStage::Archived;
        }

        info!(
            batch_id = batch.id,
            rows = rows.len(),
            facts = facts.total_rows(),
            "Imported {}",
            filename
        );
        let mut outcome = IngestOutcome::success(
            ResultCode::ImportSuccess,
            format!("Imported {} rows from {}", rows.len(), filename),
        )
        .at(stage)
        .with_batch(batch.id)
        .with_rows(rows.len());
        outcome.archived_to = archived_to;
        outcome
    }

    /// Recompute a stored batch's facts from its raw rows
    pub async fn reaggregate(&self, batch_id: i64) -> IngestOutcome {
        let rows = match self.store.load_raw_rows(batch_id).await {
            Ok(Some(rows)) => rows,
            Ok(None) => return batch_not_found(batch_id),
            Err(e) => return failed(IngestStage::RowsPersisted, ResultCode::ReaggregateException, e.into()),
        };

        let facts = aggregate(&rows);
        if let Err(e) = self.store.replace_facts(batch_id, &facts).await {
            return failed(IngestStage::RowsPersisted, ResultCode::ReaggregateException, e.into())
                .with_batch(batch_id);
        }
        self.export(batch_id, &facts).await;

        info!(batch_id, facts = facts.total_rows(), "Re-aggregated batch");
        IngestOutcome::success(ResultCode::ReaggregateSuccess, format!("Re-aggregated {} rows", rows.len()))
            .at(IngestStage::Aggregated)
            .with_batch(batch_id)
            .with_rows(rows.len())
    }

    pub async fn delete_batch(&self, batch_id: i64) -> IngestOutcome {
        match self.store.delete_batch(batch_id).await {
            Ok(true) => {
                info!(batch_id, "Deleted batch");
                IngestOutcome::success(ResultCode::DeleteSuccess, format!("Deleted batch {batch_id}"))
                    .with_batch(batch_id)
            }
            Ok(false) => batch_not_found(batch_id),
            Err(e) => {
                error!(batch_id, "Failed to delete batch: {:#}", e);
                IngestOutcome::error(ResultCode::DeleteException, format!("Failed to delete batch {batch_id}: {e:#}"))
                    .with_batch(batch_id)
            }
        }
    }

    async fn export(&self, batch_id: i64, facts: &FactSet) {
        if !self.config.export_csv {
            return;
        }
        let output_dir = self.config.output_dir.clone();
        let facts = facts.clone();
        let written =
            tokio::task::spawn_blocking(move || export::write_fact_csvs(&output_dir, batch_id, &facts)).await;
        match written {
            Ok(Ok(dir)) => debug!(batch_id, "Exported facts to {}", dir.display()),
            Ok(Err(e)) => warn!(batch_id, "Fact export failed: {}", e),
            Err(e) => warn!(batch_id, "Fact export task failed: {}", e),
        }
    }

    /// Archival failures are logged only; the import already committed.
    async fn archive(&self, input: &Path, earliest: Option<chrono::NaiveDateTime>) -> Option<PathBuf> {
        let input = input.to_path_buf();
        let archive_dir = self.config.archive_dir.clone();
        let moved =
            tokio::task::spawn_blocking(move || archive::archive_input(&input, &archive_dir, earliest)).await;
        match moved {
            Ok(Ok(target)) => {
                info!("Archived input to {}", target.display());
                Some(target)
            }
            Ok(Err(e)) => {
                warn!("Failed to archive input file: {}", e);
                None
            }
            Err(e) => {
                warn!("Archive task failed: {}", e);
                None
            }
        }
    }
}

fn failed(stage: IngestStage, code: ResultCode, err: IngestError) -> IngestOutcome {
    error!(?stage, ?code, "Ingestion failed: {}", err);
    IngestOutcome::error(code, err.to_string()).at(IngestStage::Failed)
}

fn batch_not_found(batch_id: i64) -> IngestOutcome {
    debug!(batch_id, "Batch not found");
    IngestOutcome::error(ResultCode::BatchNotFound, format!("Batch {batch_id} not found")).with_batch(batch_id)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::open_test_db;
    use crate::db::{Database, ImportBatch};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    const HEADER: &str = "Time Group - 1 Minute,User,Event Type,Object,Affected Rows,Response Size,Query\n";

    const ALICE_LOG: &str = "02/26/2025 09:00:00 AM,alice,Query,,2,100,SELECT * FROM Orders\n\
                             02/26/2025 08:01:00 AM,alice,Query,,5,0,INSERT INTO Orders VALUES (1)\n\
                             02/26/2025 10:30:00 AM,alice,Query,,0,0,TRUNCATE TABLE Logs\n";

    fn ingest_config(tmp: &TempDir) -> IngestConfig {
        IngestConfig {
            input_path: tmp.path().join("CSVDAM").join("input.csv"),
            archive_dir: tmp.path().join("CSVDAM").join("archive"),
            output_dir: tmp.path().join("CSVDAM").join("output"),
            export_csv: true,
        }
    }

    fn write_input(config: &IngestConfig, body: &str) {
        fs::create_dir_all(config.input_path.parent().unwrap()).unwrap();
        fs::write(&config.input_path, format!("{HEADER}{body}")).unwrap();
    }

    async fn setup(tmp: &TempDir) -> Ingestor<Database> {
        Ingestor::new(ingest_config(tmp), open_test_db(tmp).await)
    }

    #[tokio::test]
    async fn missing_input_reports_file_not_found() {
        let tmp = TempDir::new().unwrap();
        let ingestor = setup(&tmp).await;

        let outcome = ingestor.ingest().await;
        assert_eq!(outcome.status, Status::Error);
        assert_eq!(outcome.code, ResultCode::ImportFileNotFound);
        assert_eq!(outcome.stage, Some(IngestStage::NoInput));
        assert!(ingestor.store.list_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn alice_truncate_scenario() {
        let tmp = TempDir::new().unwrap();
        let ingestor = setup(&tmp).await;
        write_input(&ingestor.config, ALICE_LOG);

        let outcome = ingestor.ingest().await;
        assert_eq!(outcome.status, Status::Success, "{}", outcome.message);
        assert_eq!(outcome.code, ResultCode::ImportSuccess);
        assert_eq!(outcome.stage, Some(IngestStage::Archived));
        assert_eq!(outcome.inserted_rows, 3);

        let date = NaiveDate::from_ymd_opt(2025, 2, 26).unwrap();
        let facts = ingestor.store.load_facts(outcome.batch_id.unwrap()).await.unwrap();
        assert_eq!(facts.daily_query_counts, vec![DailyQueryCount { date, total_queries: 3 }]);
        assert_eq!(
            facts.daily_user_query_counts,
            vec![DailyUserQueryCount { date, user: "alice".into(), total_queries: 3 }]
        );
        assert_eq!(facts.suspicious_queries.len(), 1);
        assert_eq!(facts.suspicious_queries[0].query_text.as_deref(), Some("TRUNCATE TABLE Logs"));
        assert_eq!(
            facts.ddl_activity,
            vec![DdlActivity {
                date,
                user: "alice".into(),
                ddl_type: "TRUNCATE".into(),
                object_name: Some("Logs".into()),
                count: 1,
            }]
        );
        assert_eq!(facts.dml_activity.len(), 2);
    }

    #[tokio::test]
    async fn archives_under_earliest_timestamp_and_exports() {
        let tmp = TempDir::new().unwrap();
        let ingestor = setup(&tmp).await;
        write_input(&ingestor.config, ALICE_LOG);

        let outcome = ingestor.ingest().await;
        let archived = outcome.archived_to.unwrap();
        assert_eq!(archived.file_name().unwrap(), "input_20250226_080100.csv");
        assert!(!ingestor.config.input_path.exists());

        let export_dir = ingestor
            .config
            .output_dir
            .join(format!("batch_{}", outcome.batch_id.unwrap()));
        assert!(export_dir.join("ddl_activity.csv").exists());

        // Nothing left to pick up
        assert_eq!(ingestor.ingest().await.code, ResultCode::ImportFileNotFound);
    }

    #[tokio::test]
    async fn reaggregation_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let ingestor = setup(&tmp).await;
        write_input(&ingestor.config, ALICE_LOG);
        let batch_id = ingestor.ingest().await.batch_id.unwrap();
        let before = ingestor.store.load_facts(batch_id).await.unwrap();

        let outcome = ingestor.reaggregate(batch_id).await;
        assert_eq!(outcome.code, ResultCode::ReaggregateSuccess);
        assert_eq!(outcome.inserted_rows, 3);
        assert_eq!(ingestor.store.load_facts(batch_id).await.unwrap(), before);

        assert_eq!(ingestor.reaggregate(batch_id + 100).await.code, ResultCode::BatchNotFound);
    }

    #[tokio::test]
    async fn unreadable_file_fails_without_side_effects() {
        let tmp = TempDir::new().unwrap();
        let ingestor = setup(&tmp).await;
        let config = ingestor.config.clone();
        fs::create_dir_all(config.input_path.parent().unwrap()).unwrap();
        fs::write(&config.input_path, "Query,Object\nSELECT 1,t\n").unwrap();

        let outcome = ingestor.ingest().await;
        assert_eq!(outcome.status, Status::Error);
        assert_eq!(outcome.code, ResultCode::ImportInvalidFile);
        assert_eq!(outcome.stage, Some(IngestStage::Failed));
        assert!(config.input_path.exists());
        assert!(ingestor.store.list_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn extreme_affected_rows_import_cleanly() {
        let tmp = TempDir::new().unwrap();
        let ingestor = setup(&tmp).await;
        write_input(
            &ingestor.config,
            "02/26/2025 09:00:00 AM,alice,Query,,9223372036854775807,0,DELETE FROM t\n\
             02/26/2025 09:01:00 AM,alice,Query,,9223372036854775807,0,DELETE FROM t\n",
        );

        let outcome = ingestor.ingest().await;
        assert_eq!(outcome.code, ResultCode::ImportSuccess, "{}", outcome.message);
        assert_eq!(outcome.stage, Some(IngestStage::Archived));

        let facts = ingestor.store.load_facts(outcome.batch_id.unwrap()).await.unwrap();
        assert_eq!(facts.daily_affected_rows.len(), 1);
        assert_eq!(facts.daily_affected_rows[0].total_affected_rows, i64::MAX);
        assert_eq!(facts.daily_user_affected_rows[0].total_affected_rows, i64::MAX);
        assert!(!ingestor.config.input_path.exists());
    }

    #[tokio::test]
    async fn split_query_field_fails_before_anything_is_stored() {
        let tmp = TempDir::new().unwrap();
        let ingestor = setup(&tmp).await;
        write_input(
            &ingestor.config,
            "02/26/2025 09:00:00 AM,alice,Query,,1,0,SELECT a, b FROM t; DROP TABLE audit\n",
        );

        let outcome = ingestor.ingest().await;
        assert_eq!(outcome.code, ResultCode::ImportInvalidFile);
        assert_eq!(outcome.stage, Some(IngestStage::Failed));
        assert!(ingestor.config.input_path.exists());
        assert!(ingestor.store.list_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn uncheckable_input_path_is_an_exception() {
        let tmp = TempDir::new().unwrap();
        let mut config = ingest_config(&tmp);
        // A regular file where the input's parent directory should be
        fs::write(tmp.path().join("blocker"), "").unwrap();
        config.input_path = tmp.path().join("blocker").join("input.csv");
        let ingestor = Ingestor::new(config, open_test_db(&tmp).await);

        let outcome = ingestor.ingest().await;
        assert_eq!(outcome.status, Status::Error);
        assert_eq!(outcome.code, ResultCode::ImportException);
        assert_eq!(outcome.stage, Some(IngestStage::Failed));
        assert!(outcome.is_failure());
    }

    #[tokio::test]
    async fn archive_failure_keeps_import() {
        let tmp = TempDir::new().unwrap();
        let mut config = ingest_config(&tmp);
        // A regular file where the archive directory should be
        fs::create_dir_all(tmp.path().join("CSVDAM")).unwrap();
        fs::write(tmp.path().join("blocker"), "").unwrap();
        config.archive_dir = tmp.path().join("blocker");
        let ingestor = Ingestor::new(config, open_test_db(&tmp).await);
        write_input(&ingestor.config, ALICE_LOG);

        let outcome = ingestor.ingest().await;
        assert_eq!(outcome.status, Status::Success);
        assert_eq!(outcome.stage, Some(IngestStage::Aggregated));
        assert!(outcome.archived_to.is_none());
        assert_eq!(ingestor.store.list_batches().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_reports_missing_batch() {
        let tmp = TempDir::new().unwrap();
        let ingestor = setup(&tmp).await;
        write_input(&ingestor.config, ALICE_LOG);
        let batch_id = ingestor.ingest().await.batch_id.unwrap();

        let deleted = ingestor.delete_batch(batch_id).await;
        assert_eq!(deleted.code, ResultCode::DeleteSuccess);
        assert_eq!(deleted.stage, None);
        assert!(!deleted.is_failure());

        let missing = ingestor.delete_batch(batch_id).await;
        assert_eq!(missing.code, ResultCode::BatchNotFound);
        assert_eq!(missing.stage, None);
    }

    /// Delegates to a real database but fails every fact replacement
    struct FailingFacts {
        inner: Database,
        deleted: AtomicBool,
    }

    #[async_trait]
    impl BatchStore for FailingFacts {
        async fn create_batch(&self, filename: &str, rows: &[LogRow]) -> anyhow::Result<ImportBatch> {
            self.inner.create_batch(filename, rows).await
        }

        async fn replace_facts(&self, _batch_id: i64, _facts: &FactSet) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn load_raw_rows(&self, batch_id: i64) -> anyhow::Result<Option<Vec<LogRow>>> {
            self.inner.load_raw_rows(batch_id).await
        }

        async fn delete_batch(&self, batch_id: i64) -> anyhow::Result<bool> {
            self.deleted.store(true, Ordering::SeqCst);
            self.inner.delete_batch(batch_id).await
        }
    }

    #[tokio::test]
    async fn failed_fact_replacement_rolls_back_batch() {
        let tmp = TempDir::new().unwrap();
        let db = open_test_db(&tmp).await;
        let store = FailingFacts { inner: db.clone(), deleted: AtomicBool::new(false) };
        let ingestor = Ingestor::new(ingest_config(&tmp), store);
        write_input(&ingestor.config, ALICE_LOG);

        let outcome = ingestor.ingest().await;
        assert_eq!(outcome.code, ResultCode::ImportException);
        assert_eq!(outcome.stage, Some(IngestStage::Failed));
        assert_eq!(outcome.batch_id, None);
        assert!(outcome.message.contains("disk full"));
        assert!(ingestor.store.deleted.load(Ordering::SeqCst));

        // Input stays in place for a retry, and no batch is left behind
        assert!(ingestor.config.input_path.exists());
        assert!(db.list_batches().await.unwrap().is_empty());
    }
}
