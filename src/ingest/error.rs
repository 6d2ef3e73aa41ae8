//! Ingestion errors and the structured result handed to callers

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("line {line}: {found} fields, header has {expected}")]
    TooManyFields { line: u64, expected: usize, found: usize },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Stable, machine-checkable outcome codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    ImportSuccess,
    ImportFileNotFound,
    ImportInvalidFile,
    ImportException,
    ReaggregateSuccess,
    ReaggregateException,
    DeleteSuccess,
    DeleteException,
    BatchNotFound,
    QuerySuccess,
    QueryException,
}

/// Where a run stopped. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    NoInput,
    FileFound,
    Parsed,
    RowsPersisted,
    Aggregated,
    Archived,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub status: Status,
    pub message: String,
    pub inserted_rows: usize,
    pub code: ResultCode,
    /// Set for ingestion and re-aggregation runs only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<IngestStage>,
    pub batch_id: Option<i64>,
    pub archived_to: Option<PathBuf>,
}

impl IngestOutcome {
    pub fn success(code: ResultCode, message: impl Into<String>) -> Self {
        Self::new(Status::Success, code, message.into())
    }

    pub fn error(code: ResultCode, message: impl Into<String>) -> Self {
        Self::new(Status::Error, code, message.into())
    }

    fn new(status: Status, code: ResultCode, message: String) -> Self {
        Self {
            status,
            message,
            inserted_rows: 0,
            code,
            stage: None,
            batch_id: None,
            archived_to: None,
        }
    }

    pub fn at(mut self, stage: IngestStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_batch(mut self, batch_id: i64) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_rows(mut self, inserted_rows: usize) -> Self {
        self.inserted_rows = inserted_rows;
        self
    }

    /// True when the run broke off mid-way, as opposed to finding nothing to do
    pub fn is_failure(&self) -> bool {
        self.stage == Some(IngestStage::Failed)
    }
}
