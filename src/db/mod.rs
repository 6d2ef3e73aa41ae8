//! Database module
//!
//! SQLite persistence for import batches, their raw log rows and the derived
//! fact tables. Each store operation runs in a single transaction so callers
//! only ever observe the old or the new complete state of a batch.

mod schema;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, QueryBuilder, Sqlite, Transaction};

use crate::config::DatabaseConfig;
use crate::ingest::{
    DailyAffectedRows, DailyQueryCount, DailyUserAffectedRows, DailyUserQueryCount, DdlActivity,
    DmlActivity, FactSet, HourlyQueryVolume, LogRow, SecurityEvent, SuspiciousQuery,
};

/// Raw rows per multi-row INSERT; 8 binds each keeps us well under SQLite's
/// host parameter limit.
const RAW_ROW_CHUNK: usize = 500;

/// One ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct ImportBatch {
    pub id: i64,
    pub filename: String,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub batch: ImportBatch,
    pub row_count: i64,
}

/// Persistence operations the ingestion pipeline depends on
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Create a batch and append all of its raw rows as one unit
    async fn create_batch(&self, filename: &str, rows: &[LogRow]) -> Result<ImportBatch>;

    /// Delete every derived fact of the batch, then insert `facts`
    async fn replace_facts(&self, batch_id: i64, facts: &FactSet) -> Result<()>;

    /// Stored raw rows in insertion order, or `None` if the batch is unknown
    async fn load_raw_rows(&self, batch_id: i64) -> Result<Option<Vec<LogRow>>>;

    /// Remove a batch with all of its rows and facts. False if it did not exist.
    async fn delete_batch(&self, batch_id: i64) -> Result<bool>;
}

type RawRowTuple = (
    Option<NaiveDateTime>,
    String,
    Option<String>,
    Option<String>,
    i64,
    i64,
    Option<String>,
);

type ActivityTuple = (NaiveDate, String, String, Option<String>, i64);

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.url)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        for statement in schema::MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn get_batch(&self, batch_id: i64) -> Result<Option<ImportBatch>> {
        let row: Option<(i64, String, i64)> =
            sqlx::query_as("SELECT id, filename, imported_at FROM import_batches WHERE id = ?")
                .bind(batch_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, filename, imported_at)| ImportBatch {
            id,
            filename,
            imported_at: millis_to_utc(imported_at),
        }))
    }

    /// All batches, newest first
    pub async fn list_batches(&self) -> Result<Vec<BatchSummary>> {
        let rows: Vec<(i64, String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT b.id, b.filename, b.imported_at,
                   (SELECT COUNT(*) FROM log_entries l WHERE l.batch_id = b.id) AS row_count
            FROM import_batches b
            ORDER BY b.imported_at DESC, b.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, filename, imported_at, row_count)| BatchSummary {
                batch: ImportBatch {
                    id,
                    filename,
                    imported_at: millis_to_utc(imported_at),
                },
                row_count,
            })
            .collect())
    }

    /// Read back the stored facts of a batch, ordered the same way the
    /// aggregator emits them.
    pub async fn load_facts(&self, batch_id: i64) -> Result<FactSet> {
        let daily: Vec<(NaiveDate, i64)> = sqlx::query_as(
            "SELECT date, total_queries FROM daily_query_counts WHERE batch_id = ? ORDER BY date",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let daily_user: Vec<(NaiveDate, String, i64)> = sqlx::query_as(
            "SELECT date, user, total_queries FROM daily_user_query_counts WHERE batch_id = ? ORDER BY date, user",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let affected: Vec<(NaiveDate, i64)> = sqlx::query_as(
            "SELECT date, total_affected_rows FROM daily_affected_rows WHERE batch_id = ? ORDER BY date",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let affected_user: Vec<(NaiveDate, String, i64)> = sqlx::query_as(
            "SELECT date, user, total_affected_rows FROM daily_user_affected_rows WHERE batch_id = ? ORDER BY date, user",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let hourly: Vec<(NaiveDate, i64, i64)> = sqlx::query_as(
            "SELECT date, hour, query_count FROM hourly_query_volume WHERE batch_id = ? ORDER BY date, hour",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let suspicious: Vec<(Option<NaiveDateTime>, Option<NaiveDate>, String, Option<String>)> = sqlx::query_as(
            "SELECT timestamp, date, user, query_text FROM suspicious_queries WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let security: Vec<(Option<NaiveDateTime>, Option<NaiveDate>, String, String, Option<String>)> = sqlx::query_as(
            "SELECT timestamp, date, user, event_type, details FROM security_events WHERE batch_id = ? ORDER BY id",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let dml: Vec<ActivityTuple> = sqlx::query_as(
            "SELECT date, user, dml_type, table_name, count FROM dml_activity WHERE batch_id = ? ORDER BY date, user, dml_type, table_name",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let ddl: Vec<ActivityTuple> = sqlx::query_as(
            "SELECT date, user, ddl_type, object_name, count FROM ddl_activity WHERE batch_id = ? ORDER BY date, user, ddl_type, object_name",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(FactSet {
            daily_query_counts: daily
                .into_iter()
                .map(|(date, total_queries)| DailyQueryCount { date, total_queries })
                .collect(),
            daily_user_query_counts: daily_user
                .into_iter()
                .map(|(date, user, total_queries)| DailyUserQueryCount { date, user, total_queries })
                .collect(),
            daily_affected_rows: affected
                .into_iter()
                .map(|(date, total_affected_rows)| DailyAffectedRows { date, total_affected_rows })
                .collect(),
            daily_user_affected_rows: affected_user
                .into_iter()
                .map(|(date, user, total_affected_rows)| DailyUserAffectedRows { date, user, total_affected_rows })
                .collect(),
            hourly_query_volume: hourly
                .into_iter()
                .map(|(date, hour, query_count)| HourlyQueryVolume {
                    date,
                    hour: hour as u32,
                    query_count,
                })
                .collect(),
            suspicious_queries: suspicious
                .into_iter()
                .map(|(timestamp, date, user, query_text)| SuspiciousQuery { timestamp, date, user, query_text })
                .collect(),
            security_events: security
                .into_iter()
                .map(|(timestamp, date, user, event_type, details)| SecurityEvent {
                    timestamp,
                    date,
                    user,
                    event_type,
                    details,
                })
                .collect(),
            dml_activity: dml
                .into_iter()
                .map(|(date, user, dml_type, table_name, count)| DmlActivity { date, user, dml_type, table_name, count })
                .collect(),
            ddl_activity: ddl
                .into_iter()
                .map(|(date, user, ddl_type, object_name, count)| DdlActivity { date, user, ddl_type, object_name, count })
                .collect(),
        })
    }
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

async fn append_raw_rows(tx: &mut Transaction<'_, Sqlite>, batch_id: i64, rows: &[LogRow]) -> Result<()> {
    for chunk in rows.chunks(RAW_ROW_CHUNK) {
        let mut insert = QueryBuilder::<Sqlite>::new(
            "INSERT INTO log_entries (batch_id, timestamp, user, event_type, object_name, affected_rows, response_size, query) ",
        );
        insert.push_values(chunk, |mut values, row| {
            values
                .push_bind(batch_id)
                .push_bind(row.timestamp)
                .push_bind(&row.user)
                .push_bind(&row.event_type)
                .push_bind(&row.object_name)
                .push_bind(row.affected_rows)
                .push_bind(row.response_size)
                .push_bind(&row.query);
        });
        insert.build().execute(&mut **tx).await?;
    }
    Ok(())
}

async fn insert_facts(tx: &mut Transaction<'_, Sqlite>, batch_id: i64, facts: &FactSet) -> Result<()> {
    for fact in &facts.daily_query_counts {
        sqlx::query("INSERT INTO daily_query_counts (batch_id, date, total_queries) VALUES (?, ?, ?)")
            .bind(batch_id)
            .bind(fact.date)
            .bind(fact.total_queries)
            .execute(&mut **tx)
            .await?;
    }
    for fact in &facts.daily_user_query_counts {
        sqlx::query("INSERT INTO daily_user_query_counts (batch_id, date, user, total_queries) VALUES (?, ?, ?, ?)")
            .bind(batch_id)
            .bind(fact.date)
            .bind(&fact.user)
            .bind(fact.total_queries)
            .execute(&mut **tx)
            .await?;
    }
    for fact in &facts.daily_affected_rows {
        sqlx::query("INSERT INTO daily_affected_rows (batch_id, date, total_affected_rows) VALUES (?, ?, ?)")
            .bind(batch_id)
            .bind(fact.date)
            .bind(fact.total_affected_rows)
            .execute(&mut **tx)
            .await?;
    }
    for fact in &facts.daily_user_affected_rows {
        sqlx::query(
            "INSERT INTO daily_user_affected_rows (batch_id, date, user, total_affected_rows) VALUES (?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(fact.date)
        .bind(&fact.user)
        .bind(fact.total_affected_rows)
        .execute(&mut **tx)
        .await?;
    }
    for fact in &facts.hourly_query_volume {
        sqlx::query("INSERT INTO hourly_query_volume (batch_id, date, hour, query_count) VALUES (?, ?, ?, ?)")
            .bind(batch_id)
            .bind(fact.date)
            .bind(fact.hour as i64)
            .bind(fact.query_count)
            .execute(&mut **tx)
            .await?;
    }
    for fact in &facts.suspicious_queries {
        sqlx::query("INSERT INTO suspicious_queries (batch_id, timestamp, date, user, query_text) VALUES (?, ?, ?, ?, ?)")
            .bind(batch_id)
            .bind(fact.timestamp)
            .bind(fact.date)
            .bind(&fact.user)
            .bind(&fact.query_text)
            .execute(&mut **tx)
            .await?;
    }
    for fact in &facts.security_events {
        sqlx::query(
            "INSERT INTO security_events (batch_id, timestamp, date, user, event_type, details) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(batch_id)
        .bind(fact.timestamp)
        .bind(fact.date)
        .bind(&fact.user)
        .bind(&fact.event_type)
        .bind(&fact.details)
        .execute(&mut **tx)
        .await?;
    }
    for fact in &facts.dml_activity {
        sqlx::query("INSERT INTO dml_activity (batch_id, date, user, dml_type, table_name, count) VALUES (?, ?, ?, ?, ?, ?)")
            .bind(batch_id)
            .bind(fact.date)
            .bind(&fact.user)
            .bind(&fact.dml_type)
            .bind(&fact.table_name)
            .bind(fact.count)
            .execute(&mut **tx)
            .await?;
    }
    for fact in &facts.ddl_activity {
        sqlx::query("INSERT INTO ddl_activity (batch_id, date, user, ddl_type, object_name, count) VALUES (?, ?, ?, ?, ?, ?)")
            .bind(batch_id)
            .bind(fact.date)
            .bind(&fact.user)
            .bind(&fact.ddl_type)
            .bind(&fact.object_name)
            .bind(fact.count)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl BatchStore for Database {
    async fn create_batch(&self, filename: &str, rows: &[LogRow]) -> Result<ImportBatch> {
        let imported_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query("INSERT INTO import_batches (filename, imported_at) VALUES (?, ?)")
            .bind(filename)
            .bind(imported_at.timestamp_millis())
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
        append_raw_rows(&mut tx, id, rows).await?;

        tx.commit().await?;
        Ok(ImportBatch {
            id,
            filename: filename.to_string(),
            imported_at,
        })
    }

    async fn replace_facts(&self, batch_id: i64, facts: &FactSet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for table in schema::FACT_TABLES {
            let delete = format!("DELETE FROM {table} WHERE batch_id = ?");
            sqlx::query(&delete).bind(batch_id).execute(&mut *tx).await?;
        }
        insert_facts(&mut tx, batch_id, facts).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_raw_rows(&self, batch_id: i64) -> Result<Option<Vec<LogRow>>> {
        if self.get_batch(batch_id).await?.is_none() {
            return Ok(None);
        }

        let rows: Vec<RawRowTuple> = sqlx::query_as(
            r#"
            SELECT timestamp, user, event_type, object_name, affected_rows, response_size, query
            FROM log_entries
            WHERE batch_id = ?
            ORDER BY id
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(
            rows.into_iter()
                .map(|(timestamp, user, event_type, object_name, affected_rows, response_size, query)| LogRow {
                    timestamp,
                    user,
                    event_type,
                    object_name,
                    affected_rows,
                    response_size,
                    query,
                })
                .collect(),
        ))
    }

    async fn delete_batch(&self, batch_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM import_batches WHERE id = ?")
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
