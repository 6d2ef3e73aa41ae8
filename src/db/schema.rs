//! Database schema definitions
//!
//! Every table below `import_batches` hangs off a batch and is removed with it.
//! Dates are `YYYY-MM-DD` text, timestamps are naive datetime text.

pub const CREATE_IMPORT_BATCHES: &str = r#"
CREATE TABLE IF NOT EXISTS import_batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    imported_at BIGINT NOT NULL      -- epoch millis, UTC
)
"#;

pub const CREATE_LOG_ENTRIES: &str = r#"
CREATE TABLE IF NOT EXISTS log_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    timestamp TEXT,
    user TEXT NOT NULL,
    event_type TEXT,
    object_name TEXT,
    affected_rows INTEGER NOT NULL DEFAULT 0,
    response_size INTEGER NOT NULL DEFAULT 0,
    query TEXT
)
"#;

// === DERIVED FACTS (replaced wholesale per batch) ===

pub const CREATE_DAILY_QUERY_COUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS daily_query_counts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    total_queries INTEGER NOT NULL,
    UNIQUE (batch_id, date)
)
"#;

pub const CREATE_DAILY_USER_QUERY_COUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS daily_user_query_counts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    user TEXT NOT NULL,
    total_queries INTEGER NOT NULL,
    UNIQUE (batch_id, date, user)
)
"#;

pub const CREATE_DAILY_AFFECTED_ROWS: &str = r#"
CREATE TABLE IF NOT EXISTS daily_affected_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    total_affected_rows INTEGER NOT NULL,
    UNIQUE (batch_id, date)
)
"#;

pub const CREATE_DAILY_USER_AFFECTED_ROWS: &str = r#"
CREATE TABLE IF NOT EXISTS daily_user_affected_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    user TEXT NOT NULL,
    total_affected_rows INTEGER NOT NULL,
    UNIQUE (batch_id, date, user)
)
"#;

pub const CREATE_HOURLY_QUERY_VOLUME: &str = r#"
CREATE TABLE IF NOT EXISTS hourly_query_volume (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    hour INTEGER NOT NULL CHECK (hour BETWEEN 0 AND 23),
    query_count INTEGER NOT NULL,
    UNIQUE (batch_id, date, hour)
)
"#;

pub const CREATE_SUSPICIOUS_QUERIES: &str = r#"
CREATE TABLE IF NOT EXISTS suspicious_queries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    timestamp TEXT,
    date TEXT,
    user TEXT NOT NULL,
    query_text TEXT
)
"#;

pub const CREATE_SECURITY_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS security_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    timestamp TEXT,
    date TEXT,
    user TEXT NOT NULL,
    event_type TEXT NOT NULL,
    details TEXT
)
"#;

pub const CREATE_DML_ACTIVITY: &str = r#"
CREATE TABLE IF NOT EXISTS dml_activity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    user TEXT NOT NULL,
    dml_type TEXT NOT NULL,
    table_name TEXT,
    count INTEGER NOT NULL
)
"#;

pub const CREATE_DDL_ACTIVITY: &str = r#"
CREATE TABLE IF NOT EXISTS ddl_activity (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES import_batches(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    user TEXT NOT NULL,
    ddl_type TEXT NOT NULL,
    object_name TEXT,
    count INTEGER NOT NULL
)
"#;

// Cascade deletes scan child tables by batch_id
pub const CREATE_INDEX_LOG_ENTRIES_BATCH: &str =
    "CREATE INDEX IF NOT EXISTS idx_log_entries_batch ON log_entries(batch_id, id)";

pub const CREATE_INDEX_SUSPICIOUS_BATCH: &str =
    "CREATE INDEX IF NOT EXISTS idx_suspicious_batch ON suspicious_queries(batch_id)";

pub const CREATE_INDEX_SECURITY_BATCH: &str =
    "CREATE INDEX IF NOT EXISTS idx_security_batch ON security_events(batch_id)";

pub const CREATE_INDEX_DML_BATCH: &str =
    "CREATE INDEX IF NOT EXISTS idx_dml_batch ON dml_activity(batch_id)";

pub const CREATE_INDEX_DDL_BATCH: &str =
    "CREATE INDEX IF NOT EXISTS idx_ddl_batch ON ddl_activity(batch_id)";

/// Applied in order by `Database::run_migrations`
pub const MIGRATIONS: &[&str] = &[
    CREATE_IMPORT_BATCHES,
    CREATE_LOG_ENTRIES,
    CREATE_DAILY_QUERY_COUNTS,
    CREATE_DAILY_USER_QUERY_COUNTS,
    CREATE_DAILY_AFFECTED_ROWS,
    CREATE_DAILY_USER_AFFECTED_ROWS,
    CREATE_HOURLY_QUERY_VOLUME,
    CREATE_SUSPICIOUS_QUERIES,
    CREATE_SECURITY_EVENTS,
    CREATE_DML_ACTIVITY,
    CREATE_DDL_ACTIVITY,
    CREATE_INDEX_LOG_ENTRIES_BATCH,
    CREATE_INDEX_SUSPICIOUS_BATCH,
    CREATE_INDEX_SECURITY_BATCH,
    CREATE_INDEX_DML_BATCH,
    CREATE_INDEX_DDL_BATCH,
];

/// Tables cleared by a fact replacement
pub const FACT_TABLES: &[&str] = &[
    "daily_query_counts",
    "daily_user_query_counts",
    "daily_affected_rows",
    "daily_user_affected_rows",
    "hourly_query_volume",
    "suspicious_queries",
    "security_events",
    "dml_activity",
    "ddl_activity",
];
