//! dam-ingest - database activity monitoring log ingestion
//!
//! Picks up audit-log CSV exports and turns them into per-batch facts:
//! - Daily, per-user and hourly query volume
//! - Affected-row totals
//! - Suspicious queries, security events, DML/DDL activity
//!
//! `dam-ingest` serves the JSON trigger API; `dam-ingest ingest` runs a single
//! ingestion and exits, for use from a scheduler.

mod config;
mod db;
mod ingest;
mod web;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let config = config::Config::load()?;

    // RUST_LOG wins over the configured level.
    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Configuration loaded");

    let db = db::Database::new(&config.database).await?;
    db.run_migrations().await?;
    info!("Database initialized");

    let ingestor = ingest::Ingestor::new(config.ingest.clone(), db.clone());

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => web::start_server(&config, db, ingestor).await,
        Some("ingest") => {
            let outcome = ingestor.ingest().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if outcome.is_failure() {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(other) => anyhow::bail!("Unknown command '{}'. Usage: dam-ingest [serve|ingest]", other),
    }
}
