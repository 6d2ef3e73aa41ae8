//! Web server module
//!
//! JSON trigger surface over the ingestion pipeline. Mutating calls share one
//! lock so a process never runs two ingestions at once.

mod routes;

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::ingest::Ingestor;

pub struct AppState {
    pub db: Database,
    pub ingestor: Mutex<Ingestor<Database>>,
}

impl AppState {
    pub fn new(db: Database, ingestor: Ingestor<Database>) -> Self {
        Self {
            db,
            ingestor: Mutex::new(ingestor),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/import", post(routes::import))
        .route("/api/imports", get(routes::list_imports))
        .route("/api/imports/:id", delete(routes::delete_import))
        .route("/api/imports/:id/facts", get(routes::import_facts))
        .route("/api/imports/:id/reaggregate", post(routes::reaggregate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(config: &Config, db: Database, ingestor: Ingestor<Database>) -> Result<()> {
    let state = Arc::new(AppState::new(db, ingestor));
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    info!("Web server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
