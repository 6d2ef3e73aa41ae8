//! HTTP routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::AppState;
use crate::ingest::{IngestOutcome, ResultCode, Status};

/// Envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub status: Status,
    pub message: String,
    pub api_code: ResultCode,
    pub data: Value,
}

type Reply = (StatusCode, Json<ApiResponse>);

fn http_status(code: ResultCode) -> StatusCode {
    match code {
        ResultCode::ImportSuccess
        | ResultCode::ReaggregateSuccess
        | ResultCode::DeleteSuccess
        | ResultCode::QuerySuccess => StatusCode::OK,
        ResultCode::ImportFileNotFound | ResultCode::BatchNotFound => StatusCode::NOT_FOUND,
        ResultCode::ImportInvalidFile => StatusCode::UNPROCESSABLE_ENTITY,
        ResultCode::ImportException
        | ResultCode::ReaggregateException
        | ResultCode::DeleteException
        | ResultCode::QueryException => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply(status: Status, code: ResultCode, message: impl Into<String>, data: Value) -> Reply {
    (
        http_status(code),
        Json(ApiResponse {
            status,
            message: message.into(),
            api_code: code,
            data,
        }),
    )
}

fn outcome_reply(outcome: IngestOutcome) -> Reply {
    let data = json!({
        "inserted_rows": outcome.inserted_rows,
        "batch_id": outcome.batch_id,
        "stage": outcome.stage,
        "archived_to": outcome.archived_to,
    });
    reply(outcome.status, outcome.code, outcome.message, data)
}

fn query_failed(err: anyhow::Error) -> Reply {
    tracing::error!("Query failed: {:#}", err);
    reply(Status::Error, ResultCode::QueryException, "Failed to read import data", json!({}))
}

/// API: Ingest the waiting input file
pub async fn import(State(state): State<Arc<AppState>>) -> Reply {
    let outcome = state.ingestor.lock().await.ingest().await;
    outcome_reply(outcome)
}

/// API: Recompute one batch's facts from its stored rows
pub async fn reaggregate(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Reply {
    let outcome = state.ingestor.lock().await.reaggregate(id).await;
    outcome_reply(outcome)
}

/// API: Delete a batch with all of its rows and facts
pub async fn delete_import(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Reply {
    let outcome = state.ingestor.lock().await.delete_batch(id).await;
    outcome_reply(outcome)
}

/// API: List imported batches, newest first
pub async fn list_imports(State(state): State<Arc<AppState>>) -> Reply {
    match state.db.list_batches().await {
        Ok(batches) => reply(
            Status::Success,
            ResultCode::QuerySuccess,
            format!("{} batches", batches.len()),
            json!({ "batches": batches }),
        ),
        Err(e) => query_failed(e),
    }
}

/// API: Stored facts of one batch
pub async fn import_facts(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Reply {
    let batch = match state.db.get_batch(id).await {
        Ok(Some(batch)) => batch,
        Ok(None) => {
            return reply(
                Status::Error,
                ResultCode::BatchNotFound,
                format!("Batch {id} not found"),
                json!({}),
            )
        }
        Err(e) => return query_failed(e),
    };
    match state.db.load_facts(id).await {
        Ok(facts) => reply(
            Status::Success,
            ResultCode::QuerySuccess,
            format!("Facts for batch {id}"),
            json!({ "batch": batch, "facts": facts }),
        ),
        Err(e) => query_failed(e),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{router, AppState};
    use crate::config::IngestConfig;
    use crate::db::tests::open_test_db;
    use crate::ingest::Ingestor;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(tmp: &TempDir) -> (Router, IngestConfig) {
        let config = IngestConfig {
            input_path: tmp.path().join("input.csv"),
            archive_dir: tmp.path().join("archive"),
            output_dir: tmp.path().join("output"),
            export_csv: false,
        };
        let db = open_test_db(tmp).await;
        let ingestor = Ingestor::new(config.clone(), db.clone());
        (router(Arc::new(AppState::new(db, ingestor))), config)
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn import_without_file_is_404() {
        let tmp = TempDir::new().unwrap();
        let (app, _) = app(&tmp).await;

        let (status, body) = call(&app, "POST", "/api/import").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
        assert_eq!(body["api_code"], "IMPORT_FILE_NOT_FOUND");
        assert_eq!(body["data"]["inserted_rows"], 0);
    }

    #[tokio::test]
    async fn import_list_facts_delete() {
        let tmp = TempDir::new().unwrap();
        let (app, config) = app(&tmp).await;
        std::fs::write(
            &config.input_path,
            "Time Group - 1 Minute,User,Event Type,Object,Affected Rows,Response Size,Query\n\
             02/26/2025 11:59:00 PM,alice,Query,,1,0,DELETE FROM Customers WHERE id=1\n",
        )
        .unwrap();

        let (status, body) = call(&app, "POST", "/api/import").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["api_code"], "IMPORT_SUCCESS");
        assert_eq!(body["data"]["inserted_rows"], 1);
        let id = body["data"]["batch_id"].as_i64().unwrap();

        let (status, body) = call(&app, "GET", "/api/imports").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["batches"][0]["filename"], "input.csv");
        assert_eq!(body["data"]["batches"][0]["row_count"], 1);

        let (status, body) = call(&app, "GET", &format!("/api/imports/{id}/facts")).await;
        assert_eq!(status, StatusCode::OK);
        let facts = &body["data"]["facts"];
        assert_eq!(facts["hourly_query_volume"][0]["hour"], 23);
        assert_eq!(facts["hourly_query_volume"][0]["date"], "2025-02-26");
        assert_eq!(facts["dml_activity"][0]["table_name"], "Customers");

        let (status, body) = call(&app, "POST", &format!("/api/imports/{id}/reaggregate")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["api_code"], "REAGGREGATE_SUCCESS");

        let (status, body) = call(&app, "DELETE", &format!("/api/imports/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["api_code"], "DELETE_SUCCESS");
        assert!(body["data"]["stage"].is_null());
        let (status, body) = call(&app, "DELETE", &format!("/api/imports/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["api_code"], "BATCH_NOT_FOUND");

        let (status, _) = call(&app, "GET", &format!("/api/imports/{id}/facts")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
