use crate::error::ApiError;
use audit_core::{
    ChainStats, ExportFormat, HistoryFilter, HistoryPage, Ledger, OperationReceipt, SealReport,
    ValidationReport, VerificationReport,
};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/operations", post(log_operation).get(history))
        .route("/operations/{id}/verify", get(verify))
        .route("/stats", get(stats))
        .route("/export", get(export))
        .route("/chain/validate", get(validate))
        .route("/seal", post(seal))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub operation_type: String,
    #[serde(default)]
    pub payload: Value,
    pub actor_id: String,
    #[serde(default)]
    pub subject_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SealQuery {
    /// Wait for a running seal instead of failing with 409.
    pub wait: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct SealResponse {
    pub sealed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SealReport>,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let ledger = &state.ledger;
    Json(json!({
        "status": "ok",
        "chainLength": ledger.chain_length(),
        "pending": ledger.pending().len(),
        "sealer": ledger.sealer_state(),
    }))
}

async fn log_operation(
    State(state): State<AppState>,
    Json(req): Json<OperationRequest>,
) -> (StatusCode, Json<OperationReceipt>) {
    let receipt = state
        .ledger
        .log_operation(
            &req.operation_type,
            &req.payload,
            &req.actor_id,
            req.subject_id.as_deref(),
        )
        .await;
    let status = if receipt.success {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(receipt))
}

async fn history(
    State(state): State<AppState>,
    Query(filter): Query<HistoryFilter>,
) -> Json<HistoryPage> {
    Json(state.ledger.history(&filter))
}

async fn verify(State(state): State<AppState>, Path(id): Path<String>) -> Json<VerificationReport> {
    Json(state.ledger.verify(&id))
}

/// Run a full-chain read on the blocking pool; both views revalidate every block.
async fn blocking<T, F>(ledger: Ledger, read: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Ledger) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || read(&ledger))
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))
}

async fn stats(State(state): State<AppState>) -> Result<Json<ChainStats>, ApiError> {
    Ok(Json(blocking(state.ledger, Ledger::stats).await?))
}

async fn validate(State(state): State<AppState>) -> Result<Json<ValidationReport>, ApiError> {
    Ok(Json(blocking(state.ledger, Ledger::validate).await?))
}

async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = match query.format.as_deref() {
        Some(raw) => raw
            .parse()
            .map_err(|e: audit_core::LedgerError| ApiError::BadRequest(e.to_string()))?,
        None => ExportFormat::Json,
    };
    let bundle = state.ledger.export(format)?;
    let headers = [
        (header::CONTENT_TYPE, bundle.mime_type),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", bundle.filename),
        ),
    ];
    Ok((headers, bundle.data).into_response())
}

async fn seal(
    State(state): State<AppState>,
    Query(query): Query<SealQuery>,
) -> Result<Json<SealResponse>, ApiError> {
    let report = if query.wait.unwrap_or(true) {
        state.ledger.seal_now().await?
    } else {
        state.ledger.try_seal_now().await?
    };
    Ok(Json(SealResponse {
        sealed: report.is_some(),
        report,
    }))
}
