use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::db::schema::{SchemaSnapshot, TableInfo};
use crate::error::PipelineError;
use crate::pipeline::cache::CacheStats;
use crate::pipeline::orchestrator::{ExecuteOptions, ExecutionOutcome, QueryOptions, QueryOutcome};
use crate::web::state::AppState;

// Query types

#[derive(Debug, Deserialize)]
pub struct NlQueryRequest {
    pub question: String,
    #[serde(flatten)]
    pub options: QueryOptions,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryRequest {
    pub query: String,
    #[serde(flatten)]
    pub options: ExecuteOptions,
}

// Schema types

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub fingerprint: String,
    pub tables: BTreeMap<String, TableInfo>,
    pub relationships: Vec<String>,
}

impl From<&SchemaSnapshot> for SchemaResponse {
    fn from(snapshot: &SchemaSnapshot) -> Self {
        Self {
            fingerprint: snapshot.fingerprint().to_string(),
            tables: snapshot.tables().clone(),
            relationships: snapshot.relationships(),
        }
    }
}

// Cache types

#[derive(Debug, Deserialize)]
pub struct CacheToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub table: String,
    pub removed: usize,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub database: String,
    pub table_count: usize,
    pub llm_backend: String,
    pub model: String,
    pub language: String,
    pub max_attempts: usize,
    pub cache: CacheStats,
}

// API Implementations

fn pipeline_error(e: PipelineError) -> (StatusCode, String) {
    error!("Pipeline error: {}", e);
    let status = match e {
        PipelineError::SchemaFetch(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Translation(ref llm) if llm.is_rate_limited() => {
            StatusCode::TOO_MANY_REQUESTS
        }
        PipelineError::Translation(_) => StatusCode::BAD_GATEWAY,
    };
    (status, e.user_message())
}

pub async fn nl_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NlQueryRequest>,
) -> Result<Json<QueryOutcome>, (StatusCode, String)> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question must not be empty".to_string()));
    }
    debug!("NL-query: {}", question);

    let outcome = state
        .orchestrator
        .query(question, payload.options)
        .await
        .map_err(pipeline_error)?;

    info!(
        "Answered in {} ms (success: {}, from cache: {}, attempts: {})",
        outcome.elapsed_ms, outcome.success, outcome.from_cache, outcome.attempt_count
    );
    Ok(Json(outcome))
}

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteQueryRequest>,
) -> Result<Json<ExecutionOutcome>, (StatusCode, String)> {
    if payload.query.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query must not be empty".to_string()));
    }
    debug!("Executing SQL: {}", payload.query);

    let outcome = state
        .orchestrator
        .execute_sql(&payload.query, payload.options)
        .await
        .map_err(pipeline_error)?;

    Ok(Json(outcome))
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SchemaResponse>, (StatusCode, String)> {
    let snapshot = state.orchestrator.schema().await.map_err(pipeline_error)?;
    Ok(Json(SchemaResponse::from(snapshot.as_ref())))
}

pub async fn refresh_schema(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SchemaResponse>, (StatusCode, String)> {
    let snapshot = state
        .orchestrator
        .refresh_schema()
        .await
        .map_err(pipeline_error)?;
    info!("Schema refreshed, fingerprint {}", snapshot.fingerprint());
    Ok(Json(SchemaResponse::from(snapshot.as_ref())))
}

pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.orchestrator.cache().stats())
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.orchestrator.cache().clear();
    StatusCode::NO_CONTENT
}

pub async fn set_cache_enabled(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CacheToggleRequest>,
) -> Json<CacheStats> {
    let cache = state.orchestrator.cache();
    cache.set_enabled(payload.enabled);
    Json(cache.stats())
}

pub async fn invalidate_table(
    State(state): State<Arc<AppState>>,
    Path(table): Path<String>,
) -> Json<InvalidateResponse> {
    let removed = state.orchestrator.cache().invalidate_by_table(&table);
    Json(InvalidateResponse { table, removed })
}

pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, (StatusCode, String)> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    let snapshot = state.orchestrator.schema().await.map_err(pipeline_error)?;
    let settings = state.orchestrator.settings();

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        database: state.orchestrator.database_name().to_string(),
        table_count: snapshot.tables().len(),
        llm_backend: state.config.llm.backend.clone(),
        model: state.config.llm.model.clone(),
        language: settings.language.to_string(),
        max_attempts: settings.max_attempts,
        cache: state.orchestrator.cache().stats(),
    }))
}
