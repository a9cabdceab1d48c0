use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::indexing::{JobStatus, QueuedJob};
use crate::metrics::UPTIME_SECONDS;
use crate::search::{ResolvedConfig, SearchRequest};
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.search.backend().name().to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
    pub uptime_seconds: u64,
}

/// Run a search.
///
/// Every query pair other than the reserved keys (`q`, `sort`, `dateFrom`,
/// `dateTo`, `size`, `offset`, `context`, `locale`) selects a filter value;
/// repeated pairs select several values.
pub async fn search(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let request = SearchRequest::from_query_pairs(pairs);
    let response = state.search.search(&request).await;
    no_cache(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ConfigQuery {
    pub context: Option<String>,
}

/// Resolved filter configuration for a search context
pub async fn search_config(
    State(state): State<AppState>,
    Query(query): Query<ConfigQuery>,
) -> Response {
    let config: Arc<ResolvedConfig> = state.search.resolved_config(query.context.as_deref()).await;
    no_cache(Json(config.as_ref().clone()))
}

/// Progress of the scheduled reindex job
pub async fn reindex_status(State(state): State<AppState>) -> Result<Json<ReindexStatusResponse>> {
    let host = state
        .reindex
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Reindexing is not enabled".to_string()))?;

    let response = match host.current().await? {
        None => ReindexStatusResponse::idle(host.job().title()),
        Some(QueuedJob::Pending { start_after }) => ReindexStatusResponse {
            next_start: Some(start_after),
            ..ReindexStatusResponse::idle(host.job().title())
        },
        Some(QueuedJob::Active { state }) => ReindexStatusResponse {
            title: host.job().title().to_string(),
            status: Some(state.status()),
            current_step: state.current_step,
            total_steps: state.total_steps,
            is_complete: state.is_complete,
            messages: state.messages,
            next_start: None,
        },
    };
    Ok(Json(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexStatusResponse {
    pub title: String,
    pub status: Option<JobStatus>,
    pub current_step: u64,
    pub total_steps: u64,
    pub is_complete: bool,
    pub messages: Vec<String>,
    pub next_start: Option<DateTime<Utc>>,
}

impl ReindexStatusResponse {
    fn idle(title: &str) -> Self {
        Self {
            title: title.to_string(),
            status: None,
            current_step: 0,
            total_steps: 0,
            is_complete: false,
            messages: Vec::new(),
            next_start: None,
        }
    }
}

/// Prometheus metrics endpoint
///
/// Returns metrics in Prometheus text exposition format
pub async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    if !state.metrics_enabled {
        return (StatusCode::NOT_FOUND, "metrics disabled\n".to_string());
    }
    UPTIME_SECONDS.set(state.started_at.elapsed().as_secs_f64());
    (StatusCode::OK, crate::metrics::gather_metrics())
}

fn no_cache(body: Json<impl Serialize>) -> Response {
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    response
}
