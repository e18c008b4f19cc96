use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::Method,
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::debug;

use crate::aggregate::SummaryView;
use crate::data::observation::MetricKind;
use crate::data::registry::DataRegistry;
use crate::odata::{execute, QueryOptions};
use crate::server::api::{self, HealthResponse, ServiceDocument, SummaryResponse};
use crate::server::error::AppError;

/// Shared handler state. The registry is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DataRegistry>,
    pub max_top: usize,
}

pub fn router(state: AppState, odata_prefix: &str) -> Router {
    let prefix = odata_prefix.trim_matches('/');

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route(&format!("/{prefix}"), get(service_document))
        .route(&format!("/{prefix}/:set"), get(entity_set))
        .route("/api/health", get(health))
        .route("/api/summary/:view", get(summary))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn service_document() -> Json<ServiceDocument> {
    Json(api::service_document())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(api::health_payload(&state.registry))
}

async fn entity_set(
    State(state): State<AppState>,
    Path(set): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, AppError> {
    let metric = MetricKind::from_entity_set(&set)
        .ok_or_else(|| AppError::NotFound(format!("Unknown entity set '{set}'")))?;

    let options = QueryOptions::from_params(
        params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        state.max_top,
    )?;
    debug!(%metric, ?options, "executing query");

    // Filtering and sorting run on the rayon pool; keep them off the async workers.
    let registry = state.registry.clone();
    let body = tokio::task::spawn_blocking(move || {
        execute(registry.get(metric).observations(), &options).to_json()
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(body))
}

async fn summary(
    State(state): State<AppState>,
    Path(view): Path<String>,
) -> Result<Json<SummaryResponse>, AppError> {
    let view: SummaryView = view.parse().map_err(AppError::NotFound)?;
    debug!(%view, "computing summary");

    let registry = state.registry.clone();
    let payload = tokio::task::spawn_blocking(move || api::summary_payload(&registry, view))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(payload))
}
