//! HTTP surface over the informer manager

use crate::error::ApiError;
use crate::kubernetes::directory::ClusterDirectory;
use crate::kubernetes::informer::ClusterInformerManager;
use crate::kubernetes::snapshot::{ClusterSnapshot, SnapshotAggregator};
use crate::kubernetes::types::CacheReadiness;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fleetdeck_common::ClusterId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Upper bound for a caller supplied `timeout_secs`
const MAX_SNAPSHOT_TIMEOUT_SECS: u64 = 300;

/// Shared application state
pub struct AppState {
    pub manager: Arc<ClusterInformerManager>,
    pub directory: Arc<dyn ClusterDirectory>,
    /// Cancelled on shutdown so in-flight waits return promptly
    pub shutdown: CancellationToken,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/k8s/clusters", get(list_caches))
        .route(
            "/api/k8s/clusters/:cluster_id/cache",
            get(get_cache_status).delete(stop_cache),
        )
        .route("/api/k8s/clusters/:cluster_id/cache/rotate", post(rotate_cache))
        .route("/api/k8s/clusters/:cluster_id/snapshot", get(get_snapshot))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub caches: usize,
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        caches: state.manager.cluster_ids().len(),
    })
}

async fn list_caches(State(state): State<Arc<AppState>>) -> Json<Vec<CacheReadiness>> {
    let mut caches: Vec<CacheReadiness> = state
        .manager
        .cluster_ids()
        .iter()
        .filter_map(|id| state.manager.readiness(id))
        .collect();
    caches.sort_by(|a, b| a.cluster_id.cmp(&b.cluster_id));
    Json(caches)
}

/// 200 when every required kind has synced, 503 while warming
async fn get_cache_status(
    State(state): State<Arc<AppState>>,
    Path(cluster_id): Path<String>,
) -> Result<Response, ApiError> {
    let cluster_id = ClusterId::from(cluster_id);
    let readiness = state
        .manager
        .readiness(&cluster_id)
        .ok_or_else(|| ApiError::NotFound(format!("No cache for cluster '{}'", cluster_id)))?;

    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(readiness)).into_response())
}

async fn stop_cache(
    State(state): State<Arc<AppState>>,
    Path(cluster_id): Path<String>,
) -> StatusCode {
    state.manager.stop_for_cluster(&ClusterId::from(cluster_id)).await;
    StatusCode::NO_CONTENT
}

async fn rotate_cache(
    State(state): State<Arc<AppState>>,
    Path(cluster_id): Path<String>,
) -> Result<(StatusCode, Json<CacheReadiness>), ApiError> {
    let record = state.directory.get(&ClusterId::from(cluster_id)).await?;
    let cache = state.manager.rotate_credentials(&record).await?;
    info!(cluster_id = %record.id, "Cache rebuilt with rotated credentials");
    Ok((StatusCode::ACCEPTED, Json(cache.readiness())))
}

#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// Overrides the configured sync timeout
    pub timeout_secs: Option<u64>,
}

async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(cluster_id): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<ClusterSnapshot>, ApiError> {
    let cluster_id = ClusterId::from(cluster_id);
    if query.timeout_secs.is_some_and(|secs| secs > MAX_SNAPSHOT_TIMEOUT_SECS) {
        return Err(ApiError::BadRequest(format!(
            "timeout_secs must not exceed {}",
            MAX_SNAPSHOT_TIMEOUT_SECS
        )));
    }
    let timeout = query
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.manager.config().sync_timeout());

    let cache = state
        .manager
        .ensure_and_wait_by_id(&cluster_id, timeout, &state.shutdown.child_token())
        .await?;
    Ok(Json(SnapshotAggregator::from_cache(&cache)))
}
