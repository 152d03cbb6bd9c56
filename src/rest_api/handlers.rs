//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::{api::Api, ResourceExt};
use tracing::{error, instrument};

use crate::controller::ControllerState;
use crate::crd::BufferPool;

use super::dto::{ErrorResponse, HealthResponse, PoolListResponse, PoolSummary};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Prometheus text exposition of the operator metrics
pub async fn metrics() -> Result<String, StatusCode> {
    use prometheus_client::encoding::text::encode;

    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

pub(crate) fn summarize(pool: &BufferPool) -> PoolSummary {
    let status = pool.status.clone().unwrap_or_default();
    PoolSummary {
        name: pool.name_any(),
        namespace: pool.namespace().unwrap_or_default(),
        phase: if status.phase.is_empty() {
            "Unknown".to_string()
        } else {
            status.phase
        },
        replicas: status.replicas,
        drain_enabled: pool.spec.drain_enabled(),
        volumes: status.volumes,
    }
}

fn api_error(status: StatusCode, error: &str, e: impl std::fmt::Display) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: e.to_string(),
        }),
    )
}

/// List all BufferPools the operator can see
#[instrument(skip(state))]
pub async fn list_pools(
    State(state): State<Arc<ControllerState>>,
) -> Result<Json<PoolListResponse>, ApiError> {
    let api: Api<BufferPool> = match &state.namespace {
        Some(ns) => Api::namespaced(state.client.clone(), ns),
        None => Api::all(state.client.clone()),
    };

    let pools = api.list(&Default::default()).await.map_err(|e| {
        error!("Failed to list BufferPools: {:?}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "list_failed", e)
    })?;

    let items: Vec<PoolSummary> = pools.items.iter().map(summarize).collect();
    Ok(Json(PoolListResponse {
        total: items.len(),
        items,
    }))
}

/// Get one BufferPool
#[instrument(skip(state))]
pub async fn get_pool(
    State(state): State<Arc<ControllerState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<PoolSummary>, ApiError> {
    let api: Api<BufferPool> = Api::namespaced(state.client.clone(), &namespace);

    match api.get_opt(&name).await {
        Ok(Some(pool)) => Ok(Json(summarize(&pool))),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("BufferPool {namespace}/{name} not found"),
        )),
        Err(e) => {
            error!("Failed to get BufferPool {}/{}: {:?}", namespace, name, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "get_failed", e))
        }
    }
}
