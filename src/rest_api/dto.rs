//! Response bodies of the REST API

use serde::Serialize;

use crate::crd::VolumeCounts;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub name: String,
    pub namespace: String,
    pub phase: String,
    pub replicas: i32,
    pub drain_enabled: bool,
    pub volumes: VolumeCounts,
}

#[derive(Debug, Serialize)]
pub struct PoolListResponse {
    pub items: Vec<PoolSummary>,
    pub total: usize,
}
