//! Shared types for BufferPool specifications
//!
//! These types are used across the CRD definitions and controller logic.
//!
//! # Type Hierarchy
//!
//! - [`ImageSpec`] - Container image reference with pull policy and pull secrets
//! - [`ResourceRequirements`] - CPU and memory requests/limits following Kubernetes conventions
//! - [`BufferStorageConfig`] - The per-ordinal persistent buffer volume
//! - [`ScalingConfig`] / [`DrainConfig`] - Buffer draining on scale-down
//! - [`ExtraVolume`] - Additional volumes mounted into a named container

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Container image reference
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image repository (e.g., "ghcr.io/buffering-dev/buffer-worker")
    pub repository: String,
    /// Image tag
    #[serde(default = "default_tag")]
    pub tag: String,
    /// Kubernetes image pull policy (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
    /// Names of secrets used to pull the image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

impl ImageSpec {
    pub fn new(repository: &str, tag: &str) -> Self {
        Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
            pull_policy: None,
            image_pull_secrets: Vec::new(),
        }
    }

    /// Full image reference, `repository:tag`
    pub fn repository_with_tag(&self) -> String {
        if self.tag.is_empty() {
            self.repository.clone()
        } else {
            format!("{}:{}", self.repository, self.tag)
        }
    }
}

fn default_tag() -> String {
    "latest".to_string()
}

pub(crate) fn default_worker_image() -> ImageSpec {
    ImageSpec::new("ghcr.io/buffering-dev/buffer-worker", "v0.4.2")
}

fn default_drain_watch_image() -> ImageSpec {
    ImageSpec::new("ghcr.io/buffering-dev/drain-watch", "v0.4.2")
}

fn default_pause_image() -> ImageSpec {
    ImageSpec::new("registry.k8s.io/pause", "3.9")
}

fn default_metrics_image() -> ImageSpec {
    ImageSpec::new("prom/node-exporter", "v1.8.2")
}

/// Resource requirements for a container
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Minimum resources requested
    pub requests: ResourceSpec,
    /// Maximum resources allowed
    pub limits: ResourceSpec,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            requests: ResourceSpec {
                cpu: "100m".to_string(),
                memory: "256Mi".to_string(),
            },
            limits: ResourceSpec {
                cpu: "1".to_string(),
                memory: "1Gi".to_string(),
            },
        }
    }
}

/// Resource specification for CPU and memory
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ResourceSpec {
    /// CPU cores (e.g., "500m", "2")
    pub cpu: String,
    /// Memory (e.g., "1Gi", "4Gi")
    pub memory: String,
}

/// The per-ordinal buffer volume, provisioned through the StatefulSet's
/// volume claim template.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BufferStorageConfig {
    /// Claim template name. Qualified with the pool name to form the volume name
    /// used in pod specs.
    #[serde(default = "default_claim_name")]
    pub claim_name: String,
    /// Storage class (empty uses the cluster default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Requested size (e.g., "10Gi")
    #[serde(default = "default_buffer_size")]
    pub size: String,
}

impl Default for BufferStorageConfig {
    fn default() -> Self {
        Self {
            claim_name: default_claim_name(),
            storage_class: None,
            size: default_buffer_size(),
        }
    }
}

fn default_claim_name() -> String {
    "buffer".to_string()
}

fn default_buffer_size() -> String {
    "10Gi".to_string()
}

/// Rotation of the worker's own output log files.
///
/// Drain jobs never rotate, so this is stripped from the data-mover container.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogRotateConfig {
    /// Directory holding the output log files
    pub path: String,
    /// Rotate once a file exceeds this size (e.g., "100M")
    #[serde(default = "default_rotate_size")]
    pub max_size: String,
    /// Rotated files to keep
    #[serde(default = "default_rotate_files")]
    pub max_files: i32,
}

fn default_rotate_size() -> String {
    "100M".to_string()
}

fn default_rotate_files() -> i32 {
    5
}

/// Sidecar exporting buffer volume usage metrics
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BufferVolumeMetricsConfig {
    #[serde(default = "default_metrics_image")]
    pub image: ImageSpec,
    #[serde(default = "default_metrics_port")]
    pub port: i32,
}

impl Default for BufferVolumeMetricsConfig {
    fn default() -> Self {
        Self {
            image: default_metrics_image(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> i32 {
    9200
}

/// Scaling behaviour of the worker pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScalingConfig {
    #[serde(default)]
    pub drain: DrainConfig,
}

/// Draining of buffer volumes left behind by scale-down
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DrainConfig {
    /// Enable drain jobs for unused buffer volumes
    #[serde(default)]
    pub enabled: bool,
    /// Image of the drain-watch container that signals completion
    #[serde(default = "default_drain_watch_image")]
    pub image: ImageSpec,
    /// Image of the placeholder pod reserving the ordinal during a drain
    #[serde(default = "default_pause_image")]
    pub pause_image: ImageSpec,
    /// Annotations added to drain job pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    /// Job backoff limit; a failed drain is never retried by the operator itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_limit: Option<i32>,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            image: default_drain_watch_image(),
            pause_image: default_pause_image(),
            annotations: None,
            backoff_limit: None,
        }
    }
}

/// Pod security settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityConfig {
    /// Service account for worker and drain pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_security_context: Option<PodSecurityContextConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurityContextConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
}

/// A volume mounted into one container of the worker (and drain) pods
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtraVolume {
    /// Volume name in the pod spec
    pub volume_name: String,
    /// Mount path inside the container
    pub path: String,
    /// Container receiving the mount
    pub container_name: String,
    #[serde(default)]
    pub read_only: bool,
    pub source: ExtraVolumeSource,
}

/// Exactly one of the sources must be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtraVolumeSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
    #[serde(default)]
    pub empty_dir: bool,
}

impl ExtraVolumeSource {
    pub(crate) fn configured_sources(&self) -> usize {
        [
            self.persistent_volume_claim.is_some(),
            self.config_map.is_some(),
            self.secret.is_some(),
            self.host_path.is_some(),
            self.empty_dir,
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// Per-state volume counts reported in the BufferPool status
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCounts {
    pub in_use: i32,
    pub available: i32,
    pub draining: i32,
    pub drained: i32,
    pub failed: i32,
}

/// Condition for status reporting (Kubernetes convention)
///
/// # Examples
///
/// ```rust,no_run
/// use buffer_drain_operator::crd::Condition;
///
/// let condition = Condition::ready(true, "Reconciled", "Pool is ready");
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "Draining", "DrainFailed")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new Ready condition
    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }
}
