//! BufferPool Custom Resource Definition
//!
//! A BufferPool is a StatefulSet of log buffering workers, each with its own
//! persistent buffer volume. When the pool scales down, the volumes of the
//! removed ordinals are drained by one-shot jobs before they can be released.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Toleration, TopologySpreadConstraint};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    default_worker_image, BufferStorageConfig, BufferVolumeMetricsConfig, Condition, ExtraVolume,
    ImageSpec, LogRotateConfig, ResourceRequirements, ScalingConfig, SecurityConfig, VolumeCounts,
};

/// Structured validation error for `BufferPoolSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
}

impl SpecValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "buffering.dev",
    version = "v1alpha1",
    kind = "BufferPool",
    namespaced,
    status = "BufferPoolStatus",
    shortname = "bp",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Draining","type":"integer","jsonPath":".status.volumes.draining"}"#,
    printcolumn = r#"{"name":"Drained","type":"integer","jsonPath":".status.volumes.drained"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BufferPoolSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Leave `spec.replicas` of the StatefulSet to an external autoscaler
    #[serde(default)]
    pub autoscaled: bool,

    #[serde(default = "default_worker_image")]
    pub image: ImageSpec,

    #[serde(default)]
    pub resources: ResourceRequirements,

    #[serde(default)]
    pub buffer_storage: BufferStorageConfig,

    /// Disables the buffer volume claim template (and with it, draining)
    #[serde(default)]
    pub disable_pvc: bool,

    /// ConfigMap holding the worker configuration, mounted at /etc/buffer-worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_rotate: Option<LogRotateConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_volume_metrics: Option<BufferVolumeMetricsConfig>,

    #[serde(default)]
    pub scaling: ScalingConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub tolerations: Option<Vec<Toleration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub topology_spread_constraints: Option<Vec<TopologySpreadConstraint>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_volumes: Vec<ExtraVolume>,
}

fn default_replicas() -> i32 {
    1
}

impl Default for BufferPoolSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            autoscaled: false,
            image: default_worker_image(),
            resources: ResourceRequirements::default(),
            buffer_storage: BufferStorageConfig::default(),
            disable_pvc: false,
            config_map: None,
            log_rotate: None,
            buffer_volume_metrics: None,
            scaling: ScalingConfig::default(),
            security: SecurityConfig::default(),
            node_selector: None,
            tolerations: None,
            affinity: None,
            topology_spread_constraints: None,
            priority_class_name: None,
            extra_volumes: Vec::new(),
        }
    }
}

impl BufferPoolSpec {
    /// Validate the spec
    ///
    /// # Errors
    ///
    /// Returns every validation error found, not just the first one.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();

        if self.replicas < 0 {
            errors.push(SpecValidationError::new(
                "spec.replicas",
                "replicas must not be negative",
            ));
        }

        if self.image.repository.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.image.repository",
                "worker image repository must be set",
            ));
        }

        if !is_dns_label(&self.buffer_storage.claim_name) {
            errors.push(SpecValidationError::new(
                "spec.bufferStorage.claimName",
                "claim name must be a lowercase RFC 1123 label",
            ));
        }

        if self.scaling.drain.enabled {
            if self.scaling.drain.image.repository.trim().is_empty() {
                errors.push(SpecValidationError::new(
                    "spec.scaling.drain.image.repository",
                    "drain-watch image repository must be set when draining is enabled",
                ));
            }
            if let Some(limit) = self.scaling.drain.backoff_limit {
                if limit < 0 {
                    errors.push(SpecValidationError::new(
                        "spec.scaling.drain.backoffLimit",
                        "backoff limit must not be negative",
                    ));
                }
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for (i, extra) in self.extra_volumes.iter().enumerate() {
            if !seen.insert(extra.volume_name.as_str()) {
                errors.push(SpecValidationError::new(
                    format!("spec.extraVolumes[{i}].volumeName"),
                    format!("duplicate volume name {}", extra.volume_name),
                ));
            }
            if extra.volume_name == self.buffer_storage.claim_name {
                errors.push(SpecValidationError::new(
                    format!("spec.extraVolumes[{i}].volumeName"),
                    "volume name collides with the buffer volume",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Whether drain jobs should run for this pool
    pub fn drain_enabled(&self) -> bool {
        self.scaling.drain.enabled && !self.disable_pvc
    }
}

fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

/// Status subresource for BufferPool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BufferPoolStatus {
    #[serde(default)]
    pub phase: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Desired replica count observed during the last drain pass
    #[serde(default)]
    pub replicas: i32,

    #[serde(default)]
    pub volumes: VolumeCounts,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
