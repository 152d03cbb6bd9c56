//! Kubernetes resource builders for BufferPool
//!
//! This module names, labels and builds the worker resources (StatefulSet,
//! headless Service, worker container) shared by the pool itself and by the
//! drain jobs that reuse the worker container.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    HostPathVolumeSource, LocalObjectReference, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec,
    PodTemplateSpec, ResourceRequirements as K8sResources, SecretVolumeSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{info, instrument};

use crate::crd::{BufferPool, BufferPoolSpec, ExtraVolume};
use crate::error::{Error, Result};

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "buffer-drain-operator";

/// Mount path of the buffer volume in workers and drain jobs
pub const BUFFER_PATH: &str = "/buffers";

/// Mount path of the worker configuration
const CONFIG_PATH: &str = "/etc/buffer-worker";

pub const WORKER_CONTAINER_NAME: &str = "buffer-worker";
pub const METRICS_CONTAINER_NAME: &str = "buffer-metrics";

const INGEST_PORT: i32 = 24240;

/// Label key opting a volume out of draining when set to `no`
pub const DRAIN_OPT_OUT_LABEL: &str = "buffering.dev/drain";

/// Role of a pod or volume within a pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    Worker,
    Drainer,
    Placeholder,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Worker => "worker",
            Component::Drainer => "drainer",
            Component::Placeholder => "placeholder",
        }
    }
}

// ============================================================================
// Names and labels
// ============================================================================

/// Get the standard labels for one component of a pool
pub fn pool_labels(pool: &BufferPool, component: Component) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        "buffer-worker".to_string(),
    );
    labels.insert("app.kubernetes.io/instance".to_string(), pool.name_any());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        component.as_str().to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels
}

/// Render labels as an equality-based label selector
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector for buffer volumes that have not opted out of draining
pub fn drainable_volume_selector(pool: &BufferPool) -> String {
    format!(
        "{},{}!=no",
        label_selector(&pool_labels(pool, Component::Worker)),
        DRAIN_OPT_OUT_LABEL
    )
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(pool: &BufferPool) -> OwnerReference {
    OwnerReference {
        api_version: BufferPool::api_version(&()).to_string(),
        kind: BufferPool::kind(&()).to_string(),
        name: pool.name_any(),
        uid: pool.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn statefulset_name(pool: &BufferPool) -> String {
    format!("{}-buffer", pool.name_any())
}

fn headless_service_name(pool: &BufferPool) -> String {
    format!("{}-headless", statefulset_name(pool))
}

/// Name of the buffer volume in pod specs, which is also the claim template name
pub fn buffer_volume_name(pool: &BufferPool) -> String {
    format!("{}-{}", pool.name_any(), pool.spec.buffer_storage.claim_name)
}

/// PVC name the StatefulSet controller derives for an ordinal
pub fn volume_claim_name(pool: &BufferPool, ordinal: i32) -> String {
    format!(
        "{}-{}-{}",
        buffer_volume_name(pool),
        statefulset_name(pool),
        ordinal
    )
}

/// Ordinal encoded in the trailing `-<n>` of a StatefulSet-derived name
pub fn ordinal_of(name: &str) -> Option<u32> {
    name.rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse().ok())
}

pub fn namespace_of(pool: &BufferPool) -> String {
    pool.namespace().unwrap_or_else(|| "default".to_string())
}

// ============================================================================
// Worker container and pod
// ============================================================================

/// Build the buffering worker container.
///
/// The buffer volume mount is added by the caller, since the StatefulSet and
/// drain jobs bind it differently.
pub fn build_worker_container(spec: &BufferPoolSpec) -> Container {
    let mut requests = BTreeMap::new();
    requests.insert(
        "cpu".to_string(),
        Quantity(spec.resources.requests.cpu.clone()),
    );
    requests.insert(
        "memory".to_string(),
        Quantity(spec.resources.requests.memory.clone()),
    );

    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), Quantity(spec.resources.limits.cpu.clone()));
    limits.insert(
        "memory".to_string(),
        Quantity(spec.resources.limits.memory.clone()),
    );

    let mut env = vec![EnvVar {
        name: "BUFFER_PATH".to_string(),
        value: Some(BUFFER_PATH.to_string()),
        ..Default::default()
    }];
    let mut volume_mounts = Vec::new();

    if spec.config_map.is_some() {
        volume_mounts.push(VolumeMount {
            name: "config".to_string(),
            mount_path: CONFIG_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    if let Some(rotate) = &spec.log_rotate {
        env.extend([
            EnvVar {
                name: "LOGROTATE_PATH".to_string(),
                value: Some(rotate.path.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "LOGROTATE_MAX_SIZE".to_string(),
                value: Some(rotate.max_size.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "LOGROTATE_MAX_FILES".to_string(),
                value: Some(rotate.max_files.to_string()),
                ..Default::default()
            },
        ]);
        volume_mounts.push(VolumeMount {
            name: "output-logs".to_string(),
            mount_path: rotate.path.clone(),
            ..Default::default()
        });
    }

    Container {
        name: WORKER_CONTAINER_NAME.to_string(),
        image: Some(spec.image.repository_with_tag()),
        image_pull_policy: spec.image.pull_policy.clone(),
        env: Some(env),
        ports: Some(vec![ContainerPort {
            name: Some("ingest".to_string()),
            container_port: INGEST_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(K8sResources {
            requests: Some(requests),
            limits: Some(limits),
            ..Default::default()
        }),
        volume_mounts: if volume_mounts.is_empty() {
            None
        } else {
            Some(volume_mounts)
        },
        ..Default::default()
    }
}

/// Sidecar exporting buffer volume usage, if configured
pub fn build_buffer_metrics_container(
    spec: &BufferPoolSpec,
    buffer_volume: &str,
) -> Option<Container> {
    let cfg = spec.buffer_volume_metrics.as_ref()?;
    Some(Container {
        name: METRICS_CONTAINER_NAME.to_string(),
        image: Some(cfg.image.repository_with_tag()),
        image_pull_policy: cfg.image.pull_policy.clone(),
        args: Some(vec![
            "--collector.disable-defaults".to_string(),
            "--collector.filesystem".to_string(),
            format!("--collector.filesystem.mount-points-include={BUFFER_PATH}"),
            format!("--web.listen-address=:{}", cfg.port),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("buffer-metrics".to_string()),
            container_port: cfg.port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: buffer_volume.to_string(),
            mount_path: BUFFER_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    })
}

/// Pod-level volumes shared by workers and drain jobs (buffer volume excluded)
pub fn build_pod_volumes(spec: &BufferPoolSpec) -> Vec<Volume> {
    let mut volumes = Vec::new();
    if let Some(config_map) = &spec.config_map {
        volumes.push(Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(config_map.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }
    if spec.log_rotate.is_some() {
        volumes.push(Volume {
            name: "output-logs".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }
    volumes
}

pub fn build_pod_security_context(spec: &BufferPoolSpec) -> Option<PodSecurityContext> {
    let ctx = spec.security.pod_security_context.as_ref()?;
    Some(PodSecurityContext {
        run_as_non_root: ctx.run_as_non_root,
        run_as_user: ctx.run_as_user,
        run_as_group: ctx.run_as_group,
        fs_group: ctx.fs_group,
        ..Default::default()
    })
}

pub fn build_image_pull_secrets(spec: &BufferPoolSpec) -> Option<Vec<LocalObjectReference>> {
    if spec.image.image_pull_secrets.is_empty() {
        return None;
    }
    Some(
        spec.image
            .image_pull_secrets
            .iter()
            .map(|name| LocalObjectReference {
                name: Some(name.clone()),
            })
            .collect(),
    )
}

/// Service account used by workers and drain jobs
pub fn service_account_name(pool: &BufferPool) -> String {
    pool.spec
        .security
        .service_account
        .clone()
        .unwrap_or_else(|| format!("{}-buffer", pool.name_any()))
}

/// Add an extra volume and its mount to a pod spec.
///
/// Fails when the volume does not declare exactly one source, or when the
/// target container is not part of the pod.
pub fn apply_extra_volume(pod: &mut PodSpec, extra: &ExtraVolume) -> std::result::Result<(), String> {
    let source = &extra.source;
    match source.configured_sources() {
        1 => {}
        0 => return Err(format!("volume {} has no source", extra.volume_name)),
        n => {
            return Err(format!(
                "volume {} declares {n} sources, expected exactly one",
                extra.volume_name
            ))
        }
    }

    let container = pod
        .containers
        .iter_mut()
        .find(|c| c.name == extra.container_name)
        .ok_or_else(|| {
            format!(
                "volume {} targets container {} which is not part of the pod",
                extra.volume_name, extra.container_name
            )
        })?;

    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: extra.volume_name.clone(),
            mount_path: extra.path.clone(),
            read_only: extra.read_only.then_some(true),
            ..Default::default()
        });

    let volume = Volume {
        name: extra.volume_name.clone(),
        persistent_volume_claim: source.persistent_volume_claim.as_ref().map(|claim| {
            PersistentVolumeClaimVolumeSource {
                claim_name: claim.clone(),
                read_only: extra.read_only.then_some(true),
            }
        }),
        config_map: source.config_map.as_ref().map(|name| ConfigMapVolumeSource {
            name: Some(name.clone()),
            ..Default::default()
        }),
        secret: source.secret.as_ref().map(|name| SecretVolumeSource {
            secret_name: Some(name.clone()),
            ..Default::default()
        }),
        host_path: source.host_path.as_ref().map(|path| HostPathVolumeSource {
            path: path.clone(),
            ..Default::default()
        }),
        empty_dir: source.empty_dir.then(EmptyDirVolumeSource::default),
        ..Default::default()
    };
    pod.volumes.get_or_insert_with(Vec::new).push(volume);

    Ok(())
}

// ============================================================================
// StatefulSet
// ============================================================================

/// Ensure the worker StatefulSet is applied
#[instrument(skip(client, pool), fields(name = %pool.name_any(), namespace = pool.namespace()))]
pub async fn ensure_statefulset(client: &Client, pool: &BufferPool) -> Result<()> {
    let namespace = namespace_of(pool);
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), &namespace);
    let name = statefulset_name(pool);

    let statefulset = build_statefulset(pool)?;

    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&statefulset),
    )
    .await?;
    info!("StatefulSet {} applied", name);

    Ok(())
}

pub fn build_statefulset(pool: &BufferPool) -> Result<StatefulSet> {
    let spec = &pool.spec;
    let labels = pool_labels(pool, Component::Worker);
    let name = statefulset_name(pool);
    let buffer_volume = buffer_volume_name(pool);

    let mut worker = build_worker_container(spec);
    if !spec.disable_pvc {
        worker
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: buffer_volume.clone(),
                mount_path: BUFFER_PATH.to_string(),
                ..Default::default()
            });
    }

    let mut containers = vec![worker];
    if !spec.disable_pvc {
        containers.extend(build_buffer_metrics_container(spec, &buffer_volume));
    }

    let volumes = build_pod_volumes(spec);
    let mut pod_spec = PodSpec {
        containers,
        volumes: if volumes.is_empty() { None } else { Some(volumes) },
        service_account_name: Some(service_account_name(pool)),
        image_pull_secrets: build_image_pull_secrets(spec),
        node_selector: spec.node_selector.clone(),
        tolerations: spec.tolerations.clone(),
        affinity: spec.affinity.clone(),
        topology_spread_constraints: spec.topology_spread_constraints.clone(),
        priority_class_name: spec.priority_class_name.clone(),
        security_context: build_pod_security_context(spec),
        ..Default::default()
    };
    for extra in &spec.extra_volumes {
        apply_extra_volume(&mut pod_spec, extra).map_err(Error::ConfigError)?;
    }

    let volume_claim_templates = if spec.disable_pvc {
        None
    } else {
        let mut requests = BTreeMap::new();
        requests.insert(
            "storage".to_string(),
            Quantity(spec.buffer_storage.size.clone()),
        );
        Some(vec![PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(buffer_volume),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                storage_class_name: spec.buffer_storage.storage_class.clone(),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: None,
        }])
    };

    Ok(StatefulSet {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: pool.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(pool)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: if spec.autoscaled {
                None
            } else {
                Some(spec.replicas)
            },
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            service_name: headless_service_name(pool),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            volume_claim_templates,
            ..Default::default()
        }),
        status: None,
    })
}

// ============================================================================
// Headless Service
// ============================================================================

/// Ensure the headless Service governing the StatefulSet exists
#[instrument(skip(client, pool), fields(name = %pool.name_any(), namespace = pool.namespace()))]
pub async fn ensure_headless_service(client: &Client, pool: &BufferPool) -> Result<()> {
    let namespace = namespace_of(pool);
    let api: Api<Service> = Api::namespaced(client.clone(), &namespace);
    let name = headless_service_name(pool);

    let service = build_headless_service(pool);

    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&service),
    )
    .await?;

    Ok(())
}

fn build_headless_service(pool: &BufferPool) -> Service {
    let labels = pool_labels(pool, Component::Worker);
    Service {
        metadata: ObjectMeta {
            name: Some(headless_service_name(pool)),
            namespace: pool.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(pool)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("ingest".to_string()),
                port: INGEST_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}
