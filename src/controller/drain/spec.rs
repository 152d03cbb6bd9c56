//! Drain job and placeholder pod builders

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use thiserror::Error;

use crate::controller::resources::{
    apply_extra_volume, buffer_volume_name, build_buffer_metrics_container,
    build_image_pull_secrets, build_pod_security_context, build_pod_volumes,
    build_worker_container, ordinal_of, owner_reference, pool_labels, service_account_name,
    statefulset_name, Component, BUFFER_PATH,
};
use crate::crd::{BufferPool, BufferPoolSpec, DrainConfig};

pub const DRAIN_WATCH_CONTAINER_NAME: &str = "drain-watch";

/// Node selector no node carries, so placeholder pods are never scheduled
pub const PLACEHOLDER_NODE_SELECTOR: (&str, &str) = ("buffering.dev/placeholder", "unschedulable");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("buffer volume claim name is not set")]
    MissingClaimName,

    #[error("cannot derive an ordinal from volume name {0}")]
    NoOrdinal(String),

    #[error("extra volume: {0}")]
    ExtraVolume(String),
}

/// Ordinal suffix shared by the volume, its placeholder and its drain job
fn ordinal_for(pvc: &PersistentVolumeClaim) -> Result<u32, BuildError> {
    let name = pvc.name_any();
    ordinal_of(&name).ok_or(BuildError::NoOrdinal(name))
}

fn object_meta(pool: &BufferPool, name: String, component: Component) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: pool.namespace(),
        labels: Some(pool_labels(pool, component)),
        owner_references: Some(vec![owner_reference(pool)]),
        ..Default::default()
    }
}

pub fn drainer_job_name(pool: &BufferPool, ordinal: u32) -> String {
    format!("{}-{}-drainer", statefulset_name(pool), ordinal)
}

pub fn placeholder_pod_name(pool: &BufferPool, ordinal: u32) -> String {
    format!("{}-{}", statefulset_name(pool), ordinal)
}

/// Build the one-shot job draining `pvc`.
///
/// The data mover is the regular worker container without log rotation,
/// with the volume mounted at the buffer path. The drain-watch container
/// observes the same mount read-only and exits once the buffer is empty.
pub fn drainer_job_for(pool: &BufferPool, pvc: &PersistentVolumeClaim) -> Result<Job, BuildError> {
    let spec = &pool.spec;
    if spec.buffer_storage.claim_name.is_empty() {
        return Err(BuildError::MissingClaimName);
    }
    let ordinal = ordinal_for(pvc)?;
    let buffer_volume = buffer_volume_name(pool);

    let data_mover_spec = without_log_rotate(spec);
    let mut data_mover = build_worker_container(&data_mover_spec);
    data_mover
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: buffer_volume.clone(),
            mount_path: BUFFER_PATH.to_string(),
            ..Default::default()
        });

    let mut containers = vec![
        data_mover,
        drain_watch_container(&spec.scaling.drain, &buffer_volume),
    ];
    containers.extend(build_buffer_metrics_container(spec, &buffer_volume));

    let mut volumes = build_pod_volumes(&data_mover_spec);
    volumes.push(Volume {
        name: buffer_volume,
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: pvc.name_any(),
            ..Default::default()
        }),
        ..Default::default()
    });

    let mut pod_spec = PodSpec {
        containers,
        volumes: Some(volumes),
        service_account_name: Some(service_account_name(pool)),
        image_pull_secrets: build_image_pull_secrets(spec),
        node_selector: spec.node_selector.clone(),
        tolerations: spec.tolerations.clone(),
        affinity: spec.affinity.clone(),
        topology_spread_constraints: spec.topology_spread_constraints.clone(),
        priority_class_name: spec.priority_class_name.clone(),
        security_context: build_pod_security_context(spec),
        restart_policy: Some("Never".to_string()),
        ..Default::default()
    };
    for extra in &spec.extra_volumes {
        apply_extra_volume(&mut pod_spec, extra).map_err(BuildError::ExtraVolume)?;
    }

    Ok(Job {
        metadata: object_meta(pool, drainer_job_name(pool, ordinal), Component::Drainer),
        spec: Some(JobSpec {
            backoff_limit: spec.scaling.drain.backoff_limit,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pool_labels(pool, Component::Drainer)),
                    annotations: spec.scaling.drain.annotations.clone(),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// Build the pod holding the ordinal identity of `pvc` while it drains.
///
/// It carries the exact name the StatefulSet would give that ordinal's pod,
/// which keeps the StatefulSet controller from recreating the worker and
/// claiming the volume mid-drain.
pub fn placeholder_pod_for(pool: &BufferPool, pvc: &PersistentVolumeClaim) -> Result<Pod, BuildError> {
    let ordinal = ordinal_for(pvc)?;
    let pause = &pool.spec.scaling.drain.pause_image;

    Ok(Pod {
        metadata: object_meta(
            pool,
            placeholder_pod_name(pool, ordinal),
            Component::Placeholder,
        ),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "pause".to_string(),
                image: Some(pause.repository_with_tag()),
                image_pull_policy: pause.pull_policy.clone(),
                ..Default::default()
            }],
            image_pull_secrets: build_image_pull_secrets(&pool.spec),
            node_selector: Some(
                [(
                    PLACEHOLDER_NODE_SELECTOR.0.to_string(),
                    PLACEHOLDER_NODE_SELECTOR.1.to_string(),
                )]
                .into(),
            ),
            priority_class_name: pool.spec.priority_class_name.clone(),
            restart_policy: Some("Never".to_string()),
            termination_grace_period_seconds: Some(0),
            ..Default::default()
        }),
        status: None,
    })
}

fn drain_watch_container(cfg: &DrainConfig, buffer_volume: &str) -> Container {
    Container {
        name: DRAIN_WATCH_CONTAINER_NAME.to_string(),
        image: Some(cfg.image.repository_with_tag()),
        image_pull_policy: cfg.image.pull_policy.clone(),
        env: Some(vec![EnvVar {
            name: "BUFFER_PATH".to_string(),
            value: Some(BUFFER_PATH.to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: buffer_volume.to_string(),
            mount_path: BUFFER_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn without_log_rotate(spec: &BufferPoolSpec) -> BufferPoolSpec {
    BufferPoolSpec {
        log_rotate: None,
        ..spec.clone()
    }
}
