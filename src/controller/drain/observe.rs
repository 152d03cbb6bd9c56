//! Observation gathering for a drain pass
//!
//! Reads everything a pass decides on, before any action is taken. A failed
//! read aborts the pass; nothing is ever decided on a partial snapshot.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodSpec};
use kube::ResourceExt;
use tracing::{debug, warn};

use super::state::{DrainStatus, JobPhase, VolumeObservation};
use crate::controller::replicas::ReplicaCountProvider;
use crate::controller::resources::{
    buffer_volume_name, drainable_volume_selector, label_selector, namespace_of, ordinal_of,
    pool_labels, volume_claim_name, Component,
};
use crate::controller::store::DrainStore;
use crate::crd::BufferPool;
use crate::error::{Error, Result};

/// Snapshot of the world taken at the start of a pass
#[derive(Clone, Debug, Default)]
pub struct Observation {
    /// Volumes eligible for draining
    pub volumes: Vec<PersistentVolumeClaim>,
    /// Volume names referenced by a worker pod or reserved for a desired ordinal
    pub in_use: BTreeSet<String>,
    pub replicas: i32,
    /// Drain jobs keyed by the volume they target
    pub jobs: BTreeMap<String, Job>,
    /// Ordinals held by a placeholder pod that is not terminating
    pub placeholders: BTreeSet<u32>,
}

impl Observation {
    /// Reduce the snapshot to what the decision function needs for one volume
    pub fn volume(&self, pvc: &PersistentVolumeClaim) -> VolumeObservation {
        let name = pvc.name_any();
        VolumeObservation {
            drain_status: DrainStatus::from_labels(pvc.labels()),
            in_use: self.in_use.contains(&name),
            job: self.jobs.get(&name).map(JobPhase::of),
            placeholder: ordinal_of(&name).is_some_and(|o| self.placeholders.contains(&o)),
        }
    }

    pub fn job_for(&self, volume: &str) -> Option<&Job> {
        self.jobs.get(volume)
    }
}

/// Name of the PVC bound to the volume called `volume_name` in a pod spec
pub fn claim_referenced_by(pod: &PodSpec, volume_name: &str) -> Option<String> {
    pod.volumes
        .as_ref()?
        .iter()
        .find(|v| v.name == volume_name)?
        .persistent_volume_claim
        .as_ref()
        .map(|pvc| pvc.claim_name.clone())
}

/// Gather the observation for one pass over `pool`
pub async fn gather<S, R>(pool: &BufferPool, store: &S, replicas: &R) -> Result<Observation>
where
    S: DrainStore + ?Sized,
    R: ReplicaCountProvider + ?Sized,
{
    let namespace = namespace_of(pool);
    let buffer_volume = buffer_volume_name(pool);

    let volumes = store
        .list_volumes(&namespace, &drainable_volume_selector(pool))
        .await
        .map_err(|e| Error::observation("buffer volumes", e))?;

    let worker_selector = label_selector(&pool_labels(pool, Component::Worker));
    let pods = store
        .list_pods(&namespace, &worker_selector)
        .await
        .map_err(|e| Error::observation("worker pods", e))?;

    let mut in_use: BTreeSet<String> = pods
        .iter()
        .filter_map(|pod| claim_referenced_by(pod.spec.as_ref()?, &buffer_volume))
        .collect();

    let placeholder_selector = label_selector(&pool_labels(pool, Component::Placeholder));
    let placeholders: BTreeSet<u32> = store
        .list_pods(&namespace, &placeholder_selector)
        .await
        .map_err(|e| Error::observation("placeholder pods", e))?
        .iter()
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .filter_map(|pod| ordinal_of(&pod.name_any()))
        .collect();

    let replica_count = replicas
        .replica_count(pool)
        .await
        .map_err(|e| Error::observation("replica count", e))?;

    // Volumes of ordinals the pool is scaling up into are reserved even
    // before their pods exist.
    for ordinal in 0..replica_count {
        in_use.insert(volume_claim_name(pool, ordinal));
    }

    let drainer_selector = label_selector(&pool_labels(pool, Component::Drainer));
    let job_list = store
        .list_jobs(&namespace, &drainer_selector)
        .await
        .map_err(|e| Error::observation("drain jobs", e))?;

    let mut jobs = BTreeMap::new();
    for job in job_list {
        let Some(claim) = job
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|s| claim_referenced_by(s, &buffer_volume))
        else {
            debug!("Ignoring job {} without a buffer volume", job.name_any());
            continue;
        };
        if let Some(previous) = jobs.insert(claim.clone(), job) {
            warn!(
                "More than one drain job targets volume {}; ignoring {}",
                claim,
                previous.name_any()
            );
        }
    }

    Ok(Observation {
        volumes,
        in_use,
        replicas: replica_count,
        jobs,
        placeholders,
    })
}
