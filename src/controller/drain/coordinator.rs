//! Drain pass execution
//!
//! Volumes are processed one after another against a single observation.
//! A failing volume records its error and the pass moves on; results are
//! folded into a [`PassOutcome`] at the end.

use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::observe::{gather, Observation};
use super::spec::{drainer_job_for, placeholder_pod_for};
use super::state::{decide, DrainAction, DrainStatus, VolumeState};
use super::{DrainErrors, VolumeError, VolumeErrorKind};
use crate::controller::replicas::ReplicaCountProvider;
use crate::controller::store::{DesiredState, DrainStore, Propagation};
use crate::crd::{BufferPool, VolumeCounts};
use crate::error::Result;

/// Requeue delay after a label change, so the next pass sees it
pub const FOLLOW_UP_DELAY: Duration = Duration::from_secs(1);

/// Requeue delay while a cancelled drain job is being deleted
pub const CANCEL_POLL_DELAY: Duration = Duration::from_secs(5);

/// Result of processing one volume
#[derive(Debug)]
pub struct VolumeOutcome {
    pub volume: String,
    pub state: VolumeState,
    pub action: DrainAction,
    pub requeue_after: Option<Duration>,
    pub error: Option<VolumeErrorKind>,
}

/// Result of a whole pass
#[derive(Debug, Default)]
pub struct PassOutcome {
    pub replicas: i32,
    pub volumes: Vec<VolumeOutcome>,
}

impl PassOutcome {
    /// Shortest requeue delay any volume asked for
    pub fn requeue_after(&self) -> Option<Duration> {
        self.volumes.iter().filter_map(|v| v.requeue_after).min()
    }

    pub fn counts(&self) -> VolumeCounts {
        let mut counts = VolumeCounts::default();
        for outcome in &self.volumes {
            match outcome.state {
                VolumeState::InUse => counts.in_use += 1,
                VolumeState::Available => counts.available += 1,
                VolumeState::Draining => counts.draining += 1,
                VolumeState::Drained => counts.drained += 1,
                VolumeState::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    /// Split off the combined error of all volumes that failed
    pub fn take_errors(&mut self) -> DrainErrors {
        DrainErrors(
            self.volumes
                .iter_mut()
                .filter_map(|v| {
                    v.error.take().map(|kind| VolumeError {
                        volume: v.volume.clone(),
                        kind,
                    })
                })
                .collect(),
        )
    }

    pub fn has_errors(&self) -> bool {
        self.volumes.iter().any(|v| v.error.is_some())
    }
}

/// Run one drain pass over `pool`.
///
/// Returns `Err` only when the observation could not be gathered; volume
/// errors are part of the outcome.
#[instrument(skip(pool, store, replicas), fields(name = %pool.name_any(), namespace = pool.namespace()))]
pub async fn run_pass<S, R>(pool: &BufferPool, store: &S, replicas: &R) -> Result<PassOutcome>
where
    S: DrainStore + ?Sized,
    R: ReplicaCountProvider + ?Sized,
{
    let observation = gather(pool, store, replicas).await?;
    debug!(
        "Observed {} volumes, {} in use, {} drain jobs, {} replicas",
        observation.volumes.len(),
        observation.in_use.len(),
        observation.jobs.len(),
        observation.replicas
    );

    let mut outcome = PassOutcome {
        replicas: observation.replicas,
        volumes: Vec::with_capacity(observation.volumes.len()),
    };

    for pvc in &observation.volumes {
        outcome
            .volumes
            .push(process_volume(pool, store, &observation, pvc).await);
    }

    Ok(outcome)
}

async fn process_volume<S>(
    pool: &BufferPool,
    store: &S,
    observation: &Observation,
    pvc: &PersistentVolumeClaim,
) -> VolumeOutcome
where
    S: DrainStore + ?Sized,
{
    let volume = pvc.name_any();
    let obs = observation.volume(pvc);
    let state = VolumeState::of(&obs);
    let action = decide(state, &obs);
    let job = observation.job_for(&volume);

    #[cfg(feature = "metrics")]
    {
        if action != DrainAction::None {
            crate::controller::metrics::inc_drain_action(
                &namespace_label(pool),
                &pool.name_any(),
                action.as_str(),
            );
        }
    }

    let (requeue_after, error) = match apply(pool, store, pvc, job, action).await {
        Ok(requeue) => (requeue, None),
        Err(kind) => {
            warn!("Volume {} ({}, {}): {}", volume, state, action, kind);
            (None, Some(kind))
        }
    };

    VolumeOutcome {
        volume,
        state,
        action,
        requeue_after,
        error,
    }
}

#[cfg(feature = "metrics")]
fn namespace_label(pool: &BufferPool) -> String {
    pool.namespace().unwrap_or_default()
}

async fn apply<S>(
    pool: &BufferPool,
    store: &S,
    pvc: &PersistentVolumeClaim,
    job: Option<&Job>,
    action: DrainAction,
) -> std::result::Result<Option<Duration>, VolumeErrorKind>
where
    S: DrainStore + ?Sized,
{
    let volume = pvc.name_any();

    match action {
        DrainAction::None => {
            if job.is_some() {
                debug!("Drain job for volume {} has not completed yet", volume);
            }
            Ok(None)
        }

        DrainAction::Reclaim => {
            info!("Removing drained label from volume {} as a worker uses it again", volume);
            store
                .patch_drain_status(pvc, DrainStatus::Unmarked)
                .await
                .map_err(|e| VolumeErrorKind::from_store("removing drained label", e))?;
            Ok(Some(FOLLOW_UP_DELAY))
        }

        DrainAction::FinishDrain => {
            info!("Drain job for volume {} completed, marking it drained", volume);
            store
                .patch_drain_status(pvc, DrainStatus::Drained)
                .await
                .map_err(|e| VolumeErrorKind::from_store("marking volume as drained", e))?;

            // The job goes last: while it is listed, the next pass finishes again.
            let placeholder = placeholder_pod_for(pool, pvc)?;
            let requeue = store
                .reconcile_pod(&placeholder, DesiredState::Absent)
                .await
                .map_err(|e| VolumeErrorKind::from_store("removing placeholder pod", e))?;

            match job {
                Some(job) => store
                    .delete_job(job, Propagation::Background)
                    .await
                    .map_err(|e| VolumeErrorKind::from_store("deleting completed drain job", e))?,
                None => warn!("No drain job observed for finished volume {}", volume),
            }
            Ok(requeue.or(Some(FOLLOW_UP_DELAY)))
        }

        DrainAction::CancelDrain => {
            let Some(job) = job else {
                warn!("No drain job observed for cancelled volume {}", volume);
                return Ok(None);
            };

            // The placeholder is kept until a pass no longer sees the job, so
            // the ordinal is released only after the drainer pod is gone.
            if job.metadata.deletion_timestamp.is_some() {
                debug!("Drain job {} for volume {} is still terminating", job.name_any(), volume);
            } else {
                info!("Deleting drain job early as volume {} is in use again", volume);
                store
                    .delete_job(job, Propagation::Foreground)
                    .await
                    .map_err(|e| VolumeErrorKind::from_store("deleting unneeded drain job", e))?;
            }
            Ok(Some(CANCEL_POLL_DELAY))
        }

        DrainAction::ReleaseOrdinal => {
            info!("Removing placeholder pod of volume {} as no drain job remains", volume);
            let placeholder = placeholder_pod_for(pool, pvc)?;
            store
                .reconcile_pod(&placeholder, DesiredState::Absent)
                .await
                .map_err(|e| VolumeErrorKind::from_store("removing placeholder pod", e))
        }

        DrainAction::ReportFailure { attempts } => {
            Err(VolumeErrorKind::DrainFailed { attempts })
        }

        DrainAction::StartDrain => {
            info!("Starting drain job for volume {}", volume);
            let placeholder = placeholder_pod_for(pool, pvc)?;
            let job = drainer_job_for(pool, pvc)?;

            if let Some(requeue) = store
                .reconcile_pod(&placeholder, DesiredState::Present)
                .await
                .map_err(|e| VolumeErrorKind::from_store("ensuring placeholder pod", e))?
            {
                return Ok(Some(requeue));
            }

            store
                .reconcile_job(&job, DesiredState::Present)
                .await
                .map_err(|e| VolumeErrorKind::from_store("creating drain job", e))
        }
    }
}
