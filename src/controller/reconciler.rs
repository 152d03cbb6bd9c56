//! Main reconciler for BufferPool resources
//!
//! Implements the controller pattern using kube-rs runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Event, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::conditions::{
    is_condition_true, set_condition, CONDITION_TYPE_DRAINING, CONDITION_TYPE_DRAIN_FAILED,
    CONDITION_TYPE_READY,
};
use super::drain::{run_pass, DrainErrors, VolumeErrorKind};
use super::replicas::StatefulSetReplicas;
use super::resources::{self, namespace_of, FIELD_MANAGER};
use super::store::KubeStore;
use crate::crd::{BufferPool, BufferPoolStatus, VolumeCounts};
use crate::error::{Error, Result};

#[cfg(feature = "metrics")]
use super::metrics;

#[cfg(feature = "metrics")]
const CONTROLLER_NAME: &str = "bufferpool";

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    /// Only the leader mutates cluster state
    pub is_leader: Arc<AtomicBool>,
    /// Requeue interval when nothing asked for an earlier pass
    pub requeue: Duration,
    /// Restrict the controller to one namespace
    pub namespace: Option<String>,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let pools: Api<BufferPool> = match &state.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    info!("Starting BufferPool controller");

    // Verify CRD exists
    match pools.list(&Default::default()).await {
        Ok(_) => info!("BufferPool CRD is available"),
        Err(e) => {
            error!(
                "BufferPool CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError("BufferPool CRD not installed".to_string()));
        }
    }

    Controller::new(pools, Config::default())
        .owns::<StatefulSet>(scoped_api(&client, &state.namespace), Config::default())
        .owns::<Service>(scoped_api(&client, &state.namespace), Config::default())
        .owns::<Job>(scoped_api(&client, &state.namespace), Config::default())
        .owns::<Pod>(scoped_api(&client, &state.namespace), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: &Option<String>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Helper to emit a Kubernetes Event
async fn emit_event(
    client: &Client,
    pool: &BufferPool,
    event_type: &str,
    reason: &str,
    message: &str,
) -> Result<()> {
    let events: Api<Event> = Api::namespaced(client.clone(), &namespace_of(pool));

    let time = chrono::Utc::now();
    let event = Event {
        metadata: kube::api::ObjectMeta {
            generate_name: Some(format!("{}-event-", pool.name_any())),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: pool.object_ref(&()),
        first_timestamp: Some(Time(time)),
        last_timestamp: Some(Time(time)),
        count: Some(1),
        reporting_component: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };

    events
        .create(&PostParams::default(), &event)
        .await
        .map_err(Error::KubeError)?;
    Ok(())
}

/// Reconciliation function for BufferPool
///
/// This function is called whenever:
/// - A BufferPool is created or updated
/// - An owned resource (StatefulSet, Service, drain Job, placeholder Pod) changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<BufferPool>, ctx: Arc<ControllerState>) -> Result<Action> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let result = apply_buffer_pool(&ctx, &obj).await;

    #[cfg(feature = "metrics")]
    {
        metrics::observe_reconcile_duration_seconds(
            CONTROLLER_NAME,
            started.elapsed().as_secs_f64(),
        );
        if let Err(e) = &result {
            metrics::inc_reconcile_error(CONTROLLER_NAME, e.metric_kind());
        }
    }

    result
}

async fn apply_buffer_pool(ctx: &ControllerState, pool: &BufferPool) -> Result<Action> {
    let client = &ctx.client;
    let namespace = namespace_of(pool);
    let name = pool.name_any();

    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping {}/{}", namespace, name);
        return Ok(Action::requeue(ctx.requeue));
    }

    info!("Reconciling BufferPool {}/{}", namespace, name);

    if let Err(errors) = pool.spec.validate() {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!("Validation failed for {}/{}: {}", namespace, name, message);
        let status = failed_status(pool, "InvalidSpec", &message);
        update_status(client, pool, &status).await?;
        return Err(Error::ValidationError(message));
    }

    resources::ensure_headless_service(client, pool).await?;
    resources::ensure_statefulset(client, pool).await?;

    if !pool.spec.drain_enabled() {
        let status = idle_status(pool);
        update_status(client, pool, &status).await?;
        return Ok(Action::requeue(ctx.requeue));
    }

    let store = KubeStore::new(client.clone());
    let replicas = StatefulSetReplicas::new(client.clone());

    let mut outcome = match run_pass(pool, &store, &replicas).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Drain pass for {}/{} aborted: {}", namespace, name, e);
            let status = failed_status(pool, "ObservationFailed", &e.to_string());
            update_status(client, pool, &status).await?;
            return Err(e);
        }
    };

    let counts = outcome.counts();
    let errors = outcome.take_errors();
    let was_failing = pool
        .status
        .as_ref()
        .is_some_and(|s| is_condition_true(&s.conditions, CONDITION_TYPE_DRAIN_FAILED));

    #[cfg(feature = "metrics")]
    metrics::set_volume_counts(&namespace, &name, &counts);

    if counts.failed > 0 && !was_failing {
        report_drain_failures(client, pool, &errors).await;
    }

    let status = drain_status(pool, outcome.replicas, &counts, &errors);
    update_status(client, pool, &status).await?;

    if !errors.is_empty() && !errors.only_drain_failures() {
        return Err(Error::DrainErrors(errors));
    }

    Ok(Action::requeue(outcome.requeue_after().unwrap_or(ctx.requeue)))
}

/// Emit one Warning event per failed drain job
async fn report_drain_failures(client: &Client, pool: &BufferPool, errors: &DrainErrors) {
    for err in errors
        .iter()
        .filter(|e| matches!(e.kind, VolumeErrorKind::DrainFailed { .. }))
    {
        #[cfg(feature = "metrics")]
        metrics::inc_drain_failure(&namespace_of(pool), &pool.name_any());

        if let Err(e) = emit_event(client, pool, "Warning", "DrainFailed", &err.to_string()).await
        {
            warn!("Failed to emit DrainFailed event: {}", e);
        }
    }
}

/// Status after a completed drain pass
pub(crate) fn drain_status(
    pool: &BufferPool,
    replicas: i32,
    counts: &VolumeCounts,
    errors: &DrainErrors,
) -> BufferPoolStatus {
    let generation = pool.metadata.generation;
    let mut conditions = previous_conditions(pool);

    let operator_errors = errors
        .iter()
        .filter(|e| !matches!(e.kind, VolumeErrorKind::DrainFailed { .. }))
        .count();

    let (phase, message) = if operator_errors > 0 {
        ("Degraded", Some(errors.to_string()))
    } else if counts.failed > 0 {
        (
            "Degraded",
            Some(format!("{} drain job(s) failed", counts.failed)),
        )
    } else if counts.draining > 0 {
        ("Draining", None)
    } else {
        ("Ready", None)
    };

    if operator_errors > 0 {
        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            false,
            "DrainPassIncomplete",
            &errors.to_string(),
            generation,
        );
    } else {
        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            true,
            "Reconciled",
            "Worker resources applied",
            generation,
        );
    }

    set_condition(
        &mut conditions,
        CONDITION_TYPE_DRAINING,
        counts.draining > 0,
        if counts.draining > 0 {
            "DrainJobsRunning"
        } else {
            "NoDrainJobs"
        },
        &format!("{} volume(s) draining", counts.draining),
        generation,
    );

    set_condition(
        &mut conditions,
        CONDITION_TYPE_DRAIN_FAILED,
        counts.failed > 0,
        if counts.failed > 0 {
            "DrainJobFailed"
        } else {
            "NoFailures"
        },
        &format!("{} drain job(s) failed", counts.failed),
        generation,
    );

    BufferPoolStatus {
        phase: phase.to_string(),
        message,
        observed_generation: generation,
        replicas,
        volumes: counts.clone(),
        conditions,
    }
}

/// Status when draining is disabled for the pool
pub(crate) fn idle_status(pool: &BufferPool) -> BufferPoolStatus {
    let generation = pool.metadata.generation;
    let mut conditions = previous_conditions(pool);
    conditions.retain(|c| c.type_ == CONDITION_TYPE_READY);
    set_condition(
        &mut conditions,
        CONDITION_TYPE_READY,
        true,
        "Reconciled",
        "Worker resources applied, draining disabled",
        generation,
    );

    BufferPoolStatus {
        phase: "Ready".to_string(),
        message: None,
        observed_generation: generation,
        replicas: pool.spec.replicas,
        volumes: VolumeCounts::default(),
        conditions,
    }
}

/// Status when the pool could not be reconciled at all; counts are kept
pub(crate) fn failed_status(pool: &BufferPool, reason: &str, message: &str) -> BufferPoolStatus {
    let previous = pool.status.clone().unwrap_or_default();
    let mut conditions = previous.conditions;
    set_condition(
        &mut conditions,
        CONDITION_TYPE_READY,
        false,
        reason,
        message,
        pool.metadata.generation,
    );

    BufferPoolStatus {
        phase: "Failed".to_string(),
        message: Some(message.to_string()),
        observed_generation: pool.metadata.generation,
        conditions,
        ..previous
    }
}

fn previous_conditions(pool: &BufferPool) -> Vec<crate::crd::Condition> {
    pool.status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default()
}

/// Update the status subresource of a BufferPool
async fn update_status(client: &Client, pool: &BufferPool, status: &BufferPoolStatus) -> Result<()> {
    let api: Api<BufferPool> = Api::namespaced(client.clone(), &namespace_of(pool));

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &pool.name_any(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;

    Ok(())
}

/// Error policy for the controller
fn error_policy(pool: Arc<BufferPool>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {}", pool.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
