//! Store access for the drain coordinator
//!
//! [`DrainStore`] is the list/patch/create/delete contract the coordinator
//! needs from the cluster. [`KubeStore`] implements it against the Kubernetes
//! API; tests substitute an in-memory store.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use super::drain::{DrainStatus, DRAIN_STATUS_LABEL};
use super::resources::FIELD_MANAGER;
use crate::error::{Error, Result};

/// Delay returned when an object is still terminating and the caller should yield
const TERMINATING_REQUEUE: Duration = Duration::from_secs(5);

/// Whether an object should exist in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DesiredState {
    Present,
    Absent,
}

/// Cascade mode for deletes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Wait for dependents to be removed before the owner disappears
    Foreground,
    /// Remove the owner now, let the garbage collector handle dependents
    Background,
}

impl Propagation {
    fn delete_params(self) -> DeleteParams {
        match self {
            Propagation::Foreground => DeleteParams::foreground(),
            Propagation::Background => DeleteParams::background(),
        }
    }
}

#[async_trait]
pub trait DrainStore: Send + Sync {
    async fn list_volumes(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>>;

    /// Set or clear the drain status label.
    ///
    /// The patch is conditional on the volume's observed resourceVersion; a
    /// concurrent update surfaces as a 409 API error. A volume that no longer
    /// exists is not an error.
    async fn patch_drain_status(
        &self,
        volume: &PersistentVolumeClaim,
        status: DrainStatus,
    ) -> Result<()>;

    /// Delete a job; a job that no longer exists is not an error
    async fn delete_job(&self, job: &Job, propagation: Propagation) -> Result<()>;

    /// Drive a job to the desired state. Returns a delay when the caller should yield.
    async fn reconcile_job(&self, job: &Job, state: DesiredState) -> Result<Option<Duration>>;

    /// Drive a pod to the desired state. Returns a delay when the caller should yield.
    async fn reconcile_pod(&self, pod: &Pod, state: DesiredState) -> Result<Option<Duration>>;
}

/// Idempotent create/update/delete of a single namespaced object
pub struct ObjectReconciler {
    client: Client,
}

impl ObjectReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Apply `desired` in the given state.
    ///
    /// `Present` creates the object when missing and server-side applies it
    /// otherwise; an object that is still terminating makes the caller yield.
    /// `Absent` deletes it, treating a missing object as done.
    #[instrument(skip(self, desired), fields(name = %desired.name_any()))]
    pub async fn reconcile<K>(&self, desired: &K, state: DesiredState) -> Result<Option<Duration>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned,
        K::DynamicType: Default,
    {
        let name = desired.meta().name.clone().ok_or_else(|| {
            Error::ConfigError(format!("{} has no name", K::kind(&Default::default())))
        })?;
        let namespace = desired.meta().namespace.clone().ok_or_else(|| {
            Error::ConfigError(format!("{name} has no namespace"))
        })?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);

        match state {
            DesiredState::Present => match api.get_opt(&name).await? {
                Some(existing) if existing.meta().deletion_timestamp.is_some() => {
                    debug!("{} is terminating, yielding", name);
                    Ok(Some(TERMINATING_REQUEUE))
                }
                Some(_) => {
                    api.patch(
                        &name,
                        &PatchParams::apply(FIELD_MANAGER).force(),
                        &Patch::Apply(desired),
                    )
                    .await?;
                    Ok(None)
                }
                None => {
                    info!("Creating {} {}/{}", K::kind(&Default::default()), namespace, name);
                    api.create(&PostParams::default(), desired).await?;
                    Ok(None)
                }
            },
            DesiredState::Absent => match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => {
                    info!("Deleted {} {}/{}", K::kind(&Default::default()), namespace, name);
                    Ok(None)
                }
                Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
                Err(e) => Err(Error::KubeError(e)),
            },
        }
    }
}

/// [`DrainStore`] backed by the Kubernetes API
pub struct KubeStore {
    client: Client,
    objects: ObjectReconciler,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            objects: ObjectReconciler::new(client.clone()),
            client,
        }
    }
}

#[async_trait]
impl DrainStore for KubeStore {
    async fn list_volumes(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn list_jobs(&self, namespace: &str, selector: &str) -> Result<Vec<Job>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn patch_drain_status(
        &self,
        volume: &PersistentVolumeClaim,
        status: DrainStatus,
    ) -> Result<()> {
        let namespace = volume.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &namespace);

        // A null value removes the label in a JSON merge patch.
        let patch = json!({
            "metadata": {
                "resourceVersion": volume.resource_version(),
                "labels": {
                    DRAIN_STATUS_LABEL: status.label_value(),
                }
            }
        });

        match api
            .patch(
                &volume.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn delete_job(&self, job: &Job, propagation: Propagation) -> Result<()> {
        let namespace = job.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Job> = Api::namespaced(self.client.clone(), &namespace);

        match api
            .delete(&job.name_any(), &propagation.delete_params())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn reconcile_job(&self, job: &Job, state: DesiredState) -> Result<Option<Duration>> {
        self.objects.reconcile(job, state).await
    }

    async fn reconcile_pod(&self, pod: &Pod, state: DesiredState) -> Result<Option<Duration>> {
        self.objects.reconcile(pod, state).await
    }
}
