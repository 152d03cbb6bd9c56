//! Desired replica count of a pool
//!
//! The StatefulSet is the source of truth since an autoscaler may have
//! changed its replica count; the BufferPool spec is used until the
//! StatefulSet exists.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::Api;
use kube::Client;
use tracing::debug;

use super::resources::{namespace_of, statefulset_name};
use crate::crd::BufferPool;
use crate::error::Result;

#[async_trait]
pub trait ReplicaCountProvider: Send + Sync {
    async fn replica_count(&self, pool: &BufferPool) -> Result<i32>;
}

pub struct StatefulSetReplicas {
    client: Client,
}

impl StatefulSetReplicas {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReplicaCountProvider for StatefulSetReplicas {
    async fn replica_count(&self, pool: &BufferPool) -> Result<i32> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &namespace_of(pool));
        let name = statefulset_name(pool);

        let replicas = match api.get_opt(&name).await? {
            // An unset replica count defaults to 1 server-side.
            Some(sts) => sts.spec.and_then(|s| s.replicas).unwrap_or(1),
            None => {
                debug!("StatefulSet {} not found, using spec replicas", name);
                pool.spec.replicas
            }
        };
        Ok(replicas.max(0))
    }
}
