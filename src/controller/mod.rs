//! Controller module for BufferPool reconciliation
//! This module contains the main controller loop, the worker resource
//! builders and the drain coordination for buffer volumes.

pub mod conditions;
pub mod drain;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod replicas;
pub mod resources;
pub mod store;

pub use reconciler::{run_controller, ControllerState};
pub use replicas::{ReplicaCountProvider, StatefulSetReplicas};
pub use store::{DesiredState, DrainStore, KubeStore, Propagation};
