//! Buffer volume drain coordination
//!
//! When a pool scales down, the volumes of the removed ordinals still hold
//! buffered data. Each pass decides per volume whether it is in use, should
//! be drained, is draining, or is drained, and applies the matching action:
//!
//! | state       | action                                                  |
//! |-------------|---------------------------------------------------------|
//! | `InUse`     | reclaim a drained volume, finish or cancel a drain job  |
//! | `Available` | reserve the ordinal with a placeholder, start a job     |
//! | `Draining`  | finish once the job succeeded                           |
//! | `Failed`    | report; failed jobs are left for an operator            |
//! | `Drained`   | nothing                                                 |
//!
//! An `InUse` or `Drained` volume whose placeholder outlived its job gets
//! the placeholder removed.

mod coordinator;
mod observe;
mod spec;
mod state;

#[cfg(test)]
mod spec_test;
#[cfg(test)]
mod state_test;

use std::fmt;

use thiserror::Error;

pub use coordinator::{
    run_pass, PassOutcome, VolumeOutcome, CANCEL_POLL_DELAY, FOLLOW_UP_DELAY,
};
pub use observe::{claim_referenced_by, gather, Observation};
pub use spec::{
    drainer_job_for, drainer_job_name, placeholder_pod_for, placeholder_pod_name, BuildError,
};
pub use state::{
    decide, DrainAction, DrainStatus, JobPhase, VolumeObservation, VolumeState,
    DRAIN_STATUS_LABEL,
};

use crate::error::Error as OperatorError;

/// Error recorded for a single volume during a pass
#[derive(Debug, Error)]
#[error("volume {volume}: {kind}")]
pub struct VolumeError {
    pub volume: String,
    pub kind: VolumeErrorKind,
}

#[derive(Debug, Error)]
pub enum VolumeErrorKind {
    #[error("assembling drain resources: {0}")]
    Build(#[from] BuildError),

    #[error("{operation}: {source}")]
    Apply {
        operation: &'static str,
        #[source]
        source: Box<OperatorError>,
    },

    #[error("{operation}: volume was modified concurrently")]
    Conflict { operation: &'static str },

    #[error("draining failed after {attempts} attempt(s)")]
    DrainFailed { attempts: i32 },
}

impl VolumeErrorKind {
    /// Classify a store error; optimistic-concurrency failures become `Conflict`
    pub fn from_store(operation: &'static str, err: OperatorError) -> Self {
        match err {
            OperatorError::KubeError(kube::Error::Api(ref e)) if e.code == 409 => {
                VolumeErrorKind::Conflict { operation }
            }
            err => VolumeErrorKind::Apply {
                operation,
                source: Box::new(err),
            },
        }
    }

    /// Only store failures can clear without a change to the pool or its jobs
    pub fn is_retriable(&self) -> bool {
        match self {
            VolumeErrorKind::Apply { source, .. } => source.is_retriable(),
            VolumeErrorKind::Conflict { .. } => true,
            VolumeErrorKind::Build(_) | VolumeErrorKind::DrainFailed { .. } => false,
        }
    }
}

/// All volume errors of one pass
#[derive(Debug, Default)]
pub struct DrainErrors(pub Vec<VolumeError>);

impl DrainErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VolumeError> {
        self.0.iter()
    }

    /// True when every error is a failed drain job rather than an operator failure
    pub fn only_drain_failures(&self) -> bool {
        self.iter()
            .all(|e| matches!(e.kind, VolumeErrorKind::DrainFailed { .. }))
    }
}

impl fmt::Display for DrainErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} volume(s) failed", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DrainErrors {}
