//! Volume lifecycle states and the drain decision function
//!
//! Everything here is pure: a [`VolumeObservation`] goes in, a
//! [`VolumeState`] and a [`DrainAction`] come out. Label strings and API
//! objects are mapped to these types at the store boundary.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::batch::v1::Job;

/// Label recording the drain status of a volume
pub const DRAIN_STATUS_LABEL: &str = "buffering.dev/drain-status";
const DRAINED: &str = "drained";

/// Persisted drain status of a volume
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainStatus {
    Drained,
    Unmarked,
}

impl DrainStatus {
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        match labels.get(DRAIN_STATUS_LABEL).map(String::as_str) {
            Some(DRAINED) => DrainStatus::Drained,
            _ => DrainStatus::Unmarked,
        }
    }

    /// Label value to store, `None` meaning the label is removed
    pub fn label_value(self) -> Option<&'static str> {
        match self {
            DrainStatus::Drained => Some(DRAINED),
            DrainStatus::Unmarked => None,
        }
    }
}

/// Progress of a drain job as reported by its status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobPhase {
    Running,
    Succeeded,
    Failed { attempts: i32 },
}

impl JobPhase {
    pub fn of(job: &Job) -> Self {
        let status = job.status.as_ref();
        let completed = status.and_then(|s| s.completion_time.as_ref()).is_some();
        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
        let failed = status.and_then(|s| s.failed).unwrap_or(0);

        if completed && succeeded > 0 {
            JobPhase::Succeeded
        } else if failed > 0 {
            JobPhase::Failed { attempts: failed }
        } else {
            JobPhase::Running
        }
    }
}

/// What a single pass knows about one volume
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeObservation {
    pub drain_status: DrainStatus,
    /// Referenced by a worker pod, or reserved for an ordinal below the desired replica count
    pub in_use: bool,
    pub job: Option<JobPhase>,
    /// A placeholder pod holds the volume's ordinal and is not terminating
    pub placeholder: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeState {
    InUse,
    Available,
    Draining,
    Drained,
    Failed { attempts: i32 },
}

impl VolumeState {
    pub fn of(obs: &VolumeObservation) -> Self {
        if obs.in_use {
            return VolumeState::InUse;
        }
        match obs.job {
            Some(JobPhase::Failed { attempts }) => VolumeState::Failed { attempts },
            Some(_) => VolumeState::Draining,
            None if obs.drain_status == DrainStatus::Drained => VolumeState::Drained,
            None => VolumeState::Available,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeState::InUse => "in-use",
            VolumeState::Available => "available",
            VolumeState::Draining => "draining",
            VolumeState::Drained => "drained",
            VolumeState::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainAction {
    None,
    /// Remove the drained label from a volume a worker uses again
    Reclaim,
    /// Reserve the ordinal and start a drain job
    StartDrain,
    /// Stop a drain whose volume is needed again (foreground delete).
    /// The placeholder stays until the job is gone.
    CancelDrain,
    /// Mark drained, drop the placeholder, then the job (background delete)
    FinishDrain,
    /// Remove a placeholder left without a drain job
    ReleaseOrdinal,
    /// Surface a failed drain; nothing is changed or retried
    ReportFailure { attempts: i32 },
}

impl DrainAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainAction::None => "none",
            DrainAction::Reclaim => "reclaim",
            DrainAction::StartDrain => "start",
            DrainAction::CancelDrain => "cancel",
            DrainAction::FinishDrain => "finish",
            DrainAction::ReleaseOrdinal => "release",
            DrainAction::ReportFailure { .. } => "report-failure",
        }
    }
}

impl fmt::Display for DrainAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide the next action for a volume.
///
/// A succeeded job is finished even when its volume is needed again; only
/// reclaiming an already drained volume comes first. Such a volume is marked
/// drained in this pass and reclaimed in the next.
///
/// A placeholder must only exist next to a drain job. One found without a
/// job is released once nothing else is left to do for the volume.
pub fn decide(state: VolumeState, obs: &VolumeObservation) -> DrainAction {
    match state {
        VolumeState::InUse => {
            if obs.drain_status == DrainStatus::Drained {
                DrainAction::Reclaim
            } else if obs.job == Some(JobPhase::Succeeded) {
                DrainAction::FinishDrain
            } else if obs.job.is_some() {
                DrainAction::CancelDrain
            } else if obs.placeholder {
                DrainAction::ReleaseOrdinal
            } else {
                DrainAction::None
            }
        }
        VolumeState::Draining => match obs.job {
            Some(JobPhase::Succeeded) => DrainAction::FinishDrain,
            _ => DrainAction::None,
        },
        VolumeState::Failed { attempts } => DrainAction::ReportFailure { attempts },
        VolumeState::Drained if obs.placeholder => DrainAction::ReleaseOrdinal,
        VolumeState::Drained => DrainAction::None,
        VolumeState::Available => DrainAction::StartDrain,
    }
}
