//! Unit tests for volume states and the drain decision function.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::batch::v1::{Job, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use crate::controller::drain::{
        decide, DrainAction, DrainStatus, JobPhase, VolumeObservation, VolumeState,
        DRAIN_STATUS_LABEL,
    };

    fn obs(drain_status: DrainStatus, in_use: bool, job: Option<JobPhase>) -> VolumeObservation {
        VolumeObservation {
            drain_status,
            in_use,
            job,
            placeholder: false,
        }
    }

    fn with_placeholder(o: VolumeObservation) -> VolumeObservation {
        VolumeObservation {
            placeholder: true,
            ..o
        }
    }

    fn job_with(status: JobStatus) -> Job {
        Job {
            status: Some(status),
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // VolumeState::of
    // -----------------------------------------------------------------------

    #[test]
    fn in_use_wins_over_everything() {
        for job in [
            None,
            Some(JobPhase::Running),
            Some(JobPhase::Succeeded),
            Some(JobPhase::Failed { attempts: 3 }),
        ] {
            for status in [DrainStatus::Drained, DrainStatus::Unmarked] {
                assert_eq!(VolumeState::of(&obs(status, true, job)), VolumeState::InUse);
            }
        }
    }

    #[test]
    fn states_of_unused_volumes() {
        let cases = [
            (DrainStatus::Unmarked, None, VolumeState::Available),
            (DrainStatus::Drained, None, VolumeState::Drained),
            (DrainStatus::Unmarked, Some(JobPhase::Running), VolumeState::Draining),
            (DrainStatus::Unmarked, Some(JobPhase::Succeeded), VolumeState::Draining),
            // A leftover job outranks the label.
            (DrainStatus::Drained, Some(JobPhase::Running), VolumeState::Draining),
            (
                DrainStatus::Unmarked,
                Some(JobPhase::Failed { attempts: 2 }),
                VolumeState::Failed { attempts: 2 },
            ),
        ];
        for (status, job, expected) in cases {
            assert_eq!(
                VolumeState::of(&obs(status, false, job)),
                expected,
                "status {status:?}, job {job:?}"
            );
        }
    }

    // -----------------------------------------------------------------------
    // decide
    // -----------------------------------------------------------------------

    #[test]
    fn decisions_for_every_state() {
        let cases = [
            // in use
            (obs(DrainStatus::Unmarked, true, None), DrainAction::None),
            (obs(DrainStatus::Drained, true, None), DrainAction::Reclaim),
            (
                obs(DrainStatus::Drained, true, Some(JobPhase::Running)),
                DrainAction::Reclaim,
            ),
            (
                obs(DrainStatus::Unmarked, true, Some(JobPhase::Succeeded)),
                DrainAction::FinishDrain,
            ),
            (
                obs(DrainStatus::Unmarked, true, Some(JobPhase::Running)),
                DrainAction::CancelDrain,
            ),
            (
                obs(DrainStatus::Unmarked, true, Some(JobPhase::Failed { attempts: 1 })),
                DrainAction::CancelDrain,
            ),
            // not in use
            (obs(DrainStatus::Unmarked, false, None), DrainAction::StartDrain),
            (obs(DrainStatus::Drained, false, None), DrainAction::None),
            (
                obs(DrainStatus::Unmarked, false, Some(JobPhase::Running)),
                DrainAction::None,
            ),
            (
                obs(DrainStatus::Unmarked, false, Some(JobPhase::Succeeded)),
                DrainAction::FinishDrain,
            ),
            (
                obs(DrainStatus::Unmarked, false, Some(JobPhase::Failed { attempts: 4 })),
                DrainAction::ReportFailure { attempts: 4 },
            ),
        ];

        for (o, expected) in cases {
            let state = VolumeState::of(&o);
            assert_eq!(decide(state, &o), expected, "observation {o:?} in state {state}");
        }
    }

    #[test]
    fn placeholder_without_job_is_released() {
        let cases = [
            (obs(DrainStatus::Unmarked, true, None), DrainAction::ReleaseOrdinal),
            (obs(DrainStatus::Drained, false, None), DrainAction::ReleaseOrdinal),
            // The label is fixed first; the placeholder goes in the next pass.
            (obs(DrainStatus::Drained, true, None), DrainAction::Reclaim),
            // Next to a job, the placeholder belongs to the drain.
            (
                obs(DrainStatus::Unmarked, true, Some(JobPhase::Running)),
                DrainAction::CancelDrain,
            ),
            (
                obs(DrainStatus::Unmarked, false, Some(JobPhase::Running)),
                DrainAction::None,
            ),
            (
                obs(DrainStatus::Unmarked, false, Some(JobPhase::Succeeded)),
                DrainAction::FinishDrain,
            ),
            (obs(DrainStatus::Unmarked, false, None), DrainAction::StartDrain),
        ];

        for (o, expected) in cases {
            let o = with_placeholder(o);
            let state = VolumeState::of(&o);
            assert_eq!(decide(state, &o), expected, "observation {o:?} in state {state}");
        }
    }

    #[test]
    fn drained_volume_is_never_drained_again() {
        let o = obs(DrainStatus::Drained, false, None);
        assert_eq!(decide(VolumeState::of(&o), &o), DrainAction::None);
    }

    #[test]
    fn action_and_state_names() {
        assert_eq!(DrainAction::StartDrain.to_string(), "start");
        assert_eq!(DrainAction::ReleaseOrdinal.as_str(), "release");
        assert_eq!(DrainAction::ReportFailure { attempts: 1 }.as_str(), "report-failure");
        assert_eq!(VolumeState::InUse.to_string(), "in-use");
        assert_eq!(VolumeState::Failed { attempts: 9 }.as_str(), "failed");
    }

    // -----------------------------------------------------------------------
    // JobPhase::of
    // -----------------------------------------------------------------------

    #[test]
    fn job_without_status_is_running() {
        assert_eq!(JobPhase::of(&Job::default()), JobPhase::Running);
    }

    #[test]
    fn job_succeeds_only_once_completed() {
        let pending = job_with(JobStatus {
            succeeded: Some(1),
            ..Default::default()
        });
        assert_eq!(JobPhase::of(&pending), JobPhase::Running);

        let done = job_with(JobStatus {
            succeeded: Some(1),
            completion_time: Some(Time(chrono::Utc::now())),
            ..Default::default()
        });
        assert_eq!(JobPhase::of(&done), JobPhase::Succeeded);
    }

    #[test]
    fn failed_job_reports_attempts() {
        let job = job_with(JobStatus {
            failed: Some(3),
            ..Default::default()
        });
        assert_eq!(JobPhase::of(&job), JobPhase::Failed { attempts: 3 });
    }

    #[test]
    fn success_after_retries_is_success() {
        let job = job_with(JobStatus {
            failed: Some(2),
            succeeded: Some(1),
            completion_time: Some(Time(chrono::Utc::now())),
            ..Default::default()
        });
        assert_eq!(JobPhase::of(&job), JobPhase::Succeeded);
    }

    // -----------------------------------------------------------------------
    // DrainStatus label mapping
    // -----------------------------------------------------------------------

    #[test]
    fn drain_status_from_labels() {
        let mut labels = BTreeMap::new();
        assert_eq!(DrainStatus::from_labels(&labels), DrainStatus::Unmarked);

        labels.insert(DRAIN_STATUS_LABEL.to_string(), "drained".to_string());
        assert_eq!(DrainStatus::from_labels(&labels), DrainStatus::Drained);

        labels.insert(DRAIN_STATUS_LABEL.to_string(), "yes".to_string());
        assert_eq!(DrainStatus::from_labels(&labels), DrainStatus::Unmarked);
    }

    #[test]
    fn unmarked_removes_the_label() {
        assert_eq!(DrainStatus::Drained.label_value(), Some("drained"));
        assert_eq!(DrainStatus::Unmarked.label_value(), None);
    }
}
