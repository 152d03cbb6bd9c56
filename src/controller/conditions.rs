//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::Condition;

/// The pool's worker resources are applied and its last pass succeeded
pub const CONDITION_TYPE_READY: &str = "Ready";
/// At least one buffer volume is being drained
pub const CONDITION_TYPE_DRAINING: &str = "Draining";
/// At least one drain job failed and needs attention
pub const CONDITION_TYPE_DRAIN_FAILED: &str = "DrainFailed";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Update or add a condition to the conditions list
///
/// The transition time only moves when the status changes.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) {
    let status = if status {
        CONDITION_STATUS_TRUE
    } else {
        CONDITION_STATUS_FALSE
    };
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = now;
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
        existing.observed_generation = observed_generation;
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation,
        });
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_adds_new() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            CONDITION_TYPE_READY,
            true,
            "Reconciled",
            "ok",
            Some(2),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, "True");
        assert_eq!(conditions[0].observed_generation, Some(2));
        assert!(is_condition_true(&conditions, CONDITION_TYPE_READY));
    }

    #[test]
    fn transition_time_only_moves_on_status_change() {
        let mut conditions = vec![Condition {
            type_: CONDITION_TYPE_DRAINING.to_string(),
            status: CONDITION_STATUS_TRUE.to_string(),
            last_transition_time: "2024-01-01T00:00:00+00:00".to_string(),
            reason: "DrainsRunning".to_string(),
            message: "1 volume(s) draining".to_string(),
            observed_generation: None,
        }];

        set_condition(
            &mut conditions,
            CONDITION_TYPE_DRAINING,
            true,
            "DrainsRunning",
            "2 volume(s) draining",
            None,
        );
        assert_eq!(conditions[0].last_transition_time, "2024-01-01T00:00:00+00:00");
        assert_eq!(conditions[0].message, "2 volume(s) draining");

        set_condition(
            &mut conditions,
            CONDITION_TYPE_DRAINING,
            false,
            "NoDrains",
            "",
            None,
        );
        assert_ne!(conditions[0].last_transition_time, "2024-01-01T00:00:00+00:00");
        assert!(!is_condition_true(&conditions, CONDITION_TYPE_DRAINING));
    }

    #[test]
    fn find_condition_by_type() {
        let mut conditions = Vec::new();
        set_condition(&mut conditions, CONDITION_TYPE_READY, true, "a", "", None);
        set_condition(&mut conditions, CONDITION_TYPE_DRAIN_FAILED, false, "b", "", None);

        assert_eq!(
            find_condition(&conditions, CONDITION_TYPE_DRAIN_FAILED).map(|c| c.reason.as_str()),
            Some("b")
        );
        assert!(find_condition(&conditions, CONDITION_TYPE_DRAINING).is_none());
    }
}
