//! # Health Checker
//!
//! Evaluates live state snapshots into shoot [`Condition`]s.
//!
//! The checker only holds configuration (per-type grace thresholds, the
//! staleness limit for extension reports), the last operation of the shoot and
//! the clock. Every check is a function of a snapshot plus the previous
//! condition and returns:
//!
//! - `Ok(None)` when the checked subsystem is healthy and the caller keeps its
//!   own success condition
//! - `Ok(Some(condition))` when it is not
//! - `Err(_)` only when a lister fails
//!
//! ## Grace periods
//!
//! [`HealthChecker::failed_condition`] does not flip a healthy condition to
//! `False` at once when a threshold is configured for its type. The condition
//! goes `Progressing` first and only becomes `False` after the threshold has
//! elapsed since the last transition, or since the last successful operation.

mod checks;
mod extension;
pub mod resources;

use crate::controller::condition::{updated_condition, Clock};
use crate::crd::{
    Condition, ConditionStatus, ConditionType, ErrorCode, LastError, LastOperation,
    LastOperationState,
};
use chrono::TimeDelta;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct HealthChecker {
    condition_thresholds: HashMap<ConditionType, TimeDelta>,
    stale_extension_threshold: Option<TimeDelta>,
    last_operation: Option<LastOperation>,
    clock: Arc<dyn Clock>,
}

impl HealthChecker {
    pub fn new(
        condition_thresholds: HashMap<ConditionType, TimeDelta>,
        stale_extension_threshold: Option<TimeDelta>,
        last_operation: Option<LastOperation>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            condition_thresholds,
            stale_extension_threshold,
            last_operation,
            clock,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    fn last_operation_succeeded_within(&self, threshold: TimeDelta) -> bool {
        self.last_operation.as_ref().is_some_and(|op| {
            op.state == LastOperationState::Succeeded
                && self.clock.now() - op.last_update_time <= threshold
        })
    }

    /// Condition for an unhealthy outcome, honoring the grace threshold of its type
    pub fn failed_condition(
        &self,
        condition: &Condition,
        reason: impl Into<String>,
        message: impl Into<String>,
        codes: Vec<ErrorCode>,
    ) -> Condition {
        let threshold = self.condition_thresholds.get(&condition.r#type).copied();
        let status = match (condition.status, threshold) {
            (_, None) => ConditionStatus::False,
            (ConditionStatus::True, Some(_)) => ConditionStatus::Progressing,
            (ConditionStatus::Progressing, Some(threshold)) => {
                let within_transition =
                    self.clock.now() - condition.last_transition_time <= threshold;
                if self.last_operation_succeeded_within(threshold) || within_transition {
                    ConditionStatus::Progressing
                } else {
                    ConditionStatus::False
                }
            }
            (ConditionStatus::False, Some(threshold)) => {
                if self.last_operation_succeeded_within(threshold) {
                    ConditionStatus::Progressing
                } else {
                    ConditionStatus::False
                }
            }
            (ConditionStatus::Unknown, Some(_)) => ConditionStatus::False,
        };
        updated_condition(condition, status, reason, message, codes, self.clock())
    }
}

/// Report a failed condition as progressing while an operation without errors is in flight
pub fn pardon_condition(
    condition: Condition,
    last_operation: Option<&LastOperation>,
    last_errors: &[LastError],
    clock: &dyn Clock,
) -> Condition {
    let in_flight = last_operation.is_none_or(|op| op.state == LastOperationState::Processing);
    if condition.status == ConditionStatus::False && in_flight && last_errors.is_empty() {
        let codes = condition.codes.clone();
        return updated_condition(
            &condition,
            ConditionStatus::Progressing,
            condition.reason.clone(),
            condition.message.clone(),
            codes,
            clock,
        );
    }
    condition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::condition::{new_condition, FixedClock};
    use crate::crd::LastOperationType;
    use chrono::{DateTime, Utc};

    fn zero() -> DateTime<Utc> {
        DateTime::<Utc>::default()
    }

    fn checker(threshold: Option<TimeDelta>, last_operation: Option<LastOperation>, now: DateTime<Utc>) -> HealthChecker {
        let thresholds = threshold
            .map(|t| HashMap::from([(ConditionType::ControlPlaneHealthy, t)]))
            .unwrap_or_default();
        HealthChecker::new(thresholds, None, last_operation, Arc::new(FixedClock::new(now)))
    }

    fn condition(status: ConditionStatus, transition: DateTime<Utc>) -> Condition {
        Condition {
            status,
            last_transition_time: transition,
            ..new_condition(ConditionType::ControlPlaneHealthy)
        }
    }

    fn succeeded_at(at: DateTime<Utc>) -> LastOperation {
        LastOperation::new(LastOperationType::Reconcile, LastOperationState::Succeeded, at)
    }

    #[test]
    fn test_true_with_threshold_becomes_progressing() {
        let checker = checker(Some(TimeDelta::minutes(1)), None, zero());
        let result = checker.failed_condition(&condition(ConditionStatus::True, zero()), "", "", vec![]);
        assert_eq!(result.status, ConditionStatus::Progressing);
    }

    #[test]
    fn test_true_without_threshold_becomes_false() {
        let checker = checker(None, None, zero());
        let result = checker.failed_condition(&condition(ConditionStatus::True, zero()), "", "", vec![]);
        assert_eq!(result.status, ConditionStatus::False);
    }

    #[test]
    fn test_progressing_within_last_operation_threshold() {
        let checker = checker(Some(TimeDelta::minutes(1)), Some(succeeded_at(zero())), zero());
        let result =
            checker.failed_condition(&condition(ConditionStatus::Progressing, zero()), "", "", vec![]);
        assert_eq!(result.status, ConditionStatus::Progressing);
    }

    #[test]
    fn test_progressing_within_transition_threshold_only() {
        let now = zero() + TimeDelta::minutes(1) + TimeDelta::seconds(1);
        let checker = checker(Some(TimeDelta::minutes(1)), Some(succeeded_at(zero())), now);
        let previous = condition(ConditionStatus::Progressing, zero() + TimeDelta::minutes(1));
        let result = checker.failed_condition(&previous, "", "", vec![]);
        assert_eq!(result.status, ConditionStatus::Progressing);
    }

    #[test]
    fn test_progressing_outside_both_thresholds() {
        let now = zero() + TimeDelta::minutes(1) + TimeDelta::seconds(1);
        let checker = checker(Some(TimeDelta::minutes(1)), Some(succeeded_at(zero())), now);
        let result =
            checker.failed_condition(&condition(ConditionStatus::Progressing, zero()), "", "", vec![]);
        assert_eq!(result.status, ConditionStatus::False);
    }

    #[test]
    fn test_false_within_last_operation_threshold() {
        let now = zero() + TimeDelta::minutes(1) - TimeDelta::seconds(1);
        let checker = checker(Some(TimeDelta::minutes(1)), Some(succeeded_at(zero())), now);
        let result = checker.failed_condition(&condition(ConditionStatus::False, zero()), "", "", vec![]);
        assert_eq!(result.status, ConditionStatus::Progressing);
    }

    #[test]
    fn test_false_outside_last_operation_threshold() {
        let now = zero() + TimeDelta::minutes(1) + TimeDelta::seconds(1);
        let checker = checker(Some(TimeDelta::minutes(1)), Some(succeeded_at(zero())), now);
        let result = checker.failed_condition(&condition(ConditionStatus::False, zero()), "", "", vec![]);
        assert_eq!(result.status, ConditionStatus::False);
    }

    #[test]
    fn test_failed_condition_is_stable_at_fixed_instant() {
        let checker = checker(Some(TimeDelta::minutes(1)), None, zero() + TimeDelta::hours(1));
        let first = checker.failed_condition(&condition(ConditionStatus::True, zero()), "R", "M", vec![]);
        let second = checker.failed_condition(&first, "R", "M", vec![]);
        assert_eq!(first.status, second.status);
        assert_eq!(first.last_transition_time, second.last_transition_time);
    }

    #[test]
    fn test_pardon_without_last_operation() {
        let pardoned = pardon_condition(
            condition(ConditionStatus::False, zero()),
            None,
            &[],
            &FixedClock::new(zero()),
        );
        assert_eq!(pardoned.status, ConditionStatus::Progressing);
    }

    #[test]
    fn test_no_pardon_with_last_errors() {
        let op = LastOperation::new(LastOperationType::Reconcile, LastOperationState::Processing, zero());
        let errors = vec![LastError {
            description: "error".to_string(),
            task_id: None,
            codes: vec![],
            last_update_time: None,
        }];
        let result = pardon_condition(
            condition(ConditionStatus::False, zero()),
            Some(&op),
            &errors,
            &FixedClock::new(zero()),
        );
        assert_eq!(result.status, ConditionStatus::False);
    }

    #[test]
    fn test_no_pardon_after_success() {
        let op = succeeded_at(zero());
        let result = pardon_condition(
            condition(ConditionStatus::False, zero()),
            Some(&op),
            &[],
            &FixedClock::new(zero()),
        );
        assert_eq!(result.status, ConditionStatus::False);
    }
}
