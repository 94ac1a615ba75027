//! # Health Metrics
//!
//! Metrics for the care loop: evaluations and the last computed condition states.

use crate::crd::{ConditionStatus, ConditionType};
use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec, IntGaugeVec};
use std::sync::LazyLock;

static CARE_EVALUATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "gardenlet_care_evaluations_total",
        "Total number of shoot care evaluations",
    )
    .expect("Failed to create CARE_EVALUATIONS_TOTAL metric - this should never happen")
});

static CARE_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "gardenlet_care_errors_total",
            "Total number of care evaluations that could not be completed",
        ),
        &["stage"],
    )
    .expect("Failed to create CARE_ERRORS_TOTAL metric - this should never happen")
});

static SHOOT_CONDITION_STATUS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        prometheus::Opts::new(
            "gardenlet_shoot_condition",
            "Last computed shoot condition, 1 for the current status and 0 otherwise",
        ),
        &["namespace", "name", "condition", "status"],
    )
    .expect("Failed to create SHOOT_CONDITION_STATUS metric - this should never happen")
});

const STATUSES: [ConditionStatus; 4] = [
    ConditionStatus::True,
    ConditionStatus::False,
    ConditionStatus::Unknown,
    ConditionStatus::Progressing,
];

/// Register health metrics with the registry
pub(crate) fn register_health_metrics() -> Result<()> {
    REGISTRY.register(Box::new(CARE_EVALUATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CARE_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SHOOT_CONDITION_STATUS.clone()))?;
    Ok(())
}

pub fn increment_care_evaluations() {
    CARE_EVALUATIONS_TOTAL.inc();
}

pub fn increment_care_errors(stage: &str) {
    CARE_ERRORS_TOTAL.with_label_values(&[stage]).inc();
}

pub fn set_shoot_condition(namespace: &str, name: &str, condition: ConditionType, status: ConditionStatus) {
    for candidate in STATUSES {
        SHOOT_CONDITION_STATUS
            .with_label_values(&[namespace, name, condition.as_str(), candidate.as_str()])
            .set(i64::from(candidate == status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_shoot_condition_is_one_hot() {
        set_shoot_condition("garden-dev", "metrics", ConditionType::EveryNodeReady, ConditionStatus::False);
        let value = |status: ConditionStatus| {
            SHOOT_CONDITION_STATUS
                .with_label_values(&["garden-dev", "metrics", "EveryNodeReady", status.as_str()])
                .get()
        };
        assert_eq!(value(ConditionStatus::False), 1);
        assert_eq!(value(ConditionStatus::True), 0);

        set_shoot_condition("garden-dev", "metrics", ConditionType::EveryNodeReady, ConditionStatus::True);
        assert_eq!(value(ConditionStatus::False), 0);
        assert_eq!(value(ConditionStatus::True), 1);
    }

    #[test]
    fn test_increment_care_evaluations() {
        let before = CARE_EVALUATIONS_TOTAL.get();
        increment_care_evaluations();
        assert_eq!(CARE_EVALUATIONS_TOTAL.get(), before + 1u64);
    }
}
