//! Aggregation of health reports published by extension controllers.

use super::HealthChecker;
use crate::controller::condition::updated_condition;
use crate::crd::{Condition, ConditionStatus, ExtensionCondition};

impl HealthChecker {
    /// Fold the extension reports for `condition`'s type into it
    ///
    /// Returns `None` when no report of that type exists or every report is healthy.
    pub fn check_extension_condition(
        &self,
        condition: &Condition,
        extension_conditions: &[ExtensionCondition],
    ) -> Option<Condition> {
        let now = self.clock().now();
        for report in extension_conditions
            .iter()
            .filter(|e| e.condition.r#type == condition.r#type)
        {
            let reported = &report.condition;
            if let Some(threshold) = self.stale_extension_threshold {
                let age = now - reported.last_update_time;
                if age > threshold {
                    return Some(updated_condition(
                        condition,
                        ConditionStatus::Unknown,
                        format!("{}OutdatedHealthCheckReport", report.extension_type),
                        format!(
                            "{} extension ({}/{}) reports an outdated health status (last updated: {}s ago at {}).",
                            report.extension_type,
                            report.extension_namespace,
                            report.extension_name,
                            age.num_seconds(),
                            reported.last_update_time.to_rfc3339()
                        ),
                        vec![],
                        self.clock(),
                    ));
                }
            }

            match reported.status {
                ConditionStatus::Progressing => {
                    return Some(updated_condition(
                        condition,
                        ConditionStatus::Progressing,
                        format!("{}{}", report.extension_type, reported.reason),
                        reported.message.clone(),
                        reported.codes.clone(),
                        self.clock(),
                    ));
                }
                ConditionStatus::False | ConditionStatus::Unknown => {
                    return Some(self.failed_condition(
                        condition,
                        format!("{}UnhealthyReport", report.extension_type),
                        format!(
                            "{} extension ({}/{}) reports failing health check: {}",
                            report.extension_type,
                            report.extension_namespace,
                            report.extension_name,
                            reported.message
                        ),
                        reported.codes.clone(),
                    ));
                }
                ConditionStatus::True => {}
            }
        }
        None
    }
}
