//! # Condition Model
//!
//! Transition rules for [`Condition`]s.
//!
//! Checks never mutate a condition in place. They build the new state and
//! [`merge`] it against the previous instance, which decides whether the
//! transition time rolls forward:
//!
//! - `last_transition_time` only changes when the status changes
//! - `last_update_time` is set on every recomputation

pub mod clock;
pub mod error_codes;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error_codes::{determine_error_codes, ErrorCodeClassifier};

use crate::crd::{Condition, ConditionStatus, ConditionType, ErrorCode};

/// Zero-value condition of the given type with status `Unknown`
pub fn new_condition(r#type: ConditionType) -> Condition {
    Condition::new(r#type)
}

/// Merge a freshly computed condition into its previous instance
pub fn merge(old: &Condition, new: Condition, clock: &dyn Clock) -> Condition {
    let now = clock.now();
    let last_transition_time = if new.status == old.status {
        old.last_transition_time
    } else {
        now
    };
    Condition {
        last_transition_time,
        last_update_time: now,
        ..new
    }
}

/// Recompute `condition` with new content, merged against its current state
pub fn updated_condition(
    condition: &Condition,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: impl Into<String>,
    codes: Vec<ErrorCode>,
    clock: &dyn Clock,
) -> Condition {
    let next = Condition {
        r#type: condition.r#type,
        status,
        reason: reason.into(),
        message: message.into(),
        last_update_time: condition.last_update_time,
        last_transition_time: condition.last_transition_time,
        codes,
    };
    merge(condition, next, clock)
}

pub fn get_condition(conditions: &[Condition], r#type: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Existing condition of the given type, or a fresh `Unknown` one
pub fn get_or_init_condition(conditions: &[Condition], r#type: ConditionType) -> Condition {
    get_condition(conditions, r#type)
        .cloned()
        .unwrap_or_else(|| new_condition(r#type))
}

/// Replace conditions by type, appending types not present yet
pub fn merge_conditions(existing: &[Condition], updates: impl IntoIterator<Item = Condition>) -> Vec<Condition> {
    let mut result = existing.to_vec();
    for update in updates {
        match result.iter_mut().find(|c| c.r#type == update.r#type) {
            Some(slot) => *slot = update,
            None => result.push(update),
        }
    }
    result
}
