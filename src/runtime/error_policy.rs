//! # Error Policy
//!
//! Requeue behavior for failed shoot reconciliations.

use crate::constants;
use crate::controller::reconciler::{ReconcileError, Reconciler};
use crate::crd::Shoot;
use crate::observability;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed shoot with its own Fibonacci backoff
///
/// Backoff state is tracked per shoot so one failing shoot does not slow down
/// the others.
pub fn handle_reconciliation_error(shoot: Arc<Shoot>, error: &ReconcileError, ctx: Arc<Reconciler>) -> Action {
    let name = shoot.name();
    let namespace = shoot.namespace();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        shoot.name = name,
        shoot.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    observability::metrics::increment_reconciliation_errors();

    let key = format!("{}/{}", namespace, name);
    let (backoff_seconds, error_count) = ctx.backoff_states.record_error(&key).unwrap_or_else(|| {
        warn!("Backoff state unavailable, using default backoff");
        (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
    });

    let next_trigger_time = chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        "Retrying with Fibonacci backoff: {}s (error count: {}, next attempt at {})",
        backoff_seconds,
        error_count,
        next_trigger_time.to_rfc3339()
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}
