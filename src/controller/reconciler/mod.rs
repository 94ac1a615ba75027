//! # Shoot Reconciler
//!
//! Drives one reconciliation of a shoot:
//!
//! 1. Skip shoots scheduled onto another seed
//! 2. Assemble an [`Operation`] from the garden (secrets, seed, shoot)
//! 3. Mark the last operation as `Processing`
//! 4. Run the reconcile flow with the operation as progress reporter and error cleaner
//! 5. Record task errors and finish the last operation
//!
//! Failed reconciliations are requeued by the runtime's error policy with a
//! per-shoot Fibonacci backoff; successful ones after the reconcile interval.

pub mod objects;
mod tasks;

pub use tasks::{build_reconcile_graph, ReconcileEnv, WaitTiming, FLOW_NAME};

use crate::config::SharedControllerConfig;
use crate::controller::applier::{KubeApplier, ObjectApplier};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::condition::determine_error_codes;
use crate::controller::flow::{ErrorCleaner, FlowError, Opts, ProgressReporter, Stats};
use crate::controller::operation::{
    read_garden_secrets, BuildError, ClientMap, GardenerInfo, ImageVector, Operation, OperationBuilder,
};
use crate::crd::{LastOperationState, Shoot};
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::provider::ProviderRegistry;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Failure of a single reconcile task
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{kind} {name} is not ready: {reason}")]
    NotReady { kind: String, name: String, reason: String },

    #[error("{kind} {name} reports an error: {message}")]
    ExtensionFailed {
        kind: String,
        name: String,
        message: String,
    },

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("failed to decode object: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] Error),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to assemble operation: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Status(#[from] Error),
}

/// Consecutive failures of one shoot
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff per `namespace/name` of shoots whose last reconciliation failed
#[derive(Debug, Default)]
pub struct BackoffStates {
    states: Mutex<HashMap<String, BackoffState>>,
}

impl BackoffStates {
    /// Count a failure of `key`; returns the next backoff in seconds and the error count
    pub fn record_error(&self, key: &str) -> Option<(u64, u32)> {
        match self.states.lock() {
            Ok(mut states) => {
                let state = states.entry(key.to_string()).or_default();
                state.increment_error();
                Some((state.backoff.next_backoff_seconds(), state.error_count))
            }
            Err(e) => {
                warn!(error = %e, "Failed to lock backoff states");
                None
            }
        }
    }

    pub fn reset(&self, key: &str) {
        match self.states.lock() {
            Ok(mut states) => {
                states.remove(key);
            }
            Err(e) => warn!(error = %e, "Failed to lock backoff states"),
        }
    }

    /// Drop the state of every shoot for which `exists(namespace, name)` is false
    pub fn retain_existing(&self, exists: impl Fn(&str, &str) -> bool) {
        match self.states.lock() {
            Ok(mut states) => states.retain(|key, _| {
                key.split_once('/')
                    .is_some_and(|(namespace, name)| exists(namespace, name))
            }),
            Err(e) => warn!(error = %e, "Failed to lock backoff states"),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.states.lock().is_ok_and(|states| states.contains_key(key))
    }
}

/// Reconciler context shared by all reconciliations
pub struct Reconciler {
    pub client: Client,
    pub config: SharedControllerConfig,
    pub client_map: Arc<dyn ClientMap>,
    pub providers: Arc<ProviderRegistry>,
    pub image_vector: ImageVector,
    pub gardener_info: GardenerInfo,
    /// Advanced by the error policy, reset on success, pruned when a shoot is gone
    pub backoff_states: BackoffStates,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("providers", &self.providers)
            .field("gardener_info", &self.gardener_info)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        client: Client,
        config: SharedControllerConfig,
        client_map: Arc<dyn ClientMap>,
        providers: Arc<ProviderRegistry>,
        image_vector: ImageVector,
        gardener_info: GardenerInfo,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            client_map,
            providers,
            image_vector,
            gardener_info,
            backoff_states: BackoffStates::default(),
            cancel,
        }
    }
}

/// `garden-<project>` namespaces belong to `<project>`
pub fn project_of(shoot: &Shoot) -> &str {
    shoot
        .namespace()
        .strip_prefix("garden-")
        .unwrap_or(shoot.namespace())
}

/// Whether `shoot` is handled by the gardenlet of `seed_name`
pub fn is_responsible(shoot: &Shoot, seed_name: Option<&str>) -> bool {
    match (seed_name, shoot.spec.seed_name.as_deref()) {
        (None, _) => true,
        (Some(seed), Some(scheduled)) => seed == scheduled,
        (Some(_), None) => false,
    }
}

/// Final state of a failed flow: user errors are not retried eagerly
fn failed_state(error: &FlowError) -> LastOperationState {
    match error {
        FlowError::Failed { failures, .. }
            if failures
                .iter()
                .flat_map(|f| determine_error_codes(&f.message))
                .any(|code| code.is_user_error()) =>
        {
            LastOperationState::Failed
        }
        FlowError::Cancelled { .. } => LastOperationState::Aborted,
        _ => LastOperationState::Error,
    }
}

/// Run the reconcile flow for an assembled operation and persist its outcome
pub async fn run_reconcile_flow(
    op: Arc<Operation>,
    applier: Arc<dyn ObjectApplier>,
    providers: Arc<ProviderRegistry>,
    cancel: CancellationToken,
) -> std::result::Result<Stats, ReconcileError> {
    let span = op.logger().clone();
    run_flow(op, applier, providers, cancel).instrument(span).await
}

async fn run_flow(
    op: Arc<Operation>,
    applier: Arc<dyn ObjectApplier>,
    providers: Arc<ProviderRegistry>,
    cancel: CancellationToken,
) -> std::result::Result<Stats, ReconcileError> {
    op.start_last_operation().await?;

    let config = op.config();
    let timing = WaitTiming {
        interval: config.flow_task_retry_interval,
        timeout: config.flow_task_timeout,
    };
    let env = Arc::new(ReconcileEnv::new(Arc::clone(&op), applier, providers));
    let flow = build_reconcile_graph(&env, timing)?.compile();

    let reporter: Arc<dyn ProgressReporter> = Arc::clone(&op) as Arc<dyn ProgressReporter>;
    let cleaner: Arc<dyn ErrorCleaner> = Arc::clone(&op) as Arc<dyn ErrorCleaner>;
    let opts = Opts {
        max_parallel: config.max_parallel_flow_tasks,
        progress_reporter: Some(reporter),
        error_cleaner: Some(cleaner),
        cancel,
    };

    match flow.run(opts).await {
        Ok(stats) => {
            op.finish_last_operation(
                LastOperationState::Succeeded,
                "Shoot cluster state has been successfully reconciled.",
            )
            .await?;
            info!("Shoot reconciled successfully");
            Ok(stats)
        }
        Err(err) => {
            if let FlowError::Failed { failures, .. } = &err {
                op.record_task_errors(failures).await?;
            }
            op.finish_last_operation(failed_state(&err), err.to_string()).await?;
            Err(ReconcileError::Flow(err))
        }
    }
}

/// Garden secrets plus the shoot's provider account secret under its binding name
async fn read_operation_secrets(
    client: &Client,
    garden_namespace: &str,
    shoot: &Shoot,
) -> Result<std::collections::BTreeMap<String, Secret>> {
    let mut secrets = read_garden_secrets(client.clone(), garden_namespace).await?;
    let binding = &shoot.spec.secret_binding_name;
    let api: Api<Secret> = Api::namespaced(client.clone(), shoot.namespace());
    match api.get_opt(binding).await {
        Ok(Some(secret)) => {
            secrets.insert(binding.clone(), secret);
        }
        Ok(None) => debug!(secret = %binding, "Provider account secret not found"),
        Err(e) => return Err(Error::kube("Secret", shoot.namespace(), binding, e)),
    }
    Ok(secrets)
}

/// Controller entry point for one shoot
pub async fn reconcile(shoot: Arc<Shoot>, ctx: Arc<Reconciler>) -> std::result::Result<Action, ReconcileError> {
    let config = ctx.config.read().await.clone();
    if !is_responsible(&shoot, config.seed_name.as_deref()) {
        debug!(shoot.namespace = %shoot.namespace(), shoot.name = %shoot.name(), "Shoot is scheduled onto another seed");
        return Ok(Action::await_change());
    }
    let Some(seed_name) = shoot.spec.seed_name.clone().or_else(|| config.seed_name.clone()) else {
        debug!(shoot.namespace = %shoot.namespace(), shoot.name = %shoot.name(), "Shoot is not scheduled yet");
        return Ok(Action::await_change());
    };

    let key = format!("{}/{}", shoot.namespace(), shoot.name());
    let span = info_span!("shoot.reconcile", shoot.namespace = %shoot.namespace(), shoot.name = %shoot.name());
    metrics::increment_reconciliations();
    let start = Instant::now();

    let secrets = read_operation_secrets(&ctx.client, &config.garden_namespace, &shoot).await?;
    let reconcile_interval = config.reconcile_interval;
    let op = OperationBuilder::new()
        .with_config(config)
        .with_garden_from_secrets(project_of(&shoot))
        .with_gardener_info(ctx.gardener_info.clone())
        .with_image_vector(ctx.image_vector.clone())
        .with_logger(span)
        .with_secrets(secrets)
        .with_seed_from(seed_name)
        .with_shoot(shoot.as_ref().clone())
        .build(Arc::clone(&ctx.client_map))
        .await?;
    let op = Arc::new(op);

    let seed_client = op.initialize_seed_clients().await?.clone();
    let applier: Arc<dyn ObjectApplier> = Arc::new(KubeApplier::new(seed_client));
    run_reconcile_flow(op, applier, Arc::clone(&ctx.providers), ctx.cancel.child_token()).await?;

    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    ctx.backoff_states.reset(&key);
    Ok(Action::requeue(reconcile_interval))
}
