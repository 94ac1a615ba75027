//! # Shoot Care
//!
//! Periodic evaluation of a shoot's four aggregate conditions.
//!
//! Per condition the previous value is fed through the subsystem check (which
//! merges via the checker's failed/updated condition rules), then through
//! [`pardon_condition`]. Healthy subsystems get their success reason.
//!
//! | Condition | Checks |
//! |---|---|
//! | `APIServerAvailable` | `/healthz` of the shoot API server |
//! | `ControlPlaneHealthy` | control plane, monitoring and logging in the seed, extension reports |
//! | `EveryNodeReady` | nodes of every worker pool, extension reports |
//! | `SystemComponentsHealthy` | system component managed resources, extension reports |

pub mod api_server;
pub mod extensions;

pub use api_server::{ApiServerHealth, ApiServerProbe, KubeApiServerProbe};
pub use extensions::{extension_conditions, read_extension_conditions};

use crate::config::ControllerConfig;
use crate::constants::{MANAGED_RESOURCE_SHOOT_CORE, MANAGED_RESOURCE_SHOOT_CORE_NAMESPACES};
use crate::controller::condition::{get_or_init_condition, updated_condition, Clock};
use crate::controller::health::{pardon_condition, HealthChecker};
use crate::controller::lister::{Lister, Selector};
use crate::crd::{
    Condition, ConditionStatus, ConditionType, Etcd, ExtensionCondition, ManagedResource, Shoot, Worker,
};
use crate::error::Result;
use chrono::TimeDelta;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const HIBERNATED_REASON: &str = "ConditionNotChecked";
const HIBERNATED_MESSAGE: &str = "Shoot cluster has been hibernated.";
const CHECK_ERROR_REASON: &str = "ConditionCheckError";

const SYSTEM_COMPONENT_MANAGED_RESOURCES: [&str; 2] =
    [MANAGED_RESOURCE_SHOOT_CORE, MANAGED_RESOURCE_SHOOT_CORE_NAMESPACES];

fn success(r#type: ConditionType) -> (&'static str, &'static str) {
    match r#type {
        ConditionType::ApiServerAvailable => (
            "APIServerRunning",
            "API server /healthz endpoint responded with success status code.",
        ),
        ConditionType::ControlPlaneHealthy => ("ControlPlaneRunning", "All control plane components are healthy."),
        ConditionType::EveryNodeReady => ("EveryNodeReady", "Every node registered to the cluster is ready."),
        ConditionType::SystemComponentsHealthy => ("SystemComponentsRunning", "All system components are healthy."),
    }
}

/// Object caches of the shoot's control plane namespace in the seed
#[allow(missing_debug_implementations)]
#[derive(Clone)]
pub struct SeedSources {
    pub deployments: Arc<dyn Lister<Deployment>>,
    pub statefulsets: Arc<dyn Lister<StatefulSet>>,
    pub etcds: Arc<dyn Lister<Etcd>>,
    pub workers: Arc<dyn Lister<Worker>>,
    pub managed_resources: Arc<dyn Lister<ManagedResource>>,
}

/// Access to the shoot cluster itself
#[allow(missing_debug_implementations)]
#[derive(Clone)]
pub struct ShootSources {
    pub api_server: Arc<dyn ApiServerProbe>,
    pub nodes: Arc<dyn Lister<Node>>,
}

/// Everything one care evaluation reads
#[derive(Clone)]
pub struct CareInputs {
    pub seed_namespace: String,
    pub seed: SeedSources,
    /// `Err` with the reason when no shoot client could be created
    pub shoot: std::result::Result<ShootSources, String>,
    pub extension_conditions: Vec<ExtensionCondition>,
}

impl std::fmt::Debug for CareInputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CareInputs")
            .field("seed_namespace", &self.seed_namespace)
            .field("shoot_reachable", &self.shoot.is_ok())
            .field("extension_conditions", &self.extension_conditions.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ShootCare {
    condition_thresholds: HashMap<ConditionType, TimeDelta>,
    stale_extension_threshold: Option<TimeDelta>,
    clock: Arc<dyn Clock>,
}

impl ShootCare {
    pub fn new(
        condition_thresholds: HashMap<ConditionType, TimeDelta>,
        stale_extension_threshold: Option<TimeDelta>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            condition_thresholds,
            stale_extension_threshold,
            clock,
        }
    }

    pub fn from_config(config: &ControllerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.condition_thresholds.clone(),
            config.stale_extension_health_check_threshold,
            clock,
        )
    }

    fn checker(&self, shoot: &Shoot) -> HealthChecker {
        HealthChecker::new(
            self.condition_thresholds.clone(),
            self.stale_extension_threshold,
            shoot.last_operation().cloned(),
            Arc::clone(&self.clock),
        )
    }

    /// Compute all four conditions of `shoot`, in [`ConditionType::ALL`] order
    pub async fn evaluate(&self, shoot: &Shoot, inputs: &CareInputs) -> Vec<Condition> {
        let previous = |ty| get_or_init_condition(shoot.conditions(), ty);
        let clock = self.clock.as_ref();

        let hibernated = shoot.is_hibernation_enabled()
            || shoot.status.as_ref().is_some_and(|s| s.is_hibernated);
        if hibernated {
            debug!("Shoot is hibernated, conditions are not checked");
            return ConditionType::ALL
                .into_iter()
                .map(|ty| {
                    updated_condition(
                        &previous(ty),
                        ConditionStatus::True,
                        HIBERNATED_REASON,
                        HIBERNATED_MESSAGE,
                        vec![],
                        clock,
                    )
                })
                .collect();
        }

        let checker = self.checker(shoot);

        let api_server = {
            let condition = previous(ConditionType::ApiServerAvailable);
            match &inputs.shoot {
                Ok(sources) => Ok(check_api_server(&checker, &condition, sources.api_server.as_ref()).await),
                Err(reason) => Err(shoot_client_error(reason)),
            }
            .map_or_else(|message| check_error(&condition, message, clock), |c| self.finish(&condition, c, clock))
        };

        let control_plane = {
            let condition = previous(ConditionType::ControlPlaneHealthy);
            let result = check_control_plane(&checker, shoot, inputs, &condition);
            self.settle(&checker, &condition, result, &inputs.extension_conditions)
        };

        let nodes = {
            let condition = previous(ConditionType::EveryNodeReady);
            match &inputs.shoot {
                Ok(sources) => {
                    let result = checker.check_cluster_nodes(
                        &shoot.spec.provider.workers,
                        &condition,
                        sources.nodes.as_ref(),
                    );
                    self.settle(&checker, &condition, result, &inputs.extension_conditions)
                }
                Err(reason) => check_error(&condition, shoot_client_error(reason), clock),
            }
        };

        let system_components = {
            let condition = previous(ConditionType::SystemComponentsHealthy);
            let result = check_system_components(&checker, &inputs.seed_namespace, &inputs.seed, &condition);
            self.settle(&checker, &condition, result, &inputs.extension_conditions)
        };

        [api_server, control_plane, nodes, system_components]
            .into_iter()
            .map(|condition| pardon_condition(condition, shoot.last_operation(), shoot.last_errors(), clock))
            .collect()
    }

    /// Fold a subsystem result, then the extension reports, into the final condition
    fn settle(
        &self,
        checker: &HealthChecker,
        condition: &Condition,
        result: Result<Option<Condition>>,
        extension_conditions: &[ExtensionCondition],
    ) -> Condition {
        let clock = self.clock.as_ref();
        match result {
            Err(e) => check_error(condition, e.to_string(), clock),
            Ok(Some(unhealthy)) => unhealthy,
            Ok(None) => {
                let reported = checker.check_extension_condition(condition, extension_conditions);
                self.finish(condition, reported, clock)
            }
        }
    }

    fn finish(&self, condition: &Condition, result: Option<Condition>, clock: &dyn Clock) -> Condition {
        result.unwrap_or_else(|| {
            let (reason, message) = success(condition.r#type);
            updated_condition(condition, ConditionStatus::True, reason, message, vec![], clock)
        })
    }
}

fn shoot_client_error(reason: &str) -> String {
    format!("Could not initialize Shoot client for health check: {reason}")
}

fn check_error(condition: &Condition, message: String, clock: &dyn Clock) -> Condition {
    updated_condition(condition, ConditionStatus::Unknown, CHECK_ERROR_REASON, message, vec![], clock)
}

async fn check_api_server(checker: &HealthChecker, condition: &Condition, probe: &dyn ApiServerProbe) -> Option<Condition> {
    match probe.healthz().await {
        ApiServerHealth::Healthy => None,
        ApiServerHealth::Unhealthy { status_code, message } => Some(checker.failed_condition(
            condition,
            "HealthzRequestFailed",
            format!("API server /healthz endpoint check returned a non ok status code {status_code}. ({message})"),
            vec![],
        )),
        ApiServerHealth::Unreachable(error) => Some(checker.failed_condition(
            condition,
            "HealthzRequestError",
            format!("Request to API server /healthz endpoint failed. ({error})"),
            vec![],
        )),
    }
}

fn check_control_plane(
    checker: &HealthChecker,
    shoot: &Shoot,
    inputs: &CareInputs,
    condition: &Condition,
) -> Result<Option<Condition>> {
    let namespace = inputs.seed_namespace.as_str();
    let seed = &inputs.seed;
    if let Some(c) = checker.check_control_plane(
        shoot,
        namespace,
        condition,
        seed.deployments.as_ref(),
        seed.etcds.as_ref(),
        seed.workers.as_ref(),
    )? {
        return Ok(Some(c));
    }
    if let Some(c) = checker.check_monitoring_control_plane(
        namespace,
        shoot.is_testing(),
        shoot.wants_alertmanager(),
        condition,
        seed.deployments.as_ref(),
        seed.statefulsets.as_ref(),
    )? {
        return Ok(Some(c));
    }
    checker.check_logging_control_plane(namespace, shoot.is_testing(), condition, seed.statefulsets.as_ref())
}

fn check_system_components(
    checker: &HealthChecker,
    namespace: &str,
    seed: &SeedSources,
    condition: &Condition,
) -> Result<Option<Condition>> {
    let managed_resources = seed.managed_resources.list(Some(namespace), &Selector::everything())?;
    let missing: Vec<&str> = SYSTEM_COMPONENT_MANAGED_RESOURCES
        .into_iter()
        .filter(|name| !managed_resources.iter().any(|mr| mr.name_any() == *name))
        .collect();
    if !missing.is_empty() {
        return Ok(Some(checker.failed_condition(
            condition,
            "ManagedResourceMissing",
            format!("Missing required managed resources: [{}]", missing.join(" ")),
            vec![],
        )));
    }
    Ok(managed_resources
        .iter()
        .filter(|mr| SYSTEM_COMPONENT_MANAGED_RESOURCES.contains(&mr.name_any().as_str()))
        .find_map(|mr| checker.check_managed_resource(condition, mr)))
}
