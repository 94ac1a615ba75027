//! Subsystem checks: control plane, monitoring, logging, nodes and managed resources.

use super::resources::{check_deployment, check_etcd, check_node, check_statefulset};
use super::HealthChecker;
use crate::constants::*;
use crate::controller::condition::determine_error_codes;
use crate::controller::lister::{Lister, Selector};
use crate::crd::{Condition, Etcd, ManagedResource, ManagedResourceConditionType, Shoot, Worker, WorkerPool};
use crate::error::Result;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

const CONTROL_PLANE_DEPLOYMENTS: [&str; 4] = [
    DEPLOYMENT_GARDENER_RESOURCE_MANAGER,
    DEPLOYMENT_KUBE_APISERVER,
    DEPLOYMENT_KUBE_CONTROLLER_MANAGER,
    DEPLOYMENT_KUBE_SCHEDULER,
];

const CONTROL_PLANE_ETCDS: [&str; 2] = [ETCD_MAIN, ETCD_EVENTS];

const MONITORING_DEPLOYMENTS: [&str; 4] = [
    DEPLOYMENT_GRAFANA_OPERATORS,
    DEPLOYMENT_GRAFANA_USERS,
    DEPLOYMENT_KUBE_STATE_METRICS_SEED,
    DEPLOYMENT_KUBE_STATE_METRICS_SHOOT,
];

fn role_selector(role: &str) -> Selector {
    Selector::label(LABEL_ROLE, role)
}

/// Required names absent from `objects`, sorted
fn missing_names<K: kube::Resource>(required: &BTreeSet<&str>, objects: &[Arc<K>]) -> Vec<String> {
    let present: BTreeSet<String> = objects.iter().map(|o| o.name_any()).collect();
    required
        .iter()
        .filter(|name| !present.contains(**name))
        .map(|name| name.to_string())
        .collect()
}

fn format_names(names: &[String]) -> String {
    format!("[{}]", names.join(" "))
}

impl HealthChecker {
    fn check_required_deployments(
        &self,
        condition: &Condition,
        required: &BTreeSet<&str>,
        objects: &[Arc<Deployment>],
    ) -> Option<Condition> {
        let missing = missing_names(required, objects);
        (!missing.is_empty()).then(|| {
            self.failed_condition(
                condition,
                "DeploymentMissing",
                format!("Missing required deployments: {}", format_names(&missing)),
                vec![],
            )
        })
    }

    fn check_deployments(&self, condition: &Condition, objects: &[Arc<Deployment>]) -> Option<Condition> {
        objects.iter().find_map(|object| {
            check_deployment(object).err().map(|err| {
                self.failed_condition(
                    condition,
                    "DeploymentUnhealthy",
                    format!("Deployment {} is unhealthy: {}", object.name_any(), err),
                    vec![],
                )
            })
        })
    }

    fn check_required_statefulsets(
        &self,
        condition: &Condition,
        required: &BTreeSet<&str>,
        objects: &[Arc<StatefulSet>],
    ) -> Option<Condition> {
        let missing = missing_names(required, objects);
        (!missing.is_empty()).then(|| {
            self.failed_condition(
                condition,
                "StatefulSetMissing",
                format!("Missing required stateful sets: {}", format_names(&missing)),
                vec![],
            )
        })
    }

    fn check_statefulsets(&self, condition: &Condition, objects: &[Arc<StatefulSet>]) -> Option<Condition> {
        objects.iter().find_map(|object| {
            check_statefulset(object).err().map(|err| {
                self.failed_condition(
                    condition,
                    "StatefulSetUnhealthy",
                    format!("Stateful set {} is unhealthy: {}", object.name_any(), err),
                    vec![],
                )
            })
        })
    }

    fn check_required_etcds(
        &self,
        condition: &Condition,
        required: &BTreeSet<&str>,
        objects: &[Arc<Etcd>],
    ) -> Option<Condition> {
        let missing = missing_names(required, objects);
        (!missing.is_empty()).then(|| {
            self.failed_condition(
                condition,
                "EtcdMissing",
                format!("Missing required etcds: {}", format_names(&missing)),
                vec![],
            )
        })
    }

    fn check_etcds(&self, condition: &Condition, objects: &[Arc<Etcd>]) -> Option<Condition> {
        objects.iter().find_map(|object| {
            check_etcd(object).err().map(|err| {
                let codes = object.last_error().map(determine_error_codes).unwrap_or_default();
                self.failed_condition(
                    condition,
                    "EtcdUnhealthy",
                    format!("Etcd extension resource {} is unhealthy: {}", object.name_any(), err),
                    codes,
                )
            })
        })
    }

    /// Deployments the control plane of `shoot` needs
    ///
    /// The cluster autoscaler is only required when a pool is autoscaled and no
    /// worker is being rolled; it is scaled down during rolling updates.
    fn required_control_plane_deployments(
        &self,
        shoot: &Shoot,
        namespace: &str,
        workers: &dyn Lister<Worker>,
    ) -> Result<BTreeSet<&'static str>> {
        let mut required: BTreeSet<&'static str> = CONTROL_PLANE_DEPLOYMENTS.into_iter().collect();
        if shoot.spec.provider.workers.iter().any(WorkerPool::is_autoscaled) {
            let rolling = workers
                .list(Some(namespace), &Selector::everything())?
                .iter()
                .any(|w| w.is_processing());
            if rolling {
                debug!(namespace, "worker is processing, cluster-autoscaler not required");
            } else {
                required.insert(DEPLOYMENT_CLUSTER_AUTOSCALER);
            }
        }
        Ok(required)
    }

    /// Check the shoot's control plane components running in the seed namespace
    pub fn check_control_plane(
        &self,
        shoot: &Shoot,
        namespace: &str,
        condition: &Condition,
        deployments: &dyn Lister<Deployment>,
        etcds: &dyn Lister<Etcd>,
        workers: &dyn Lister<Worker>,
    ) -> Result<Option<Condition>> {
        let required_deployments = self.required_control_plane_deployments(shoot, namespace, workers)?;
        let selector = role_selector(ROLE_CONTROL_PLANE);

        let deployment_list = deployments.list(Some(namespace), &selector)?;
        if let Some(c) = self.check_required_deployments(condition, &required_deployments, &deployment_list) {
            return Ok(Some(c));
        }
        if let Some(c) = self.check_deployments(condition, &deployment_list) {
            return Ok(Some(c));
        }

        let required_etcds: BTreeSet<&str> = CONTROL_PLANE_ETCDS.into_iter().collect();
        let etcd_list = etcds.list(Some(namespace), &selector)?;
        if let Some(c) = self.check_required_etcds(condition, &required_etcds, &etcd_list) {
            return Ok(Some(c));
        }
        Ok(self.check_etcds(condition, &etcd_list))
    }

    /// Check the monitoring stack; skipped for testing shoots
    pub fn check_monitoring_control_plane(
        &self,
        namespace: &str,
        is_testing: bool,
        wants_alertmanager: bool,
        condition: &Condition,
        deployments: &dyn Lister<Deployment>,
        statefulsets: &dyn Lister<StatefulSet>,
    ) -> Result<Option<Condition>> {
        if is_testing {
            return Ok(None);
        }
        let selector = role_selector(ROLE_MONITORING);

        let required_deployments: BTreeSet<&str> = MONITORING_DEPLOYMENTS.into_iter().collect();
        let deployment_list = deployments.list(Some(namespace), &selector)?;
        if let Some(c) = self.check_required_deployments(condition, &required_deployments, &deployment_list) {
            return Ok(Some(c));
        }
        if let Some(c) = self.check_deployments(condition, &deployment_list) {
            return Ok(Some(c));
        }

        let mut required_statefulsets = BTreeSet::from([STATEFULSET_PROMETHEUS]);
        if wants_alertmanager {
            required_statefulsets.insert(STATEFULSET_ALERTMANAGER);
        }
        let statefulset_list = statefulsets.list(Some(namespace), &selector)?;
        if let Some(c) = self.check_required_statefulsets(condition, &required_statefulsets, &statefulset_list) {
            return Ok(Some(c));
        }
        Ok(self.check_statefulsets(condition, &statefulset_list))
    }

    /// Check the logging stack; skipped for testing shoots
    pub fn check_logging_control_plane(
        &self,
        namespace: &str,
        is_testing: bool,
        condition: &Condition,
        statefulsets: &dyn Lister<StatefulSet>,
    ) -> Result<Option<Condition>> {
        if is_testing {
            return Ok(None);
        }
        let required = BTreeSet::from([STATEFULSET_LOKI]);
        let statefulset_list = statefulsets.list(Some(namespace), &role_selector(ROLE_LOGGING))?;
        if let Some(c) = self.check_required_statefulsets(condition, &required, &statefulset_list) {
            return Ok(Some(c));
        }
        Ok(self.check_statefulsets(condition, &statefulset_list))
    }

    /// Check that every pool has enough registered nodes and all of them are healthy
    pub fn check_cluster_nodes(
        &self,
        pools: &[WorkerPool],
        condition: &Condition,
        nodes: &dyn Lister<Node>,
    ) -> Result<Option<Condition>> {
        for pool in pools {
            let pool_nodes = nodes.list(None, &Selector::label(LABEL_WORKER_POOL, pool.name.as_str()))?;
            for node in &pool_nodes {
                if let Err(err) = check_node(node) {
                    let detail = err.to_string();
                    return Ok(Some(self.failed_condition(
                        condition,
                        "NodeUnhealthy",
                        format!(
                            "Node '{}' in worker group '{}' is unhealthy: {}",
                            node.name_any(),
                            pool.name,
                            detail
                        ),
                        determine_error_codes(&detail),
                    )));
                }
            }
            let registered = i32::try_from(pool_nodes.len()).unwrap_or(i32::MAX);
            if registered < pool.minimum {
                return Ok(Some(self.failed_condition(
                    condition,
                    "MissingNodes",
                    format!(
                        "Not enough worker nodes registered in worker pool '{}' to meet minimum desired machine count. ({}/{}).",
                        pool.name, registered, pool.minimum
                    ),
                    vec![],
                )));
            }
        }
        Ok(None)
    }

    /// Check a managed resource's generation and its applied/healthy conditions
    pub fn check_managed_resource(
        &self,
        condition: &Condition,
        managed_resource: &ManagedResource,
    ) -> Option<Condition> {
        let generation = managed_resource.metadata.generation.unwrap_or_default();
        let status = managed_resource.status.clone().unwrap_or_default();
        if generation != status.observed_generation {
            return Some(self.failed_condition(
                condition,
                "Outdated",
                format!(
                    "observed generation of managed resource {}/{} outdated ({}/{})",
                    managed_resource.namespace().unwrap_or_default(),
                    managed_resource.name_any(),
                    status.observed_generation,
                    generation
                ),
                vec![],
            ));
        }

        let mut missing = Vec::new();
        for required in ManagedResourceConditionType::REQUIRED {
            match status.conditions.iter().find(|c| c.r#type == required.as_str()) {
                None => missing.push(required.as_str().to_string()),
                Some(reported) if reported.status != "True" => {
                    return Some(self.failed_condition(
                        condition,
                        reported.reason.clone(),
                        reported.message.clone(),
                        reported.codes.clone(),
                    ));
                }
                Some(_) => {}
            }
        }
        (!missing.is_empty()).then(|| {
            self.failed_condition(
                condition,
                "MissingCondition",
                format!(
                    "ManagedResource {} is missing the following condition(s), {}",
                    managed_resource.name_any(),
                    format_names(&missing)
                ),
                vec![],
            )
        })
    }
}
