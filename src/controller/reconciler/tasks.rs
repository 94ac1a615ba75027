//! The shoot reconcile task graph.

use super::objects::{self, deployment_gvk, etcd_gvk, extension_gvk};
use super::TaskError;
use crate::constants::*;
use crate::controller::applier::ObjectApplier;
use crate::controller::flow::{FlowError, Graph, Task, TaskResult};
use crate::controller::health::resources::{check_deployment, check_etcd};
use crate::controller::operation::Operation;
use crate::crd::{Etcd, ExtensionStatus, LastOperationState, WorkerPool};
use crate::provider::{ProviderConfig, ProviderContext, ProviderRegistry};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const FLOW_NAME: &str = "Shoot cluster reconciliation";

/// Collaborators shared by every task of one flow run
pub struct ReconcileEnv {
    op: Arc<Operation>,
    applier: Arc<dyn ObjectApplier>,
    providers: Arc<ProviderRegistry>,
    provider_config: OnceCell<ProviderConfig>,
}

impl std::fmt::Debug for ReconcileEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileEnv")
            .field("op", &self.op)
            .field("providers", &self.providers)
            .field("provider_config", &self.provider_config.initialized())
            .finish_non_exhaustive()
    }
}

fn typed<K: DeserializeOwned>(object: DynamicObject) -> Result<K, TaskError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

impl ReconcileEnv {
    pub fn new(op: Arc<Operation>, applier: Arc<dyn ObjectApplier>, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            op,
            applier,
            providers,
            provider_config: OnceCell::new(),
        }
    }

    fn namespace(&self) -> String {
        self.op.seed_namespace()
    }

    fn hibernated(&self) -> bool {
        self.op.shoot().is_hibernation_enabled()
    }

    /// Generated once per run from the provider account secret
    async fn provider_config(&self) -> Result<&ProviderConfig, TaskError> {
        self.provider_config
            .get_or_try_init(|| async {
                let shoot = self.op.shoot();
                let binding = &shoot.spec.secret_binding_name;
                let secret = self
                    .op
                    .secrets()
                    .get(binding)
                    .ok_or_else(|| TaskError::MissingInput(format!("provider account secret {binding}")))?;
                let credentials: BTreeMap<String, Vec<u8>> = secret
                    .data
                    .iter()
                    .flatten()
                    .map(|(k, v)| (k.clone(), v.0.clone()))
                    .collect();
                let context = ProviderContext::for_shoot(&shoot, credentials);
                Ok::<_, TaskError>(self.providers.generate(&context).await?)
            })
            .await
    }

    fn image(&self, name: &str) -> Result<String, TaskError> {
        let values = self.op.inject_seed_shoot_images(Map::new(), &[name])?;
        values
            .get("images")
            .and_then(|images| images.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TaskError::MissingInput(format!("image {name}")))
    }

    async fn get(&self, gvk: &GroupVersionKind, name: &str) -> Result<DynamicObject, TaskError> {
        let namespace = self.namespace();
        self.applier
            .get(gvk, Some(&namespace), name)
            .await?
            .ok_or_else(|| TaskError::NotReady {
                kind: gvk.kind.clone(),
                name: format!("{namespace}/{name}"),
                reason: "not found".to_string(),
            })
    }

    /// An extension resource is ready once its last operation succeeded for the current generation
    async fn wait_for_extension(&self, kind: &str, name: &str) -> Result<(), TaskError> {
        let object = self.get(&extension_gvk(kind), name).await?;
        let not_ready = |reason: String| TaskError::NotReady {
            kind: kind.to_string(),
            name: format!("{}/{}", self.namespace(), name),
            reason,
        };
        let status: ExtensionStatus = match object.data.get("status") {
            Some(status) => serde_json::from_value(status.clone())?,
            None => return Err(not_ready("no status reported yet".to_string())),
        };
        if let Some(error) = &status.last_error {
            return Err(TaskError::ExtensionFailed {
                kind: kind.to_string(),
                name: format!("{}/{}", self.namespace(), name),
                message: error.description.clone(),
            });
        }
        let generation = object.metadata.generation.unwrap_or_default();
        if status.observed_generation.unwrap_or_default() < generation {
            return Err(not_ready("observed generation outdated".to_string()));
        }
        match status.last_operation.as_ref().map(|op| op.state) {
            Some(LastOperationState::Succeeded) => Ok(()),
            Some(state) => Err(not_ready(format!("last operation is {state:?}"))),
            None => Err(not_ready("no last operation reported yet".to_string())),
        }
    }

    async fn deploy_namespace(&self) -> TaskResult {
        self.applier.apply(&objects::namespace(&self.op.shoot())?).await?;
        Ok(())
    }

    async fn deploy_cloud_provider_secret(&self) -> TaskResult {
        let config = self.provider_config().await?;
        let shoot = self.op.shoot();
        let binding = &shoot.spec.secret_binding_name;
        let mut data: BTreeMap<String, Vec<u8>> = self
            .op
            .secrets()
            .get(binding)
            .and_then(|s| s.data.as_ref())
            .map(|d| d.iter().map(|(k, v)| (k.clone(), v.0.clone())).collect())
            .unwrap_or_default();
        data.extend(config.secret_data.clone());
        self.applier
            .apply(&objects::cloud_provider_secret(&self.namespace(), &data)?)
            .await?;
        Ok(())
    }

    async fn deploy_infrastructure(&self) -> TaskResult {
        let config = self.provider_config().await?;
        let object = objects::infrastructure(&self.op.shoot(), &self.namespace(), &config.config);
        self.applier.apply(&object).await?;
        Ok(())
    }

    async fn wait_infrastructure(&self) -> TaskResult {
        self.wait_for_extension("Infrastructure", self.op.shoot().name()).await?;
        Ok(())
    }

    async fn deploy_etcds(&self) -> TaskResult {
        let namespace = self.namespace();
        for name in [ETCD_MAIN, ETCD_EVENTS] {
            self.applier
                .apply(&objects::etcd(&namespace, name, self.hibernated()))
                .await?;
        }
        Ok(())
    }

    async fn wait_etcds(&self) -> TaskResult {
        for name in [ETCD_MAIN, ETCD_EVENTS] {
            let etcd: Etcd = typed(self.get(&etcd_gvk(), name).await?)?;
            check_etcd(&etcd).map_err(|e| TaskError::NotReady {
                kind: "Etcd".to_string(),
                name: format!("{}/{}", self.namespace(), name),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn deploy_control_plane_deployment(&self, name: &str) -> TaskResult {
        let replicas = if self.hibernated() { 0 } else { 1 };
        let object = objects::control_plane_deployment(&self.namespace(), name, &self.image(name)?, replicas)?;
        self.applier.apply(&object).await?;
        Ok(())
    }

    async fn wait_kube_apiserver(&self) -> TaskResult {
        let deployment: Deployment = typed(self.get(&deployment_gvk(), DEPLOYMENT_KUBE_APISERVER).await?)?;
        check_deployment(&deployment).map_err(|e| TaskError::NotReady {
            kind: "Deployment".to_string(),
            name: format!("{}/{}", self.namespace(), DEPLOYMENT_KUBE_APISERVER),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn deploy_internal_dns(&self) -> TaskResult {
        let Some(domain) = self.op.garden().internal_domain.clone() else {
            return Ok(());
        };
        let shoot = self.op.shoot();
        let record_domain = format!("{}.{}.{}", shoot.name(), self.op.garden().project, domain.domain);
        let object = objects::internal_dns_record(&shoot, &self.namespace(), &domain.provider, &record_domain);
        self.applier.apply(&object).await?;
        Ok(())
    }

    async fn deploy_control_plane(&self) -> TaskResult {
        let config = self.provider_config().await?;
        let object = objects::control_plane(&self.op.shoot(), &self.namespace(), &config.config);
        self.applier.apply(&object).await?;
        Ok(())
    }

    async fn deploy_worker(&self) -> TaskResult {
        self.applier
            .apply(&objects::worker(&self.op.shoot(), &self.namespace()))
            .await?;
        Ok(())
    }

    async fn wait_worker(&self) -> TaskResult {
        self.wait_for_extension("Worker", self.op.shoot().name()).await?;
        Ok(())
    }

    async fn deploy_system_components(&self) -> TaskResult {
        let namespace = self.namespace();
        for name in [MANAGED_RESOURCE_SHOOT_CORE, MANAGED_RESOURCE_SHOOT_CORE_NAMESPACES] {
            self.applier
                .apply(&objects::managed_resource(&namespace, name, None, ROLE_SYSTEM_COMPONENT))
                .await?;
        }
        Ok(())
    }

    async fn delete_cluster_autoscaler(&self) -> TaskResult {
        self.applier
            .delete(&deployment_gvk(), Some(&self.namespace()), DEPLOYMENT_CLUSTER_AUTOSCALER)
            .await?;
        Ok(())
    }

    async fn deploy_monitoring(&self) -> TaskResult {
        let namespace = self.namespace();
        let mut hosts = BTreeMap::from([
            ("grafana-operators".to_string(), self.op.compute_ingress_host(INGRESS_PREFIX_GRAFANA_OPERATORS)),
            ("grafana-users".to_string(), self.op.compute_ingress_host(INGRESS_PREFIX_GRAFANA_USERS)),
            ("prometheus".to_string(), self.op.compute_prometheus_host()),
        ]);
        if self.op.shoot().wants_alertmanager() {
            hosts.insert("alertmanager".to_string(), self.op.compute_alertmanager_host());
        }
        self.applier.apply(&objects::monitoring_hosts(&namespace, hosts)?).await?;
        self.applier
            .apply(&objects::managed_resource(&namespace, "shoot-monitoring", Some("seed"), ROLE_MONITORING))
            .await?;
        Ok(())
    }

    async fn deploy_logging(&self) -> TaskResult {
        self.applier
            .apply(&objects::managed_resource(&self.namespace(), "shoot-logging", Some("seed"), ROLE_LOGGING))
            .await?;
        Ok(())
    }
}

fn task<F, Fut>(env: &Arc<ReconcileEnv>, name: &str, f: F) -> Task
where
    F: Fn(Arc<ReconcileEnv>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    let env = Arc::clone(env);
    Task::new(name, move |_| f(Arc::clone(&env)))
}

/// Timing of the wait tasks
#[derive(Debug, Clone, Copy)]
pub struct WaitTiming {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Assemble the reconcile graph for the operation's shoot
pub fn build_reconcile_graph(env: &Arc<ReconcileEnv>, timing: WaitTiming) -> Result<Graph, FlowError> {
    let shoot = env.op.shoot();
    let hibernated = shoot.is_hibernation_enabled();
    let dns_enabled = env.op.garden().internal_domain.is_some();
    let wants_autoscaler = !hibernated && shoot.spec.provider.workers.iter().any(WorkerPool::is_autoscaled);
    let testing = shoot.is_testing();
    let wait = |task: Task| task.retry_until_timeout(timing.interval, timing.timeout);

    debug!(hibernated, dns_enabled, wants_autoscaler, testing, "Building reconcile flow");

    let mut graph = Graph::new(FLOW_NAME);
    let namespace = graph.add(task(env, "Deploying Shoot namespace in Seed", |env| async move {
        env.deploy_namespace().await
    }))?;
    let secret = graph.add(
        task(env, "Deploying cloud provider account secret", |env| async move {
            env.deploy_cloud_provider_secret().await
        })
        .depends_on(&[&namespace]),
    )?;
    let infrastructure = graph.add(
        task(env, "Deploying Shoot infrastructure", |env| async move {
            env.deploy_infrastructure().await
        })
        .depends_on(&[&secret]),
    )?;
    let wait_infrastructure = graph.add(
        wait(task(env, "Waiting until shoot infrastructure has been reconciled", |env| async move {
            env.wait_infrastructure().await
        }))
        .depends_on(&[&infrastructure]),
    )?;
    let etcds = graph.add(
        task(env, "Deploying main and events etcd", |env| async move { env.deploy_etcds().await })
            .depends_on(&[&secret]),
    )?;
    let wait_etcds = graph.add(
        wait(task(env, "Waiting until main and event etcd report readiness", |env| async move {
            env.wait_etcds().await
        }))
        .skip_if(hibernated)
        .depends_on(&[&etcds]),
    )?;
    let kube_apiserver = graph.add(
        task(env, "Deploying Kubernetes API server", |env| async move {
            env.deploy_control_plane_deployment(DEPLOYMENT_KUBE_APISERVER).await
        })
        .depends_on(&[&wait_etcds, &wait_infrastructure]),
    )?;
    let wait_kube_apiserver = graph.add(
        wait(task(env, "Waiting until Kubernetes API server reports readiness", |env| async move {
            env.wait_kube_apiserver().await
        }))
        .skip_if(hibernated)
        .depends_on(&[&kube_apiserver]),
    )?;
    let internal_dns = graph.add(
        task(env, "Deploying internal domain DNS record", |env| async move {
            env.deploy_internal_dns().await
        })
        .do_if(dns_enabled)
        .depends_on(&[&wait_kube_apiserver]),
    )?;
    let controller_manager = graph.add(
        task(env, "Deploying Kubernetes controller manager", |env| async move {
            env.deploy_control_plane_deployment(DEPLOYMENT_KUBE_CONTROLLER_MANAGER).await
        })
        .depends_on(&[&wait_kube_apiserver]),
    )?;
    let scheduler = graph.add(
        task(env, "Deploying Kubernetes scheduler", |env| async move {
            env.deploy_control_plane_deployment(DEPLOYMENT_KUBE_SCHEDULER).await
        })
        .depends_on(&[&wait_kube_apiserver]),
    )?;
    let control_plane = graph.add(
        task(env, "Deploying shoot control plane components", |env| async move {
            env.deploy_control_plane().await
        })
        .depends_on(&[&wait_infrastructure, &wait_kube_apiserver]),
    )?;
    let worker = graph.add(
        task(env, "Configuring shoot worker pools", |env| async move { env.deploy_worker().await })
            .depends_on(&[&control_plane, &controller_manager, &scheduler, &internal_dns]),
    )?;
    let wait_worker = graph.add(
        wait(task(env, "Waiting until shoot worker nodes have been reconciled", |env| async move {
            env.wait_worker().await
        }))
        .skip_if(hibernated)
        .depends_on(&[&worker]),
    )?;
    graph.add(
        task(env, "Deploying system component managed resources", |env| async move {
            env.deploy_system_components().await
        })
        .depends_on(&[&wait_kube_apiserver, &internal_dns]),
    )?;
    graph.add(
        task(env, "Deploying cluster autoscaler", |env| async move {
            env.deploy_control_plane_deployment(DEPLOYMENT_CLUSTER_AUTOSCALER).await
        })
        .do_if(wants_autoscaler)
        .depends_on(&[&wait_worker]),
    )?;
    graph.add(
        task(env, "Deleting cluster autoscaler", |env| async move {
            env.delete_cluster_autoscaler().await
        })
        .do_if(!wants_autoscaler)
        .depends_on(&[&wait_worker]),
    )?;
    graph.add(
        task(env, "Deploying Shoot monitoring stack in Seed", |env| async move {
            env.deploy_monitoring().await
        })
        .skip_if(testing)
        .depends_on(&[&wait_kube_apiserver]),
    )?;
    graph.add(
        task(env, "Deploying shoot logging stack in Seed", |env| async move {
            env.deploy_logging().await
        })
        .skip_if(testing)
        .depends_on(&[&namespace]),
    )?;

    info!(flow = FLOW_NAME, "Reconcile flow assembled");
    Ok(graph)
}
