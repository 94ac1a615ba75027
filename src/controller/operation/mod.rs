//! # Operation
//!
//! Everything one reconciliation of a shoot works with: the shoot and its seed,
//! garden information, secrets, the image vector and lazily created clients for
//! the seed and shoot clusters.
//!
//! An [`Operation`] is assembled by [`OperationBuilder`], owned by a single
//! reconciliation and never shared between runs. Configuration and image data
//! are immutable after assembly; only the shoot snapshot is replaced after each
//! successful status write.

mod builder;
mod clients;
pub mod image_vector;
mod progress;

pub use builder::{read_garden_secrets, BuildError, BuildStage, GardenSource, OperationBuilder, SeedSource, ShootSource};
pub use clients::{ClientMap, KubeClientMap};
pub use image_vector::{Image, ImageSource, ImageVector, ImageVectorError};
pub use progress::{make_description, try_update_shoot_status, KubeShootStatusClient, ShootStatusClient};

use crate::config::ControllerConfig;
use crate::constants::*;
use crate::controller::applier::{KubeApplier, ObjectApplier};
use crate::controller::condition::Clock;
use crate::crd::{Seed, Shoot};
use crate::error::{is_not_found, Error, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::core::GroupVersionKind;
use kube::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, Span};

/// A DNS domain configured in the garden
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub domain: String,
    pub provider: String,
}

/// The garden cluster as seen by one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Garden {
    pub project: String,
    pub internal_domain: Option<Domain>,
    pub default_domains: Vec<Domain>,
}

impl Garden {
    /// Read the internal and default domains from the operation's secrets
    pub fn from_secrets(project: impl Into<String>, secrets: &BTreeMap<String, Secret>) -> Result<Self> {
        let mut garden = Garden {
            project: project.into(),
            ..Default::default()
        };
        for (key, secret) in secrets {
            if key.starts_with(SECRET_ROLE_INTERNAL_DOMAIN) {
                garden.internal_domain = Some(domain_of(key, secret)?);
            } else if key.starts_with(SECRET_ROLE_DEFAULT_DOMAIN) {
                garden.default_domains.push(domain_of(key, secret)?);
            }
        }
        Ok(garden)
    }
}

fn domain_of(key: &str, secret: &Secret) -> Result<Domain> {
    let annotations = secret.metadata.annotations.clone().unwrap_or_default();
    let annotation = |name: &str| {
        annotations
            .get(name)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| Error::Config(format!("domain secret {key} is missing annotation {name}")))
    };
    Ok(Domain {
        domain: annotation(ANNOTATION_DNS_DOMAIN)?,
        provider: annotation(ANNOTATION_DNS_PROVIDER)?,
    })
}

/// Identity of the running gardenlet
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GardenerInfo {
    pub id: String,
    pub name: String,
    pub version: String,
}

pub struct Operation {
    config: ControllerConfig,
    garden: Garden,
    gardener_info: GardenerInfo,
    image_vector: ImageVector,
    logger: Span,
    secrets: BTreeMap<String, Secret>,
    seed: Seed,
    shoot: RwLock<Arc<Shoot>>,
    charts_root_path: PathBuf,
    garden_client: Client,
    client_map: Arc<dyn ClientMap>,
    status_client: Arc<dyn ShootStatusClient>,
    clock: Arc<dyn Clock>,
    seed_client: OnceCell<Client>,
    shoot_client: OnceCell<Client>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shoot = self.shoot();
        f.debug_struct("Operation")
            .field("shoot", &format!("{}/{}", shoot.namespace(), shoot.name()))
            .field("seed", &self.seed.name())
            .field("project", &self.garden.project)
            .field("secrets", &self.secrets.keys().collect::<Vec<_>>())
            .field("seed_client", &self.seed_client.initialized())
            .field("shoot_client", &self.shoot_client.initialized())
            .finish_non_exhaustive()
    }
}

impl Operation {
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn garden(&self) -> &Garden {
        &self.garden
    }

    pub fn gardener_info(&self) -> &GardenerInfo {
        &self.gardener_info
    }

    pub fn image_vector(&self) -> &ImageVector {
        &self.image_vector
    }

    /// Span carrying the shoot's identity; tasks of this operation run inside it
    pub fn logger(&self) -> &Span {
        &self.logger
    }

    pub fn secrets(&self) -> &BTreeMap<String, Secret> {
        &self.secrets
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    /// Latest known shoot, refreshed after every status write
    pub fn shoot(&self) -> Arc<Shoot> {
        Arc::clone(&self.shoot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn set_shoot(&self, shoot: Shoot) {
        *self.shoot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(shoot);
    }

    pub fn charts_root_path(&self) -> &Path {
        &self.charts_root_path
    }

    pub fn garden_client(&self) -> &Client {
        &self.garden_client
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Namespace of the shoot's control plane in the seed
    pub fn seed_namespace(&self) -> String {
        self.shoot().technical_id()
    }

    /// Seed client, created on first use
    pub async fn initialize_seed_clients(&self) -> Result<&Client> {
        self.seed_client
            .get_or_try_init(|| async {
                debug!(seed = %self.seed.name(), "Initializing seed client");
                self.client_map.seed_client(&self.seed).await
            })
            .await
    }

    /// Shoot client, created on first use
    ///
    /// Returns `None` without creating a client while the shoot is hibernated
    /// and its API server is not running.
    pub async fn initialize_shoot_clients(&self) -> Result<Option<&Client>> {
        if let Some(client) = self.shoot_client.get() {
            return Ok(Some(client));
        }
        let shoot = self.shoot();
        if shoot.is_hibernation_enabled() && !self.is_api_server_running().await? {
            debug!("Shoot is hibernated and its API server is down, skipping shoot client");
            return Ok(None);
        }
        let client = self
            .shoot_client
            .get_or_try_init(|| async { self.client_map.shoot_client(&self.seed, &shoot).await })
            .await?;
        Ok(Some(client))
    }

    /// Whether the `kube-apiserver` deployment exists, is not being deleted and has replicas
    pub async fn is_api_server_running(&self) -> Result<bool> {
        let namespace = self.seed_namespace();
        let client = self.initialize_seed_clients().await?;
        let api: Api<Deployment> = Api::namespaced(client.clone(), &namespace);
        let deployment = match api.get(DEPLOYMENT_KUBE_APISERVER).await {
            Ok(deployment) => deployment,
            Err(e) if is_not_found(&e) => return Ok(false),
            Err(e) => return Err(Error::kube("Deployment", &namespace, DEPLOYMENT_KUBE_APISERVER, e)),
        };
        Ok(api_server_running(&deployment))
    }

    /// Sorted secret keys starting with `prefix`
    pub fn secret_keys_of_role(&self, prefix: &str) -> Vec<String> {
        self.secrets
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn seed_version(&self) -> Option<&str> {
        self.seed.kubernetes_version()
    }

    pub fn shoot_version(&self) -> String {
        self.shoot().spec.kubernetes.version.clone()
    }

    fn seed_version_or_err(&self) -> Result<&str> {
        self.seed_version()
            .ok_or_else(|| Error::Config(format!("kubernetes version of seed {} is unknown", self.seed.name())))
    }

    /// Images for components running in the seed and targeting the seed
    pub fn inject_seed_seed_images(&self, values: Map<String, Value>, names: &[&str]) -> Result<Map<String, Value>> {
        let seed_version = self.seed_version_or_err()?;
        self.inject_images(values, names, seed_version, seed_version)
    }

    /// Images for components running in the seed and targeting the shoot
    pub fn inject_seed_shoot_images(&self, values: Map<String, Value>, names: &[&str]) -> Result<Map<String, Value>> {
        let seed_version = self.seed_version_or_err()?;
        self.inject_images(values, names, seed_version, &self.shoot_version())
    }

    /// Images for components running in the shoot
    pub fn inject_shoot_shoot_images(&self, values: Map<String, Value>, names: &[&str]) -> Result<Map<String, Value>> {
        let shoot_version = self.shoot_version();
        self.inject_images(values, names, &shoot_version, &shoot_version)
    }

    fn inject_images(
        &self,
        values: Map<String, Value>,
        names: &[&str],
        runtime_version: &str,
        target_version: &str,
    ) -> Result<Map<String, Value>> {
        image_vector::inject_images(values, &self.image_vector, names, runtime_version, target_version)
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// `<prefix>-<shortID>.<ingressDomain>` where the short id drops the `shoot--` prefix
    pub fn compute_ingress_host(&self, prefix: &str) -> String {
        let technical_id = self.seed_namespace();
        let short_id = technical_id.replacen(TECHNICAL_ID_PREFIX, "", 1);
        format!("{}-{}.{}", prefix, short_id, self.seed.ingress_domain())
    }

    /// `<prefix>.<shoot>.<project>.<ingressDomain>`
    pub fn compute_ingress_host_deprecated(&self, prefix: &str) -> String {
        format!(
            "{}.{}.{}.{}",
            prefix,
            self.shoot().name(),
            self.garden.project,
            self.seed.ingress_domain()
        )
    }

    pub fn compute_grafana_hosts(&self) -> Vec<String> {
        vec![
            self.compute_ingress_host_deprecated(INGRESS_PREFIX_GRAFANA_OPERATORS),
            self.compute_ingress_host_deprecated(INGRESS_PREFIX_GRAFANA_USERS),
            self.compute_ingress_host(INGRESS_PREFIX_GRAFANA_OPERATORS),
            self.compute_ingress_host(INGRESS_PREFIX_GRAFANA_USERS),
        ]
    }

    pub fn compute_prometheus_hosts(&self) -> Vec<String> {
        vec![
            self.compute_ingress_host_deprecated(INGRESS_PREFIX_PROMETHEUS),
            self.compute_prometheus_host(),
        ]
    }

    pub fn compute_prometheus_host(&self) -> String {
        self.compute_ingress_host(INGRESS_PREFIX_PROMETHEUS)
    }

    pub fn compute_alertmanager_hosts(&self) -> Vec<String> {
        vec![
            self.compute_ingress_host_deprecated(INGRESS_PREFIX_ALERTMANAGER),
            self.compute_alertmanager_host(),
        ]
    }

    pub fn compute_alertmanager_host(&self) -> String {
        self.compute_ingress_host(INGRESS_PREFIX_ALERTMANAGER)
    }

    /// Remove the `Cluster` extension resource named after the seed namespace
    pub async fn delete_cluster_resource_from_seed(&self) -> Result<()> {
        let client = self.initialize_seed_clients().await?;
        let gvk = GroupVersionKind::gvk("extensions.gardener.cloud", "v1alpha1", "Cluster");
        KubeApplier::new(client.clone())
            .delete(&gvk, None, &self.seed_namespace())
            .await
    }
}

/// Running means present, not being deleted and scaled above zero
pub fn api_server_running(deployment: &Deployment) -> bool {
    if deployment.metadata.deletion_timestamp.is_some() {
        return false;
    }
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .is_some_and(|replicas| replicas > 0)
}
