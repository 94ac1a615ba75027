//! Staged assembly of an [`Operation`].
//!
//! All required inputs are validated up front; a missing input is reported
//! together with every other missing input. Assembly then runs the stages of
//! [`BuildStage::ALL`] in order and stops at the first failing stage. No
//! partially assembled operation is ever returned.

use super::clients::ClientMap;
use super::progress::{KubeShootStatusClient, ShootStatusClient};
use super::{Garden, GardenerInfo, ImageVector, Operation};
use crate::config::ControllerConfig;
use crate::constants::LABEL_SECRET_ROLE;
use crate::controller::condition::{Clock, SystemClock};
use crate::crd::{Seed, Shoot};
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildStage {
    Client,
    Config,
    Secrets,
    Garden,
    GardenerInfo,
    ImageVector,
    Logger,
    Seed,
    Shoot,
}

impl BuildStage {
    /// Stages in execution order
    pub const ALL: [BuildStage; 9] = [
        BuildStage::Client,
        BuildStage::Config,
        BuildStage::Secrets,
        BuildStage::Garden,
        BuildStage::GardenerInfo,
        BuildStage::ImageVector,
        BuildStage::Logger,
        BuildStage::Seed,
        BuildStage::Shoot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuildStage::Client => "client",
            BuildStage::Config => "config",
            BuildStage::Secrets => "secrets",
            BuildStage::Garden => "garden",
            BuildStage::GardenerInfo => "gardener info",
            BuildStage::ImageVector => "image vector",
            BuildStage::Logger => "logger",
            BuildStage::Seed => "seed",
            BuildStage::Shoot => "shoot",
        }
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("required operation inputs are not set: {}", .0.join(", "))]
    MissingInputs(Vec<&'static str>),

    #[error("failed to build operation at stage {stage}: {source}")]
    Stage {
        stage: BuildStage,
        #[source]
        source: Error,
    },
}

#[derive(Debug, Clone)]
pub enum GardenSource {
    Object(Garden),
    /// Project name plus the domains found in the operation's secrets
    FromSecrets { project: String },
}

#[derive(Debug, Clone)]
pub enum SeedSource {
    Object(Box<Seed>),
    /// Read from the garden cluster
    Named(String),
}

#[derive(Debug, Clone)]
pub enum ShootSource {
    Object(Box<Shoot>),
    /// Read from the garden cluster
    Named { namespace: String, name: String },
}

#[derive(Default)]
pub struct OperationBuilder {
    config: Option<ControllerConfig>,
    garden: Option<GardenSource>,
    gardener_info: Option<GardenerInfo>,
    image_vector: Option<ImageVector>,
    logger: Option<Span>,
    secrets: Option<BTreeMap<String, Secret>>,
    seed: Option<SeedSource>,
    shoot: Option<ShootSource>,
    charts_root_path: Option<PathBuf>,
    status_client: Option<Arc<dyn ShootStatusClient>>,
    clock: Option<Arc<dyn Clock>>,
}

impl OperationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_garden(mut self, garden: Garden) -> Self {
        self.garden = Some(GardenSource::Object(garden));
        self
    }

    pub fn with_garden_from_secrets(mut self, project: impl Into<String>) -> Self {
        self.garden = Some(GardenSource::FromSecrets {
            project: project.into(),
        });
        self
    }

    pub fn with_gardener_info(mut self, info: GardenerInfo) -> Self {
        self.gardener_info = Some(info);
        self
    }

    pub fn with_image_vector(mut self, image_vector: ImageVector) -> Self {
        self.image_vector = Some(image_vector);
        self
    }

    pub fn with_logger(mut self, logger: Span) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_secrets(mut self, secrets: BTreeMap<String, Secret>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = Some(SeedSource::Object(Box::new(seed)));
        self
    }

    pub fn with_seed_from(mut self, name: impl Into<String>) -> Self {
        self.seed = Some(SeedSource::Named(name.into()));
        self
    }

    pub fn with_shoot(mut self, shoot: Shoot) -> Self {
        self.shoot = Some(ShootSource::Object(Box::new(shoot)));
        self
    }

    pub fn with_shoot_from(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.shoot = Some(ShootSource::Named {
            namespace: namespace.into(),
            name: name.into(),
        });
        self
    }

    /// Defaults to the configured charts path
    pub fn with_charts_root_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.charts_root_path = Some(path.into());
        self
    }

    /// Defaults to writing through the garden client
    pub fn with_status_client(mut self, client: Arc<dyn ShootStatusClient>) -> Self {
        self.status_client = Some(client);
        self
    }

    /// Defaults to the system clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Names of all required inputs that are not set, in build order
    pub fn missing_inputs(&self) -> Vec<&'static str> {
        [
            ("config", self.config.is_none()),
            ("garden", self.garden.is_none()),
            ("gardener info", self.gardener_info.is_none()),
            ("image vector", self.image_vector.is_none()),
            ("logger", self.logger.is_none()),
            ("secrets", self.secrets.is_none()),
            ("seed", self.seed.is_none()),
            ("shoot", self.shoot.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect()
    }

    pub async fn build(self, client_map: Arc<dyn ClientMap>) -> Result<Operation, BuildError> {
        let missing = self.missing_inputs();
        if !missing.is_empty() {
            return Err(BuildError::MissingInputs(missing));
        }

        let mut assembly = Assembly::new(self);
        for stage in BuildStage::ALL {
            assembly
                .run(stage, client_map.as_ref())
                .await
                .map_err(|source| BuildError::Stage { stage, source })?;
            debug!(stage = %stage, "Operation build stage completed");
        }
        assembly.finish(client_map)
    }
}

/// Outputs of the stages run so far
struct Assembly {
    inputs: OperationBuilder,
    garden_client: Option<Client>,
    status_client: Option<Arc<dyn ShootStatusClient>>,
    config: Option<ControllerConfig>,
    secrets: Option<BTreeMap<String, Secret>>,
    garden: Option<Garden>,
    gardener_info: Option<GardenerInfo>,
    image_vector: Option<ImageVector>,
    logger: Option<Span>,
    seed: Option<Seed>,
    shoot: Option<Shoot>,
}

impl Assembly {
    fn new(inputs: OperationBuilder) -> Self {
        Self {
            inputs,
            garden_client: None,
            status_client: None,
            config: None,
            secrets: None,
            garden: None,
            gardener_info: None,
            image_vector: None,
            logger: None,
            seed: None,
            shoot: None,
        }
    }

    fn garden_client(&self) -> Result<Client> {
        self.garden_client.clone().ok_or(Error::Client {
            cluster: "garden",
            message: "garden client is not initialized".to_string(),
        })
    }

    async fn run(&mut self, stage: BuildStage, client_map: &dyn ClientMap) -> Result<()> {
        match stage {
            BuildStage::Client => {
                let client = client_map.garden_client().await?;
                self.status_client = Some(match self.inputs.status_client.take() {
                    Some(status_client) => status_client,
                    None => Arc::new(KubeShootStatusClient::new(client.clone())),
                });
                self.garden_client = Some(client);
            }
            BuildStage::Config => self.config = self.inputs.config.take(),
            BuildStage::Secrets => self.secrets = self.inputs.secrets.take(),
            BuildStage::Garden => {
                self.garden = match self.inputs.garden.take() {
                    Some(GardenSource::Object(garden)) => Some(garden),
                    Some(GardenSource::FromSecrets { project }) => {
                        let secrets = self.secrets.as_ref().cloned().unwrap_or_default();
                        Some(Garden::from_secrets(project, &secrets)?)
                    }
                    None => None,
                }
            }
            BuildStage::GardenerInfo => self.gardener_info = self.inputs.gardener_info.take(),
            BuildStage::ImageVector => self.image_vector = self.inputs.image_vector.take(),
            BuildStage::Logger => self.logger = self.inputs.logger.take(),
            BuildStage::Seed => {
                self.seed = match self.inputs.seed.take() {
                    Some(SeedSource::Object(seed)) => Some(*seed),
                    Some(SeedSource::Named(name)) => Some(
                        Api::<Seed>::all(self.garden_client()?)
                            .get(&name)
                            .await
                            .map_err(|e| Error::kube("Seed", "", &name, e))?,
                    ),
                    None => None,
                }
            }
            BuildStage::Shoot => {
                self.shoot = match self.inputs.shoot.take() {
                    Some(ShootSource::Object(shoot)) => Some(*shoot),
                    Some(ShootSource::Named { namespace, name }) => Some(
                        Api::<Shoot>::namespaced(self.garden_client()?, &namespace)
                            .get(&name)
                            .await
                            .map_err(|e| Error::kube("Shoot", &namespace, &name, e))?,
                    ),
                    None => None,
                }
            }
        }
        Ok(())
    }

    fn finish(self, client_map: Arc<dyn ClientMap>) -> Result<Operation, BuildError> {
        let charts_root_path = self.inputs.charts_root_path;
        let clock = self.inputs.clock.unwrap_or_else(|| Arc::new(SystemClock));
        match (
            self.garden_client,
            self.status_client,
            self.config,
            self.secrets,
            self.garden,
            self.gardener_info,
            self.image_vector,
            self.logger,
            self.seed,
            self.shoot,
        ) {
            (
                Some(garden_client),
                Some(status_client),
                Some(config),
                Some(secrets),
                Some(garden),
                Some(gardener_info),
                Some(image_vector),
                Some(logger),
                Some(seed),
                Some(shoot),
            ) => Ok(Operation {
                charts_root_path: charts_root_path.unwrap_or_else(|| config.charts_path.clone()),
                config,
                garden,
                gardener_info,
                image_vector,
                logger,
                secrets,
                seed,
                shoot: RwLock::new(Arc::new(shoot)),
                garden_client,
                client_map,
                status_client,
                clock,
                seed_client: OnceCell::new(),
                shoot_client: OnceCell::new(),
            }),
            (garden_client, _, config, secrets, garden, gardener_info, image_vector, logger, seed, shoot) => {
                let missing = [
                    ("client", garden_client.is_none()),
                    ("config", config.is_none()),
                    ("secrets", secrets.is_none()),
                    ("garden", garden.is_none()),
                    ("gardener info", gardener_info.is_none()),
                    ("image vector", image_vector.is_none()),
                    ("logger", logger.is_none()),
                    ("seed", seed.is_none()),
                    ("shoot", shoot.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, missing)| missing.then_some(name))
                .collect();
                Err(BuildError::MissingInputs(missing))
            }
        }
    }
}

/// Garden secrets carrying a role label, keyed `<role>-<name>`
pub async fn read_garden_secrets(client: Client, namespace: &str) -> Result<BTreeMap<String, Secret>> {
    let secrets = Api::<Secret>::namespaced(client, namespace)
        .list(&ListParams::default().labels(LABEL_SECRET_ROLE))
        .await
        .map_err(|e| Error::List {
            kind: "Secret",
            namespace: Some(namespace.to_string()),
            message: e.to_string(),
        })?;
    Ok(secrets
        .items
        .into_iter()
        .filter_map(|secret| {
            let role = secret.labels().get(LABEL_SECRET_ROLE)?.clone();
            Some((format!("{}-{}", role, secret.name_any()), secret))
        })
        .collect())
}
