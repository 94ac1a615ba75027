//! Client construction for the garden, seed and shoot clusters.

use crate::constants::{DATA_KEY_KUBECONFIG, SECRET_SHOOT_KUBECONFIG};
use crate::crd::{Seed, Shoot};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

#[async_trait]
pub trait ClientMap: Send + Sync {
    async fn garden_client(&self) -> Result<Client>;

    async fn seed_client(&self, seed: &Seed) -> Result<Client>;

    async fn shoot_client(&self, seed: &Seed, shoot: &Shoot) -> Result<Client>;
}

/// Builds clients from kubeconfig secrets
///
/// Seeds without a secret reference are the cluster the gardenlet runs in.
/// Shoot kubeconfigs are read from the `gardener` secret in the shoot's seed
/// namespace.
#[derive(Clone)]
pub struct KubeClientMap {
    garden: Client,
}

impl KubeClientMap {
    pub fn new(garden: Client) -> Self {
        Self { garden }
    }
}

async fn client_from_secret(client: Client, namespace: &str, name: &str, cluster: &'static str) -> Result<Client> {
    let secret = Api::<Secret>::namespaced(client, namespace)
        .get(name)
        .await
        .map_err(|e| Error::kube("Secret", namespace, name, e))?;
    let kubeconfig = secret
        .data
        .as_ref()
        .and_then(|data| data.get(DATA_KEY_KUBECONFIG))
        .ok_or_else(|| Error::Client {
            cluster,
            message: format!("secret {namespace}/{name} has no {DATA_KEY_KUBECONFIG} key"),
        })?;
    let yaml = std::str::from_utf8(&kubeconfig.0).map_err(|e| Error::Client {
        cluster,
        message: format!("kubeconfig in secret {namespace}/{name} is not UTF-8: {e}"),
    })?;
    let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| Error::Client {
        cluster,
        message: e.to_string(),
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::Client {
            cluster,
            message: e.to_string(),
        })?;
    Client::try_from(config).map_err(|e| Error::Client {
        cluster,
        message: e.to_string(),
    })
}

#[async_trait]
impl ClientMap for KubeClientMap {
    async fn garden_client(&self) -> Result<Client> {
        Ok(self.garden.clone())
    }

    async fn seed_client(&self, seed: &Seed) -> Result<Client> {
        match &seed.spec.secret_ref {
            Some(secret_ref) => {
                client_from_secret(self.garden.clone(), &secret_ref.namespace, &secret_ref.name, "seed").await
            }
            None => Ok(self.garden.clone()),
        }
    }

    async fn shoot_client(&self, seed: &Seed, shoot: &Shoot) -> Result<Client> {
        let seed_client = self.seed_client(seed).await?;
        client_from_secret(seed_client, &shoot.technical_id(), SECRET_SHOOT_KUBECONFIG, "shoot").await
    }
}
