//! # Seed
//!
//! A cluster hosting shoot control planes.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Seed",
    group = "core.gardener.cloud",
    version = "v1beta1",
    status = "SeedStatus",
    printcolumn = r#"{"name":"Provider", "type":"string", "jsonPath":".spec.provider.type"}, {"name":"Region", "type":"string", "jsonPath":".spec.provider.region"}, {"name":"Version", "type":"string", "jsonPath":".status.kubernetesVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SeedSpec {
    pub provider: SeedProvider,
    pub dns: SeedDns,
    /// Reference to the kubeconfig secret in the garden cluster
    #[serde(default)]
    pub secret_ref: Option<SecretReference>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedProvider {
    pub r#type: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedDns {
    /// Wildcard domain under which shoot control plane ingresses are exposed
    pub ingress_domain: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedStatus {
    #[serde(default)]
    pub kubernetes_version: Option<String>,
}

impl Seed {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn ingress_domain(&self) -> &str {
        &self.spec.dns.ingress_domain
    }

    pub fn kubernetes_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.kubernetes_version.as_deref())
    }
}
