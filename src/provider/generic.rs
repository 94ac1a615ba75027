//! Provider config for types without a dedicated generator.

use super::{ProviderConfig, ProviderConfigGenerator, ProviderContext};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct GenericProviderConfig {
    provider_type: String,
}

impl GenericProviderConfig {
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
        }
    }
}

#[async_trait]
impl ProviderConfigGenerator for GenericProviderConfig {
    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    async fn generate(&self, context: &ProviderContext) -> Result<ProviderConfig> {
        if context.region.is_empty() {
            return Err(Error::Provider {
                provider: self.provider_type.clone(),
                message: "region must not be empty".to_string(),
            });
        }
        let zones: Vec<&str> = {
            let mut zones: Vec<&str> = context
                .workers
                .iter()
                .flat_map(|w| w.zones.iter().map(String::as_str))
                .collect();
            zones.sort_unstable();
            zones.dedup();
            zones
        };
        Ok(ProviderConfig {
            config: json!({
                "apiVersion": format!("{}.provider.extensions.gardener.cloud/v1alpha1", self.provider_type),
                "kind": "InfrastructureConfig",
                "region": context.region,
                "zones": zones,
                "resourcePrefix": context.technical_id,
            }),
            secret_data: context.credentials.clone(),
        })
    }
}
