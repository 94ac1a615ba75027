//! # Provider Config Generators
//!
//! Produce the provider-specific configuration blob and secret data handed to
//! infrastructure and control plane extensions. The reconcile flow treats the
//! result as opaque.
//!
//! Generators are looked up by the shoot's `spec.provider.type`. Types without
//! a registered generator fall back to [`GenericProviderConfig`].

mod generic;

pub use generic::GenericProviderConfig;

use crate::crd::{Shoot, WorkerPool};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Inputs a generator may draw on
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub provider_type: String,
    pub region: String,
    pub technical_id: String,
    pub workers: Vec<WorkerPool>,
    /// Data of the provider account secret
    pub credentials: BTreeMap<String, Vec<u8>>,
}

impl ProviderContext {
    pub fn for_shoot(shoot: &Shoot, credentials: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            provider_type: shoot.spec.provider.r#type.clone(),
            region: shoot.spec.region.clone(),
            technical_id: shoot.technical_id(),
            workers: shoot.spec.provider.workers.clone(),
            credentials,
        }
    }
}

/// Opaque configuration plus the secret data that goes with it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    pub config: serde_json::Value,
    pub secret_data: BTreeMap<String, Vec<u8>>,
}

#[async_trait]
pub trait ProviderConfigGenerator: Send + Sync {
    fn provider_type(&self) -> &str;

    async fn generate(&self, context: &ProviderContext) -> Result<ProviderConfig>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    generators: HashMap<String, Arc<dyn ProviderConfigGenerator>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.generators.keys().collect();
        types.sort();
        f.debug_struct("ProviderRegistry").field("types", &types).finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, generator: Arc<dyn ProviderConfigGenerator>) {
        self.generators
            .insert(generator.provider_type().to_string(), generator);
    }

    pub fn get(&self, provider_type: &str) -> Arc<dyn ProviderConfigGenerator> {
        match self.generators.get(provider_type) {
            Some(generator) => Arc::clone(generator),
            None => {
                debug!(provider_type, "No dedicated generator registered, using generic provider config");
                Arc::new(GenericProviderConfig::new(provider_type))
            }
        }
    }

    pub async fn generate(&self, context: &ProviderContext) -> Result<ProviderConfig> {
        if context.provider_type.is_empty() {
            return Err(Error::Provider {
                provider: String::new(),
                message: "shoot does not specify a provider type".to_string(),
            });
        }
        self.get(&context.provider_type).generate(context).await
    }
}
