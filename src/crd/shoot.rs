//! # Shoot
//!
//! The user-facing cluster resource. Its spec is the desired state for the
//! reconcile flow, its status carries the externally visible contract:
//! `lastOperation`, `conditions` and `lastErrors`.

use crate::crd::condition::{Condition, LastError, LastOperation};
use crate::crd::Purpose;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Shoot Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: core.gardener.cloud/v1beta1
/// kind: Shoot
/// metadata:
///   name: crazy-botany
///   namespace: garden-dev
/// spec:
///   region: europe-west1
///   secretBindingName: my-provider-account
///   kubernetes:
///     version: "1.30.2"
///   provider:
///     type: gcp
///     workers:
///       - name: cpu-worker
///         minimum: 1
///         maximum: 3
///         machine:
///           type: n1-standard-4
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Shoot",
    group = "core.gardener.cloud",
    version = "v1beta1",
    namespaced,
    status = "ShootStatus",
    shortname = "shoot",
    printcolumn = r#"{"name":"Provider", "type":"string", "jsonPath":".spec.provider.type"}, {"name":"Operation", "type":"string", "jsonPath":".status.lastOperation.state"}, {"name":"Progress", "type":"integer", "jsonPath":".status.lastOperation.progress"}, {"name":"APIServer", "type":"string", "jsonPath":".status.conditions[?(@.type==\"APIServerAvailable\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShootSpec {
    /// Cloud region the shoot's infrastructure lives in
    pub region: String,
    /// Name of the binding that references the provider account secret
    pub secret_binding_name: String,
    pub kubernetes: KubernetesSettings,
    pub provider: ShootProvider,
    #[serde(default, deserialize_with = "super::purpose_or_default")]
    pub purpose: Purpose,
    #[serde(default)]
    pub hibernation: Option<Hibernation>,
    #[serde(default)]
    pub dns: Option<ShootDns>,
    #[serde(default)]
    pub monitoring: Option<Monitoring>,
    /// Name of the seed hosting this shoot's control plane
    #[serde(default)]
    pub seed_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesSettings {
    pub version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootProvider {
    /// Provider extension type, e.g. `aws` or `gcp`
    pub r#type: String,
    #[serde(default)]
    pub workers: Vec<WorkerPool>,
}

/// A group of machines with a desired replica range
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPool {
    pub name: String,
    pub minimum: i32,
    pub maximum: i32,
    #[serde(default)]
    pub machine: Machine,
    #[serde(default)]
    pub zones: Vec<String>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, minimum: i32, maximum: i32) -> Self {
        Self {
            name: name.into(),
            minimum,
            maximum,
            machine: Machine::default(),
            zones: Vec::new(),
        }
    }

    /// Pools with a replica range are scaled by the cluster autoscaler
    pub fn is_autoscaled(&self) -> bool {
        self.minimum != self.maximum
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub image: Option<MachineImage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineImage {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Hibernation {
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootDns {
    /// External domain of the shoot
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Monitoring {
    #[serde(default)]
    pub alerting: Option<Alerting>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Alerting {
    #[serde(default)]
    pub email_receivers: Vec<String>,
}

/// Observed state of a Shoot
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShootStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub last_operation: Option<LastOperation>,
    #[serde(default)]
    pub last_errors: Vec<LastError>,
    /// Name of the shoot's namespace in the seed, e.g. `shoot--dev--crazy-botany`
    #[serde(default)]
    pub technical_id: Option<String>,
    #[serde(default)]
    pub is_hibernated: bool,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl Shoot {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    pub fn is_hibernation_enabled(&self) -> bool {
        self.spec
            .hibernation
            .as_ref()
            .and_then(|h| h.enabled)
            .unwrap_or(false)
    }

    pub fn is_testing(&self) -> bool {
        self.spec.purpose == Purpose::Testing
    }

    /// Alertmanager is only deployed when somebody receives the alerts
    pub fn wants_alertmanager(&self) -> bool {
        self.spec
            .monitoring
            .as_ref()
            .and_then(|m| m.alerting.as_ref())
            .is_some_and(|a| !a.email_receivers.is_empty())
    }

    pub fn dns_domain(&self) -> Option<&str> {
        self.spec.dns.as_ref().and_then(|d| d.domain.as_deref())
    }

    /// Namespace of the shoot's control plane in the seed
    ///
    /// Falls back to `shoot--<project>--<name>` derived from the garden namespace
    /// `garden-<project>` when the status does not carry one yet.
    pub fn technical_id(&self) -> String {
        if let Some(id) = self.status.as_ref().and_then(|s| s.technical_id.clone()) {
            return id;
        }
        let project = self
            .namespace()
            .strip_prefix("garden-")
            .unwrap_or(self.namespace());
        format!("shoot--{}--{}", project, self.name())
    }

    pub fn last_operation(&self) -> Option<&LastOperation> {
        self.status.as_ref().and_then(|s| s.last_operation.as_ref())
    }

    pub fn last_errors(&self) -> &[LastError] {
        self.status
            .as_ref()
            .map(|s| s.last_errors.as_slice())
            .unwrap_or_default()
    }

    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shoot(namespace: &str, name: &str) -> Shoot {
        let mut shoot = Shoot::new(
            name,
            ShootSpec {
                region: "europe-west1".to_string(),
                secret_binding_name: "account".to_string(),
                kubernetes: KubernetesSettings {
                    version: "1.30.2".to_string(),
                },
                provider: ShootProvider {
                    r#type: "gcp".to_string(),
                    workers: vec![WorkerPool::new("cpu-worker", 1, 3)],
                },
                purpose: Purpose::default(),
                hibernation: None,
                dns: None,
                monitoring: None,
                seed_name: None,
            },
        );
        shoot.metadata.namespace = Some(namespace.to_string());
        shoot
    }

    #[test]
    fn test_technical_id_derived_from_project_namespace() {
        let shoot = shoot("garden-dev", "crazy-botany");
        assert_eq!(shoot.technical_id(), "shoot--dev--crazy-botany");
    }

    #[test]
    fn test_technical_id_prefers_status() {
        let mut shoot = shoot("garden-dev", "crazy-botany");
        shoot.status = Some(ShootStatus {
            technical_id: Some("shoot--foo--bar".to_string()),
            ..Default::default()
        });
        assert_eq!(shoot.technical_id(), "shoot--foo--bar");
    }

    #[test]
    fn test_dns_domain() {
        let mut shoot = shoot("garden-dev", "crazy-botany");
        assert_eq!(shoot.dns_domain(), None);
        shoot.spec.dns = Some(ShootDns {
            domain: Some("crazy-botany.dev.example.com".to_string()),
        });
        assert_eq!(shoot.dns_domain(), Some("crazy-botany.dev.example.com"));
    }

    #[test]
    fn test_foreign_purpose_and_codes_still_deserialize() {
        let shoot: Shoot = serde_json::from_value(serde_json::json!({
            "apiVersion": "core.gardener.cloud/v1beta1",
            "kind": "Shoot",
            "metadata": { "name": "crazy-botany", "namespace": "garden-dev" },
            "spec": {
                "region": "europe-west1",
                "secretBindingName": "account",
                "kubernetes": { "version": "1.30.2" },
                "provider": { "type": "gcp", "workers": [] },
                "purpose": "experimental"
            },
            "status": {
                "lastErrors": [{
                    "description": "quota exceeded",
                    "codes": ["ERR_INFRA_QUOTA_EXCEEDED", "ERR_PROBLEMATIC_WEBHOOK"]
                }]
            }
        }))
        .unwrap();
        assert_eq!(shoot.spec.purpose, Purpose::Evaluation);
        let status = shoot.status.unwrap();
        assert_eq!(status.last_errors[0].codes, vec![crate::crd::ErrorCode::InfraQuotaExceeded]);
    }

    #[test]
    fn test_wants_alertmanager_requires_receivers() {
        let mut shoot = shoot("garden-dev", "crazy-botany");
        assert!(!shoot.wants_alertmanager());
        shoot.spec.monitoring = Some(Monitoring {
            alerting: Some(Alerting {
                email_receivers: vec!["ops@example.com".to_string()],
            }),
        });
        assert!(shoot.wants_alertmanager());
    }

    #[test]
    fn test_hibernation_defaults_to_disabled() {
        let mut shoot = shoot("garden-dev", "crazy-botany");
        assert!(!shoot.is_hibernation_enabled());
        shoot.spec.hibernation = Some(Hibernation {
            enabled: Some(true),
        });
        assert!(shoot.is_hibernation_enabled());
    }
}
