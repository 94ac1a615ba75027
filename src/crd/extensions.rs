//! # Extension Resources
//!
//! Resources owned by external controllers that the health checks read:
//! `Worker` and the other provider extensions, `Etcd` and `ManagedResource`.
//!
//! Conditions on these resources are kept as loosely typed [`RawCondition`]s
//! because their controllers are free to report types this crate does not
//! know. They are parsed into the closed condition enums with
//! [`RawCondition::parse`] right before they enter a health check.

use crate::crd::condition::{
    Condition, ConditionStatus, ConditionType, ErrorCode, LastError, LastOperation,
    LastOperationState, UnknownValue,
};
use chrono::{DateTime, Utc};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Condition as reported by an external controller
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawCondition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "super::known_error_codes")]
    pub codes: Vec<ErrorCode>,
}

impl RawCondition {
    pub fn new(r#type: &str, status: &str) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: &str, message: &str) -> Self {
        self.reason = reason.to_string();
        self.message = message.to_string();
        self
    }

    /// Parse into a shoot condition, rejecting unknown types and statuses
    pub fn parse(&self) -> Result<Condition, UnknownValue> {
        Ok(Condition {
            r#type: self.r#type.parse::<ConditionType>()?,
            status: self.status.parse::<ConditionStatus>()?,
            reason: self.reason.clone(),
            message: self.message.clone(),
            last_update_time: self.last_update_time.unwrap_or_default(),
            last_transition_time: self.last_transition_time.unwrap_or_default(),
            codes: self.codes.clone(),
        })
    }
}

/// Kinds of extension resources that report health for a shoot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    ControlPlane,
    Extension,
    Infrastructure,
    Network,
    OperatingSystemConfig,
    Worker,
}

impl ExtensionKind {
    pub const ALL: [ExtensionKind; 6] = [
        ExtensionKind::ControlPlane,
        ExtensionKind::Extension,
        ExtensionKind::Infrastructure,
        ExtensionKind::Network,
        ExtensionKind::OperatingSystemConfig,
        ExtensionKind::Worker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExtensionKind::ControlPlane => "ControlPlane",
            ExtensionKind::Extension => "Extension",
            ExtensionKind::Infrastructure => "Infrastructure",
            ExtensionKind::Network => "Network",
            ExtensionKind::OperatingSystemConfig => "OperatingSystemConfig",
            ExtensionKind::Worker => "Worker",
        }
    }

    /// Lower-case plural resource name under `extensions.gardener.cloud`
    pub fn plural(self) -> &'static str {
        match self {
            ExtensionKind::ControlPlane => "controlplanes",
            ExtensionKind::Extension => "extensions",
            ExtensionKind::Infrastructure => "infrastructures",
            ExtensionKind::Network => "networks",
            ExtensionKind::OperatingSystemConfig => "operatingsystemconfigs",
            ExtensionKind::Worker => "workers",
        }
    }
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtensionKind {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExtensionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownValue {
                kind: "extension kind",
                value: s.to_string(),
            })
    }
}

/// Status shared by all extension resources
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    #[serde(default)]
    pub conditions: Vec<RawCondition>,
    #[serde(default)]
    pub last_operation: Option<LastOperation>,
    #[serde(default)]
    pub last_error: Option<LastError>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Worker extension resource driving the shoot's machines
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Worker",
    group = "extensions.gardener.cloud",
    version = "v1alpha1",
    namespaced,
    status = "ExtensionStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    pub r#type: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub pools: Vec<WorkerPoolSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolSpec {
    pub name: String,
    pub minimum: i32,
    pub maximum: i32,
    #[serde(default)]
    pub machine_type: String,
}

impl Worker {
    /// A worker whose last operation is still processing may be mid rolling update
    pub fn is_processing(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.last_operation.as_ref())
            .is_some_and(|op| op.state == LastOperationState::Processing)
    }
}

/// Etcd cluster managed by etcd-druid
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Etcd",
    group = "druid.gardener.cloud",
    version = "v1alpha1",
    namespaced,
    status = "EtcdStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct EtcdSpec {
    #[serde(default = "default_etcd_replicas")]
    pub replicas: i32,
}

fn default_etcd_replicas() -> i32 {
    1
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdStatus {
    #[serde(default)]
    pub ready: Option<bool>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl Etcd {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready)
            .unwrap_or(false)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.last_error.as_deref())
    }
}

/// Bundle of manifests applied by the resource manager
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ManagedResource",
    group = "resources.gardener.cloud",
    version = "v1alpha1",
    namespaced,
    status = "ManagedResourceStatus",
    shortname = "mr"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    /// Names of secrets holding the manifests
    #[serde(default)]
    pub secret_refs: Vec<String>,
    /// Resource class; `seed` resources are applied to the seed instead of the shoot
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub keep_objects: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<RawCondition>,
}

/// Condition types reported on managed resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedResourceConditionType {
    ResourcesApplied,
    ResourcesHealthy,
}

impl ManagedResourceConditionType {
    /// Conditions every healthy managed resource must report as True, in check order
    pub const REQUIRED: [ManagedResourceConditionType; 2] = [
        ManagedResourceConditionType::ResourcesApplied,
        ManagedResourceConditionType::ResourcesHealthy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ManagedResourceConditionType::ResourcesApplied => "ResourcesApplied",
            ManagedResourceConditionType::ResourcesHealthy => "ResourcesHealthy",
        }
    }
}

impl fmt::Display for ManagedResourceConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
