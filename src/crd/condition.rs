//! # Conditions
//!
//! Health signal types persisted in the Shoot status.
//!
//! Condition types, statuses and error codes are closed enums. Text coming from
//! extension controllers or other external sources is parsed into these types
//! at the boundary (see [`ConditionType::from_str`]) and unknown values are
//! rejected there instead of being carried through the health checks. Unknown
//! error codes are dropped on read so a foreign code never fails a whole object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
    Progressing,
}

impl ConditionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
            ConditionStatus::Progressing => "Progressing",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "True" => Ok(ConditionStatus::True),
            "False" => Ok(ConditionStatus::False),
            "Unknown" => Ok(ConditionStatus::Unknown),
            "Progressing" => Ok(ConditionStatus::Progressing),
            other => Err(UnknownValue::new("condition status", other)),
        }
    }
}

/// Aggregate condition types maintained on a Shoot
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, schemars::JsonSchema,
)]
pub enum ConditionType {
    #[serde(rename = "APIServerAvailable")]
    ApiServerAvailable,
    ControlPlaneHealthy,
    EveryNodeReady,
    SystemComponentsHealthy,
}

impl ConditionType {
    /// All shoot condition types, in the order they appear in the status
    pub const ALL: [ConditionType; 4] = [
        ConditionType::ApiServerAvailable,
        ConditionType::ControlPlaneHealthy,
        ConditionType::EveryNodeReady,
        ConditionType::SystemComponentsHealthy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::ApiServerAvailable => "APIServerAvailable",
            ConditionType::ControlPlaneHealthy => "ControlPlaneHealthy",
            ConditionType::EveryNodeReady => "EveryNodeReady",
            ConditionType::SystemComponentsHealthy => "SystemComponentsHealthy",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConditionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownValue::new("condition type", s))
    }
}

/// Error classification codes attached to conditions and last errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ErrorCode {
    #[serde(rename = "ERR_INFRA_UNAUTHORIZED")]
    InfraUnauthorized,
    #[serde(rename = "ERR_INFRA_INSUFFICIENT_PRIVILEGES")]
    InfraInsufficientPrivileges,
    #[serde(rename = "ERR_INFRA_QUOTA_EXCEEDED")]
    InfraQuotaExceeded,
    #[serde(rename = "ERR_INFRA_DEPENDENCIES")]
    InfraDependencies,
    #[serde(rename = "ERR_INFRA_RESOURCES_DEPLETED")]
    InfraResourcesDepleted,
    #[serde(rename = "ERR_CONFIGURATION_PROBLEM")]
    ConfigurationProblem,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InfraUnauthorized => "ERR_INFRA_UNAUTHORIZED",
            ErrorCode::InfraInsufficientPrivileges => "ERR_INFRA_INSUFFICIENT_PRIVILEGES",
            ErrorCode::InfraQuotaExceeded => "ERR_INFRA_QUOTA_EXCEEDED",
            ErrorCode::InfraDependencies => "ERR_INFRA_DEPENDENCIES",
            ErrorCode::InfraResourcesDepleted => "ERR_INFRA_RESOURCES_DEPLETED",
            ErrorCode::ConfigurationProblem => "ERR_CONFIGURATION_PROBLEM",
        }
    }

    /// User errors require action on the shoot owner's side and are not retried eagerly
    pub fn is_user_error(self) -> bool {
        matches!(
            self,
            ErrorCode::InfraUnauthorized
                | ErrorCode::InfraInsufficientPrivileges
                | ErrorCode::InfraQuotaExceeded
                | ErrorCode::InfraDependencies
                | ErrorCode::ConfigurationProblem
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text that does not name a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// One aggregate health signal
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub last_update_time: DateTime<Utc>,
    #[serde(default)]
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "super::known_error_codes")]
    pub codes: Vec<ErrorCode>,
}

impl Condition {
    /// Zero-value condition of the given type with status `Unknown`
    pub fn new(r#type: ConditionType) -> Self {
        Self {
            r#type,
            status: ConditionStatus::Unknown,
            reason: String::new(),
            message: String::new(),
            last_update_time: DateTime::<Utc>::default(),
            last_transition_time: DateTime::<Utc>::default(),
            codes: Vec::new(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// A condition reported by an extension controller, with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionCondition {
    pub condition: Condition,
    /// Kind of the reporting extension, e.g. `Worker` or `ControlPlane`
    pub extension_type: String,
    pub extension_name: String,
    pub extension_namespace: String,
}

/// Kind of operation recorded in `status.lastOperation`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
}

/// Progress state of the last operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    Error,
    Failed,
    Pending,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    pub r#type: LastOperationType,
    pub state: LastOperationState,
    #[serde(default)]
    pub description: String,
    /// Percentage of completed flow tasks (0-100)
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub last_update_time: DateTime<Utc>,
}

impl LastOperation {
    pub fn new(r#type: LastOperationType, state: LastOperationState, at: DateTime<Utc>) -> Self {
        Self {
            r#type,
            state,
            description: String::new(),
            progress: 0,
            last_update_time: at,
        }
    }
}

/// An error recorded for a single flow task
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "super::known_error_codes")]
    pub codes: Vec<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}
