//! # Resource Health
//!
//! Health predicates for single objects. Each returns the reason the object is
//! unhealthy; the subsystem checks turn that into a condition.

use crate::crd::Etcd;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unhealthy {
    #[error("observed generation outdated ({observed}/{desired})")]
    OutdatedGeneration { observed: i64, desired: i64 },

    #[error("condition {0:?} is missing")]
    ConditionMissing(String),

    #[error("condition {condition_type:?} has invalid status {actual} (expected {expected}) due to {reason}: {message}")]
    InvalidConditionStatus {
        condition_type: String,
        actual: String,
        expected: &'static str,
        reason: String,
        message: String,
    },

    #[error("not enough ready replicas ({ready}/{desired})")]
    NotEnoughReadyReplicas { ready: i32, desired: i32 },

    #[error("etcd {0} is not ready yet")]
    EtcdNotReady(String),
}

const DEPLOYMENT_REQUIRED_TRUE: &[&str] = &["Available"];
const DEPLOYMENT_OPTIONAL_TRUE: &[&str] = &["Progressing"];
const DEPLOYMENT_OPTIONAL_FALSE: &[&str] = &["ReplicaFailure"];

const NODE_REQUIRED_TRUE: &[&str] = &["Ready"];
const NODE_OPTIONAL_FALSE: &[&str] = &[
    "DiskPressure",
    "MemoryPressure",
    "PIDPressure",
    "NetworkUnavailable",
];

/// Minimal view over the different Kubernetes condition structs
struct ConditionView<'a> {
    status: &'a str,
    reason: &'a str,
    message: &'a str,
}

fn check_generation(generation: Option<i64>, observed: Option<i64>) -> Result<(), Unhealthy> {
    let desired = generation.unwrap_or_default();
    let observed = observed.unwrap_or_default();
    if observed < desired {
        return Err(Unhealthy::OutdatedGeneration { observed, desired });
    }
    Ok(())
}

fn check_condition_state(
    condition_type: &str,
    expected: &'static str,
    condition: &ConditionView<'_>,
) -> Result<(), Unhealthy> {
    if condition.status == expected {
        return Ok(());
    }
    Err(Unhealthy::InvalidConditionStatus {
        condition_type: condition_type.to_string(),
        actual: condition.status.to_string(),
        expected,
        reason: condition.reason.to_string(),
        message: condition.message.to_string(),
    })
}

/// Required conditions must exist with the expected status; optional ones only if present
fn check_conditions<'a>(
    find: impl Fn(&str) -> Option<ConditionView<'a>>,
    required_true: &[&str],
    optional_true: &[&str],
    optional_false: &[&str],
) -> Result<(), Unhealthy> {
    for condition_type in required_true {
        let condition =
            find(condition_type).ok_or_else(|| Unhealthy::ConditionMissing(condition_type.to_string()))?;
        check_condition_state(condition_type, "True", &condition)?;
    }
    for condition_type in optional_true {
        if let Some(condition) = find(condition_type) {
            check_condition_state(condition_type, "True", &condition)?;
        }
    }
    for condition_type in optional_false {
        if let Some(condition) = find(condition_type) {
            check_condition_state(condition_type, "False", &condition)?;
        }
    }
    Ok(())
}

pub fn check_deployment(deployment: &Deployment) -> Result<(), Unhealthy> {
    let status = deployment.status.as_ref();
    check_generation(
        deployment.metadata.generation,
        status.and_then(|s| s.observed_generation),
    )?;
    let conditions = status
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    check_conditions(
        |t| {
            conditions.iter().find(|c| c.type_ == t).map(|c| ConditionView {
                status: &c.status,
                reason: c.reason.as_deref().unwrap_or_default(),
                message: c.message.as_deref().unwrap_or_default(),
            })
        },
        DEPLOYMENT_REQUIRED_TRUE,
        DEPLOYMENT_OPTIONAL_TRUE,
        DEPLOYMENT_OPTIONAL_FALSE,
    )
}

pub fn check_statefulset(statefulset: &StatefulSet) -> Result<(), Unhealthy> {
    let status = statefulset.status.as_ref();
    check_generation(
        statefulset.metadata.generation,
        status.and_then(|s| s.observed_generation),
    )?;
    let desired = statefulset
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or_default();
    if desired > ready {
        return Err(Unhealthy::NotEnoughReadyReplicas { ready, desired });
    }
    Ok(())
}

pub fn check_node(node: &Node) -> Result<(), Unhealthy> {
    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();
    check_conditions(
        |t| {
            conditions.iter().find(|c| c.type_ == t).map(|c| ConditionView {
                status: &c.status,
                reason: c.reason.as_deref().unwrap_or_default(),
                message: c.message.as_deref().unwrap_or_default(),
            })
        },
        NODE_REQUIRED_TRUE,
        &[],
        NODE_OPTIONAL_FALSE,
    )
}

pub fn check_etcd(etcd: &Etcd) -> Result<(), Unhealthy> {
    if !etcd.is_ready() {
        return Err(Unhealthy::EtcdNotReady(etcd.name_any()));
    }
    Ok(())
}
