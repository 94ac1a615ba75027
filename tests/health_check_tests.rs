//! # Health Checker Tests
//!
//! Subsystem checks of the health checker: control plane requirements,
//! monitoring and logging stacks, nodes, managed resources and extension reports.

use chrono::{DateTime, TimeDelta, Utc};
use gardenlet::constants::*;
use gardenlet::controller::condition::FixedClock;
use gardenlet::controller::health::HealthChecker;
use gardenlet::controller::lister::StaticLister;
use gardenlet::crd::{
    Condition, ConditionStatus, ConditionType, Etcd, EtcdSpec, EtcdStatus, ExtensionCondition, ExtensionStatus,
    KubernetesSettings, LastOperation, LastOperationState, LastOperationType, ManagedResource, ManagedResourceSpec,
    ManagedResourceStatus, Purpose, RawCondition, Shoot, ShootProvider, ShootSpec, Worker, WorkerPool, WorkerSpec,
};
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentCondition, DeploymentStatus, StatefulSet, StatefulSetSpec, StatefulSetStatus,
};
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const NAMESPACE: &str = "shoot--dev--crazy-botany";

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap()
}

fn checker(stale_threshold: Option<TimeDelta>) -> HealthChecker {
    HealthChecker::new(HashMap::new(), stale_threshold, None, Arc::new(FixedClock::new(now())))
}

fn meta(name: &str, role: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: role.map(|role| BTreeMap::from([(LABEL_ROLE.to_string(), role.to_string())])),
        ..Default::default()
    }
}

fn deployment(name: &str, role: &str, available: &str) -> Deployment {
    Deployment {
        metadata: meta(name, Some(role)),
        status: Some(DeploymentStatus {
            conditions: Some(vec![DeploymentCondition {
                type_: "Available".to_string(),
                status: available.to_string(),
                reason: Some("MinimumReplicasUnavailable".to_string()),
                message: Some("Deployment does not have minimum availability.".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn statefulset(name: &str, role: &str, ready: i32) -> StatefulSet {
    StatefulSet {
        metadata: meta(name, Some(role)),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            ..Default::default()
        }),
        status: Some(StatefulSetStatus {
            ready_replicas: Some(ready),
            ..Default::default()
        }),
    }
}

fn etcd(name: &str, ready: bool) -> Etcd {
    let mut etcd = Etcd::new(name, EtcdSpec { replicas: 1 });
    etcd.metadata = meta(name, Some(ROLE_CONTROL_PLANE));
    etcd.status = Some(EtcdStatus {
        ready: Some(ready),
        last_error: (!ready).then(|| "Unauthorized: token expired".to_string()),
        ..Default::default()
    });
    etcd
}

fn worker(processing: bool) -> Worker {
    let mut worker = Worker::new(
        "crazy-botany",
        WorkerSpec {
            r#type: "aws".to_string(),
            region: "eu-west-1".to_string(),
            pools: vec![],
        },
    );
    worker.metadata = meta("crazy-botany", None);
    let state = if processing {
        LastOperationState::Processing
    } else {
        LastOperationState::Succeeded
    };
    worker.status = Some(ExtensionStatus {
        last_operation: Some(LastOperation::new(LastOperationType::Reconcile, state, now())),
        ..Default::default()
    });
    worker
}

fn control_plane_deployments(with_autoscaler: bool) -> Vec<Deployment> {
    let mut names = vec![
        DEPLOYMENT_GARDENER_RESOURCE_MANAGER,
        DEPLOYMENT_KUBE_APISERVER,
        DEPLOYMENT_KUBE_CONTROLLER_MANAGER,
        DEPLOYMENT_KUBE_SCHEDULER,
    ];
    if with_autoscaler {
        names.push(DEPLOYMENT_CLUSTER_AUTOSCALER);
    }
    names
        .into_iter()
        .map(|name| deployment(name, ROLE_CONTROL_PLANE, "True"))
        .collect()
}

fn shoot(pool: WorkerPool) -> Shoot {
    let mut shoot = Shoot::new(
        "crazy-botany",
        ShootSpec {
            region: "eu-west-1".to_string(),
            secret_binding_name: "account".to_string(),
            kubernetes: KubernetesSettings {
                version: "1.30.2".to_string(),
            },
            provider: ShootProvider {
                r#type: "aws".to_string(),
                workers: vec![pool],
            },
            purpose: Purpose::Evaluation,
            hibernation: None,
            dns: None,
            monitoring: None,
            seed_name: None,
        },
    );
    shoot.metadata.namespace = Some("garden-dev".to_string());
    shoot
}

fn condition(r#type: ConditionType) -> Condition {
    Condition::new(r#type)
}

fn healthy_etcds() -> StaticLister<Etcd> {
    StaticLister::new([etcd(ETCD_MAIN, true), etcd(ETCD_EVENTS, true)])
}

#[test]
fn test_autoscaler_required_for_autoscaled_pools() {
    let result = checker(None)
        .check_control_plane(
            &shoot(WorkerPool::new("cpu-worker", 1, 3)),
            NAMESPACE,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::new(control_plane_deployments(false)),
            &healthy_etcds(),
            &StaticLister::new([worker(false)]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.status, ConditionStatus::False);
    assert_eq!(result.reason, "DeploymentMissing");
    assert_eq!(result.message, "Missing required deployments: [cluster-autoscaler]");
}

#[test]
fn test_autoscaler_not_required_while_worker_is_processing() {
    let result = checker(None)
        .check_control_plane(
            &shoot(WorkerPool::new("cpu-worker", 1, 3)),
            NAMESPACE,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::new(control_plane_deployments(false)),
            &healthy_etcds(),
            &StaticLister::new([worker(true)]),
        )
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_autoscaler_not_required_for_fixed_pools() {
    let result = checker(None)
        .check_control_plane(
            &shoot(WorkerPool::new("cpu-worker", 2, 2)),
            NAMESPACE,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::new(control_plane_deployments(false)),
            &healthy_etcds(),
            &StaticLister::<Worker>::default(),
        )
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_healthy_control_plane() {
    let result = checker(None)
        .check_control_plane(
            &shoot(WorkerPool::new("cpu-worker", 1, 3)),
            NAMESPACE,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::new(control_plane_deployments(true)),
            &healthy_etcds(),
            &StaticLister::new([worker(false)]),
        )
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_missing_control_plane_deployment() {
    let deployments: Vec<Deployment> = control_plane_deployments(false)
        .into_iter()
        .filter(|d| d.metadata.name.as_deref() != Some(DEPLOYMENT_KUBE_SCHEDULER))
        .collect();
    let result = checker(None)
        .check_control_plane(
            &shoot(WorkerPool::new("cpu-worker", 2, 2)),
            NAMESPACE,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::new(deployments),
            &healthy_etcds(),
            &StaticLister::<Worker>::default(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.status, ConditionStatus::False);
    assert_eq!(result.reason, "DeploymentMissing");
    assert_eq!(result.message, "Missing required deployments: [kube-scheduler]");
}

#[test]
fn test_unhealthy_deployment_is_reported() {
    let mut deployments = control_plane_deployments(false);
    deployments[1] = deployment(DEPLOYMENT_KUBE_APISERVER, ROLE_CONTROL_PLANE, "False");
    let result = checker(None)
        .check_control_plane(
            &shoot(WorkerPool::new("cpu-worker", 2, 2)),
            NAMESPACE,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::new(deployments),
            &healthy_etcds(),
            &StaticLister::<Worker>::default(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.reason, "DeploymentUnhealthy");
    assert!(result.message.starts_with("Deployment kube-apiserver is unhealthy"));
    assert!(result.message.contains("MinimumReplicasUnavailable"));
}

#[test]
fn test_unready_etcd_carries_error_codes() {
    let result = checker(None)
        .check_control_plane(
            &shoot(WorkerPool::new("cpu-worker", 2, 2)),
            NAMESPACE,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::new(control_plane_deployments(false)),
            &StaticLister::new([etcd(ETCD_MAIN, false), etcd(ETCD_EVENTS, true)]),
            &StaticLister::<Worker>::default(),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.reason, "EtcdUnhealthy");
    assert_eq!(result.codes, vec![gardenlet::crd::ErrorCode::InfraUnauthorized]);
}

#[test]
fn test_monitoring_skipped_for_testing_shoots() {
    let result = checker(None)
        .check_monitoring_control_plane(
            NAMESPACE,
            true,
            true,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::<Deployment>::default(),
            &StaticLister::<StatefulSet>::default(),
        )
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_alertmanager_required_when_wanted() {
    let deployments: Vec<Deployment> = [
        DEPLOYMENT_GRAFANA_OPERATORS,
        DEPLOYMENT_GRAFANA_USERS,
        DEPLOYMENT_KUBE_STATE_METRICS_SEED,
        DEPLOYMENT_KUBE_STATE_METRICS_SHOOT,
    ]
    .into_iter()
    .map(|name| deployment(name, ROLE_MONITORING, "True"))
    .collect();
    let statefulsets = StaticLister::new([statefulset(STATEFULSET_PROMETHEUS, ROLE_MONITORING, 1)]);
    let deployments = StaticLister::new(deployments);
    let checker = checker(None);
    let c = condition(ConditionType::ControlPlaneHealthy);

    let without = checker
        .check_monitoring_control_plane(NAMESPACE, false, false, &c, &deployments, &statefulsets)
        .unwrap();
    assert!(without.is_none());

    let with = checker
        .check_monitoring_control_plane(NAMESPACE, false, true, &c, &deployments, &statefulsets)
        .unwrap()
        .unwrap();
    assert_eq!(with.reason, "StatefulSetMissing");
    assert_eq!(with.message, "Missing required stateful sets: [alertmanager]");
}

#[test]
fn test_logging_requires_ready_loki() {
    let result = checker(None)
        .check_logging_control_plane(
            NAMESPACE,
            false,
            &condition(ConditionType::ControlPlaneHealthy),
            &StaticLister::new([statefulset(STATEFULSET_LOKI, ROLE_LOGGING, 0)]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.reason, "StatefulSetUnhealthy");
    assert!(result.message.contains("(0/1)"));
}

fn node(name: &str, pool: &str, conditions: Vec<(&str, &str, &str)>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(LABEL_WORKER_POOL.to_string(), pool.to_string())])),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(
                conditions
                    .into_iter()
                    .map(|(type_, status, reason)| NodeCondition {
                        type_: type_.to_string(),
                        status: status.to_string(),
                        reason: Some(reason.to_string()),
                        message: Some(format!("{type_} reported by kubelet")),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn ready_node(name: &str, pool: &str) -> Node {
    node(name, pool, vec![("Ready", "True", "KubeletReady")])
}

#[test]
fn test_nodes_healthy() {
    let result = checker(None)
        .check_cluster_nodes(
            &[WorkerPool::new("cpu-worker", 1, 10)],
            &condition(ConditionType::EveryNodeReady),
            &StaticLister::new([ready_node("node-1", "cpu-worker")]),
        )
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_node_not_ready() {
    let result = checker(None)
        .check_cluster_nodes(
            &[WorkerPool::new("cpu-worker", 1, 10)],
            &condition(ConditionType::EveryNodeReady),
            &StaticLister::new([node("node-1", "cpu-worker", vec![("Ready", "False", "KubeletNotReady")])]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.status, ConditionStatus::False);
    assert_eq!(result.reason, "NodeUnhealthy");
    assert!(result.message.starts_with("Node 'node-1' in worker group 'cpu-worker' is unhealthy"));
}

#[test]
fn test_pool_without_nodes() {
    let result = checker(None)
        .check_cluster_nodes(
            &[WorkerPool::new("cpu-worker", 1, 10), WorkerPool::new("gpu-worker", 1, 10)],
            &condition(ConditionType::EveryNodeReady),
            &StaticLister::new([ready_node("node-1", "cpu-worker")]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.status, ConditionStatus::False);
    assert_eq!(result.reason, "MissingNodes");
    assert_eq!(
        result.message,
        "Not enough worker nodes registered in worker pool 'gpu-worker' to meet minimum desired machine count. (0/1)."
    );
}

#[test]
fn test_node_disk_pressure_is_a_configuration_problem() {
    let result = checker(None)
        .check_cluster_nodes(
            &[WorkerPool::new("cpu-worker", 1, 10)],
            &condition(ConditionType::EveryNodeReady),
            &StaticLister::new([node(
                "node-1",
                "cpu-worker",
                vec![
                    ("Ready", "True", "KubeletReady"),
                    ("DiskPressure", "True", "KubeletHasDiskPressure"),
                ],
            )]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(result.status, ConditionStatus::False);
    assert_eq!(result.codes, vec![gardenlet::crd::ErrorCode::ConfigurationProblem]);
}

fn managed_resource(generation: i64, observed: i64, conditions: Vec<RawCondition>) -> ManagedResource {
    let mut mr = ManagedResource::new(
        MANAGED_RESOURCE_SHOOT_CORE,
        ManagedResourceSpec {
            secret_refs: vec![],
            class: None,
            keep_objects: None,
        },
    );
    mr.metadata = meta(MANAGED_RESOURCE_SHOOT_CORE, None);
    mr.metadata.generation = Some(generation);
    mr.status = Some(ManagedResourceStatus {
        observed_generation: observed,
        conditions,
    });
    mr
}

#[test]
fn test_managed_resource_outdated_generation() {
    let result = checker(None)
        .check_managed_resource(
            &condition(ConditionType::SystemComponentsHealthy),
            &managed_resource(3, 2, vec![]),
        )
        .unwrap();
    assert_eq!(result.reason, "Outdated");
    assert!(result.message.contains("(2/3)"));
}

#[test]
fn test_managed_resource_failing_condition_is_propagated() {
    let failing = RawCondition::new("ResourcesHealthy", "False").with_reason("PodsCrashing", "coredns is crashlooping");
    let result = checker(None)
        .check_managed_resource(
            &condition(ConditionType::SystemComponentsHealthy),
            &managed_resource(1, 1, vec![RawCondition::new("ResourcesApplied", "True"), failing]),
        )
        .unwrap();
    assert_eq!(result.reason, "PodsCrashing");
    assert_eq!(result.message, "coredns is crashlooping");
}

#[test]
fn test_managed_resource_missing_conditions() {
    let result = checker(None)
        .check_managed_resource(
            &condition(ConditionType::SystemComponentsHealthy),
            &managed_resource(1, 1, vec![]),
        )
        .unwrap();
    assert_eq!(result.reason, "MissingCondition");
    assert_eq!(
        result.message,
        "ManagedResource shoot-core is missing the following condition(s), [ResourcesApplied ResourcesHealthy]"
    );
}

fn report(status: ConditionStatus, updated: DateTime<Utc>) -> ExtensionCondition {
    ExtensionCondition {
        condition: Condition {
            status,
            reason: "Rolling".to_string(),
            message: "2/3 machines updated".to_string(),
            last_update_time: updated,
            ..Condition::new(ConditionType::EveryNodeReady)
        },
        extension_type: "Worker".to_string(),
        extension_name: "crazy-botany".to_string(),
        extension_namespace: NAMESPACE.to_string(),
    }
}

#[test]
fn test_stale_extension_report_is_unknown() {
    let result = checker(Some(TimeDelta::minutes(5)))
        .check_extension_condition(
            &condition(ConditionType::EveryNodeReady),
            &[report(ConditionStatus::True, now() - TimeDelta::minutes(10))],
        )
        .unwrap();
    assert_eq!(result.status, ConditionStatus::Unknown);
    assert_eq!(result.reason, "WorkerOutdatedHealthCheckReport");
    assert!(result.message.contains("600s ago"));
}

#[test]
fn test_progressing_extension_report_is_forwarded() {
    let result = checker(Some(TimeDelta::minutes(5)))
        .check_extension_condition(
            &condition(ConditionType::EveryNodeReady),
            &[report(ConditionStatus::Progressing, now())],
        )
        .unwrap();
    assert_eq!(result.status, ConditionStatus::Progressing);
    assert_eq!(result.reason, "WorkerRolling");
    assert_eq!(result.message, "2/3 machines updated");
}

#[test]
fn test_reports_of_other_types_are_ignored() {
    let result = checker(None).check_extension_condition(
        &condition(ConditionType::ControlPlaneHealthy),
        &[report(ConditionStatus::False, now())],
    );
    assert!(result.is_none());
}

fn node_checker_with_threshold() -> HealthChecker {
    HealthChecker::new(
        HashMap::from([(ConditionType::EveryNodeReady, TimeDelta::minutes(5))]),
        Some(TimeDelta::minutes(5)),
        None,
        Arc::new(FixedClock::new(now())),
    )
}

#[test]
fn test_failing_extension_report_within_threshold_is_progressing() {
    let previous = Condition {
        status: ConditionStatus::True,
        last_transition_time: now() - TimeDelta::hours(1),
        ..condition(ConditionType::EveryNodeReady)
    };
    for status in [ConditionStatus::False, ConditionStatus::Unknown] {
        let result = node_checker_with_threshold()
            .check_extension_condition(&previous, &[report(status, now())])
            .unwrap();
        assert_eq!(result.status, ConditionStatus::Progressing);
        assert_eq!(result.reason, "WorkerUnhealthyReport");
        assert_eq!(
            result.message,
            "Worker extension (shoot--dev--crazy-botany/crazy-botany) reports failing health check: 2/3 machines updated"
        );
    }
}

#[test]
fn test_failing_extension_report_past_threshold_is_false() {
    let previous = Condition {
        status: ConditionStatus::Progressing,
        last_transition_time: now() - TimeDelta::minutes(10),
        ..condition(ConditionType::EveryNodeReady)
    };
    let result = node_checker_with_threshold()
        .check_extension_condition(&previous, &[report(ConditionStatus::False, now())])
        .unwrap();
    assert_eq!(result.status, ConditionStatus::False);
    assert_eq!(result.reason, "WorkerUnhealthyReport");
}
