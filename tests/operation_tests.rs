//! # Operation Tests
//!
//! Operation assembly and shoot status persistence against an offline garden
//! client and an in-memory shoot status store.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use gardenlet::config::ControllerConfig;
use gardenlet::constants::{ANNOTATION_DNS_DOMAIN, ANNOTATION_DNS_PROVIDER};
use gardenlet::controller::condition::FixedClock;
use gardenlet::controller::flow::{Stats, TaskFailure, TaskId};
use gardenlet::controller::operation::{
    BuildError, BuildStage, ClientMap, Domain, Garden, GardenerInfo, ImageSource, ImageVector, Operation,
    OperationBuilder, ShootStatusClient,
};
use gardenlet::crd::{
    Condition, ConditionStatus, ConditionType, ErrorCode, Hibernation, KubernetesSettings, LastOperation, LastOperationState, LastOperationType, Purpose, Seed, SeedDns,
    SeedProvider, SeedSpec, SeedStatus, Shoot, ShootProvider, ShootSpec, ShootStatus, WorkerPool,
};
use gardenlet::error::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::Span;

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap()
}

/// Client whose API server answers every request with 404
fn offline_client() -> Client {
    let service = tower::service_fn(|_request: http::Request<kube::client::Body>| async {
        let body = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "not found",
            "reason": "NotFound",
            "code": 404
        })
        .to_string();
        http::Response::builder()
            .status(404)
            .header("content-type", "application/json")
            .body(body)
    });
    Client::new(service, "default")
}

fn conflict(namespace: &str, name: &str) -> Error {
    let response = serde_json::from_value(json!({
        "status": "Failure",
        "message": "the object has been modified",
        "reason": "Conflict",
        "code": 409
    }))
    .unwrap();
    Error::kube("Shoot", namespace, name, kube::Error::Api(response))
}

struct OfflineClientMap {
    garden: Client,
}

#[async_trait]
impl ClientMap for OfflineClientMap {
    async fn garden_client(&self) -> Result<Client> {
        Ok(self.garden.clone())
    }

    async fn seed_client(&self, _seed: &Seed) -> Result<Client> {
        Err(Error::Client {
            cluster: "seed",
            message: "no seed kubeconfig".to_string(),
        })
    }

    async fn shoot_client(&self, _seed: &Seed, _shoot: &Shoot) -> Result<Client> {
        Err(Error::Client {
            cluster: "shoot",
            message: "no shoot kubeconfig".to_string(),
        })
    }
}

/// Seed client whose API server serves a `kube-apiserver` deployment with `replicas`
fn seed_client_with_api_server(replicas: i32) -> Client {
    let service = tower::service_fn(move |_request: http::Request<kube::client::Body>| async move {
        let body = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "kube-apiserver", "namespace": "shoot--dev--crazy-botany" },
            "spec": {
                "replicas": replicas,
                "selector": { "matchLabels": { "app": "kubernetes" } },
                "template": {}
            }
        })
        .to_string();
        http::Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(body)
    });
    Client::new(service, "default")
}

/// Client map counting how often seed and shoot clients are created
struct CountingClientMap {
    api_server_replicas: i32,
    seed_clients: AtomicU32,
    shoot_clients: AtomicU32,
}

impl CountingClientMap {
    fn new(api_server_replicas: i32) -> Self {
        Self {
            api_server_replicas,
            seed_clients: AtomicU32::new(0),
            shoot_clients: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ClientMap for CountingClientMap {
    async fn garden_client(&self) -> Result<Client> {
        Ok(offline_client())
    }

    async fn seed_client(&self, _seed: &Seed) -> Result<Client> {
        self.seed_clients.fetch_add(1, Ordering::SeqCst);
        Ok(seed_client_with_api_server(self.api_server_replicas))
    }

    async fn shoot_client(&self, _seed: &Seed, _shoot: &Shoot) -> Result<Client> {
        self.shoot_clients.fetch_add(1, Ordering::SeqCst);
        Ok(offline_client())
    }
}

/// Shoot store failing the first `conflicts` writes
struct FakeStatusClient {
    shoot: Mutex<Shoot>,
    conflicts: AtomicU32,
    writes: AtomicU32,
}

impl FakeStatusClient {
    fn new(shoot: Shoot) -> Self {
        Self {
            shoot: Mutex::new(shoot),
            conflicts: AtomicU32::new(0),
            writes: AtomicU32::new(0),
        }
    }

    fn stored(&self) -> Shoot {
        self.shoot.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShootStatusClient for FakeStatusClient {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<Shoot> {
        Ok(self.stored())
    }

    async fn update_status(&self, shoot: &Shoot) -> Result<Shoot> {
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(conflict(shoot.namespace(), shoot.name()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.shoot.lock().unwrap();
        *stored = shoot.clone();
        Ok(stored.clone())
    }
}

fn shoot() -> Shoot {
    let mut shoot = Shoot::new(
        "crazy-botany",
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
            purpose: Purpose::Evaluation,
            hibernation: None,
            dns: None,
            monitoring: None,
            seed_name: Some("aws-eu1".to_string()),
        },
    );
    shoot.metadata.namespace = Some("garden-dev".to_string());
    shoot
}

fn seed() -> Seed {
    let mut seed = Seed::new(
        "aws-eu1",
        SeedSpec {
            provider: SeedProvider {
                r#type: "aws".to_string(),
                region: "eu-west-1".to_string(),
            },
            dns: SeedDns {
                ingress_domain: "ingress.aws-eu1.example.com".to_string(),
            },
            secret_ref: None,
        },
    );
    seed.status = Some(SeedStatus {
        kubernetes_version: Some("1.30.0".to_string()),
    });
    seed
}

fn domain_secret(domain: &str, provider: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            annotations: Some(BTreeMap::from([
                (ANNOTATION_DNS_DOMAIN.to_string(), domain.to_string()),
                (ANNOTATION_DNS_PROVIDER.to_string(), provider.to_string()),
            ])),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn secrets() -> BTreeMap<String, Secret> {
    BTreeMap::from([(
        "internal-domain-internal".to_string(),
        domain_secret("internal.example.com", "aws-route53"),
    )])
}

fn builder(status_client: Arc<FakeStatusClient>) -> OperationBuilder {
    OperationBuilder::new()
        .with_config(ControllerConfig::default())
        .with_garden_from_secrets("dev")
        .with_gardener_info(GardenerInfo {
            id: "gardenlet-0".to_string(),
            name: "gardenlet".to_string(),
            version: "0.1.0".to_string(),
        })
        .with_image_vector(ImageVector::default())
        .with_logger(Span::none())
        .with_secrets(secrets())
        .with_seed(seed())
        .with_shoot(status_client.stored())
        .with_status_client(status_client)
        .with_clock(Arc::new(FixedClock::new(now())))
}

fn client_map() -> Arc<dyn ClientMap> {
    Arc::new(OfflineClientMap {
        garden: offline_client(),
    })
}

async fn operation(shoot: Shoot) -> (Operation, Arc<FakeStatusClient>) {
    let status_client = Arc::new(FakeStatusClient::new(shoot));
    let op = builder(Arc::clone(&status_client)).build(client_map()).await.unwrap();
    (op, status_client)
}

fn processing_shoot(at: DateTime<Utc>) -> Shoot {
    let mut shoot = shoot();
    shoot.status = Some(ShootStatus {
        last_operation: Some(LastOperation::new(
            LastOperationType::Reconcile,
            LastOperationState::Processing,
            at,
        )),
        ..Default::default()
    });
    shoot
}

fn stats(all: &[&str], running: &[&str], succeeded: &[&str]) -> Stats {
    let mut stats = Stats::new("Shoot cluster reconciliation", all.iter().map(|n| TaskId::new(*n)));
    for name in running.iter().chain(succeeded) {
        stats.pending.remove(&TaskId::new(*name));
    }
    stats.running = running.iter().map(|n| TaskId::new(*n)).collect();
    stats.succeeded = succeeded.iter().map(|n| TaskId::new(*n)).collect();
    stats
}

#[tokio::test]
async fn test_build_reports_all_missing_inputs() {
    let err = OperationBuilder::new()
        .with_shoot(shoot())
        .build(client_map())
        .await
        .unwrap_err();
    match err {
        BuildError::MissingInputs(missing) => assert_eq!(
            missing,
            vec!["config", "garden", "gardener info", "image vector", "logger", "secrets", "seed"]
        ),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_build_assembles_garden_from_secrets() {
    let (op, _) = operation(shoot()).await;

    assert_eq!(op.garden().project, "dev");
    assert_eq!(
        op.garden().internal_domain,
        Some(Domain {
            domain: "internal.example.com".to_string(),
            provider: "aws-route53".to_string(),
        })
    );
    assert_eq!(op.seed_namespace(), "shoot--dev--crazy-botany");
    assert_eq!(op.charts_root_path(), ControllerConfig::default().charts_path.as_path());
}

#[tokio::test]
async fn test_build_fails_at_seed_stage_when_seed_is_unreadable() {
    let status_client = Arc::new(FakeStatusClient::new(shoot()));
    let err = builder(status_client)
        .with_seed_from("does-not-exist")
        .build(client_map())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Stage { stage: BuildStage::Seed, .. }));
    assert!(err.to_string().contains("stage seed"));
}

#[tokio::test]
async fn test_build_fails_at_garden_stage_on_incomplete_domain_secret() {
    let status_client = Arc::new(FakeStatusClient::new(shoot()));
    let mut incomplete = domain_secret("internal.example.com", "aws-route53");
    if let Some(annotations) = incomplete.metadata.annotations.as_mut() {
        annotations.remove(ANNOTATION_DNS_PROVIDER);
    }
    let err = builder(status_client)
        .with_secrets(BTreeMap::from([("internal-domain-internal".to_string(), incomplete)]))
        .build(client_map())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Stage { stage: BuildStage::Garden, .. }));
}

#[tokio::test]
async fn test_ingress_hosts_use_short_id() {
    let (op, _) = operation(shoot()).await;
    assert_eq!(
        op.compute_prometheus_host(),
        "p-dev--crazy-botany.ingress.aws-eu1.example.com"
    );
    assert_eq!(
        op.compute_alertmanager_host(),
        "au-dev--crazy-botany.ingress.aws-eu1.example.com"
    );
    assert_eq!(
        op.compute_ingress_host_deprecated("p"),
        "p.crazy-botany.dev.ingress.aws-eu1.example.com"
    );
}

#[tokio::test]
async fn test_seed_client_error_is_surfaced() {
    let (op, _) = operation(shoot()).await;
    let err = op.initialize_seed_clients().await.err().expect("expected error");
    assert!(err.to_string().contains("no seed kubeconfig"));
}

#[tokio::test]
async fn test_progress_requires_last_operation() {
    let (op, store) = operation(shoot()).await;
    let err = op.report_shoot_progress(&stats(&["a"], &["a"], &[])).await.unwrap_err();
    assert!(matches!(err, Error::LastOperationUnset { .. }));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_progress_is_persisted_and_refreshed() {
    let (op, store) = operation(processing_shoot(now() - TimeDelta::minutes(1))).await;

    op.report_shoot_progress(&stats(&["a", "b", "c", "d"], &["c", "b"], &["a"]))
        .await
        .unwrap();

    let last_operation = store.stored().last_operation().cloned().unwrap();
    assert_eq!(last_operation.description, "b, c");
    assert_eq!(last_operation.progress, 25);
    assert_eq!(last_operation.last_update_time, now());
    assert_eq!(op.shoot().last_operation(), Some(&last_operation));
}

#[tokio::test]
async fn test_progress_rejects_mid_air_update() {
    let (op, store) = operation(processing_shoot(now() + TimeDelta::seconds(30))).await;
    let err = op.report_shoot_progress(&stats(&["a"], &["a"], &[])).await.unwrap_err();
    assert!(matches!(err, Error::MidAirUpdate { .. }));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_status_conflicts_are_retried() {
    let (op, store) = operation(processing_shoot(now() - TimeDelta::minutes(1))).await;
    store.conflicts.store(2, Ordering::SeqCst);

    op.report_shoot_progress(&stats(&["a"], &[], &["a"])).await.unwrap();

    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.stored().last_operation().map(|op| op.description.clone()),
        Some("Execution finished".to_string())
    );
}

#[tokio::test]
async fn test_status_conflicts_give_up_after_attempts() {
    let (op, store) = operation(processing_shoot(now() - TimeDelta::minutes(1))).await;
    store.conflicts.store(100, Ordering::SeqCst);

    let err = op.report_shoot_progress(&stats(&["a"], &["a"], &[])).await.unwrap_err();
    assert!(matches!(err, Error::Conflict { attempts: 5, .. }));
}

#[tokio::test]
async fn test_task_errors_are_recorded_and_cleaned() {
    let (op, store) = operation(processing_shoot(now())).await;

    op.record_task_errors(&[TaskFailure {
        task: TaskId::new("Deploying infrastructure"),
        message: "Quota exceeded for resource CPUS".to_string(),
    }])
    .await
    .unwrap();

    let errors = store.stored().last_errors().to_vec();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].task_id.as_deref(), Some("Deploying infrastructure"));
    assert_eq!(errors[0].codes, vec![ErrorCode::InfraQuotaExceeded]);

    op.clean_shoot_task_error("Deploying infrastructure").await.unwrap();
    assert!(store.stored().last_errors().is_empty());
}

#[tokio::test]
async fn test_last_operation_lifecycle() {
    let (op, store) = operation(shoot()).await;

    op.start_last_operation().await.unwrap();
    let started = store.stored().last_operation().cloned().unwrap();
    assert_eq!(started.r#type, LastOperationType::Create);
    assert_eq!(started.state, LastOperationState::Processing);

    op.record_task_errors(&[TaskFailure {
        task: TaskId::new("a"),
        message: "boom".to_string(),
    }])
    .await
    .unwrap();
    op.finish_last_operation(LastOperationState::Succeeded, "done")
        .await
        .unwrap();
    let finished = store.stored();
    let last_operation = finished.last_operation().unwrap();
    assert_eq!(last_operation.state, LastOperationState::Succeeded);
    assert_eq!(last_operation.progress, 100);
    assert!(finished.last_errors().is_empty());

    op.start_last_operation().await.unwrap();
    assert_eq!(
        store.stored().last_operation().map(|op| op.r#type),
        Some(LastOperationType::Reconcile)
    );
}

#[tokio::test]
async fn test_build_fails_at_shoot_stage_when_shoot_is_unreadable() {
    let status_client = Arc::new(FakeStatusClient::new(shoot()));
    let err = builder(status_client)
        .with_shoot_from("garden-dev", "crazy-botany")
        .build(client_map())
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::Stage { stage: BuildStage::Shoot, .. }));
}

#[tokio::test]
async fn test_explicit_garden_skips_secret_parsing() {
    let status_client = Arc::new(FakeStatusClient::new(shoot()));
    let garden = Garden {
        project: "dev".to_string(),
        ..Default::default()
    };
    let op = builder(status_client)
        .with_garden(garden.clone())
        .with_secrets(BTreeMap::new())
        .with_charts_root_path("/charts")
        .build(client_map())
        .await
        .unwrap();
    assert_eq!(op.garden(), &garden);
    assert_eq!(op.charts_root_path(), std::path::Path::new("/charts"));
}

#[tokio::test]
async fn test_monitoring_hosts_include_deprecated_forms() {
    let (op, _) = operation(shoot()).await;
    assert_eq!(
        op.compute_grafana_hosts(),
        vec![
            "g-operators.crazy-botany.dev.ingress.aws-eu1.example.com",
            "g-users.crazy-botany.dev.ingress.aws-eu1.example.com",
            "g-operators-dev--crazy-botany.ingress.aws-eu1.example.com",
            "g-users-dev--crazy-botany.ingress.aws-eu1.example.com",
        ]
    );
    assert_eq!(op.compute_prometheus_hosts().len(), 2);
    assert_eq!(
        op.compute_alertmanager_hosts().last().map(String::as_str),
        Some("au-dev--crazy-botany.ingress.aws-eu1.example.com")
    );
}

#[tokio::test]
async fn test_secret_keys_of_role() {
    let (op, _) = operation(shoot()).await;
    assert_eq!(op.secret_keys_of_role("internal-domain"), vec!["internal-domain-internal".to_string()]);
    assert!(op.secret_keys_of_role("default-domain").is_empty());
}

#[tokio::test]
async fn test_images_follow_runtime_and_target_versions() {
    let status_client = Arc::new(FakeStatusClient::new(shoot()));
    let vector = ImageVector::new(vec![ImageSource {
        name: "hyperkube".to_string(),
        repository: "registry.k8s.io/hyperkube".to_string(),
        tag: None,
        runtime_version: None,
        target_version: Some(">= 1.28".to_string()),
    }]);
    let op = builder(status_client)
        .with_image_vector(vector)
        .build(client_map())
        .await
        .unwrap();

    assert_eq!(op.seed_version(), Some("1.30.0"));
    assert_eq!(op.shoot_version(), "1.30.2");
    let seed_images = op.inject_seed_seed_images(Map::new(), &["hyperkube"]).unwrap();
    assert_eq!(seed_images["images"]["hyperkube"], "registry.k8s.io/hyperkube:v1.30.0");
    let shoot_images = op.inject_shoot_shoot_images(Map::new(), &["hyperkube"]).unwrap();
    assert_eq!(shoot_images["images"]["hyperkube"], "registry.k8s.io/hyperkube:v1.30.2");
    assert!(op.inject_shoot_shoot_images(Map::new(), &["unknown"]).is_err());
}

#[tokio::test]
async fn test_shoot_conditions_are_merged_by_type() {
    let (op, store) = operation(shoot()).await;

    let mut healthy = Condition::new(ConditionType::ControlPlaneHealthy);
    healthy.status = ConditionStatus::True;
    op.update_shoot_conditions(&[healthy.clone(), Condition::new(ConditionType::EveryNodeReady)])
        .await
        .unwrap();
    let mut unhealthy = healthy.clone();
    unhealthy.status = ConditionStatus::False;
    op.update_shoot_conditions(&[unhealthy]).await.unwrap();

    let stored = store.stored();
    let conditions = stored.conditions();
    assert_eq!(conditions.len(), 2);
    let control_plane = conditions
        .iter()
        .find(|c| c.r#type == ConditionType::ControlPlaneHealthy)
        .unwrap();
    assert_eq!(control_plane.status, ConditionStatus::False);
    assert!(!control_plane.is_true());
}

#[tokio::test]
async fn test_shoot_client_error_is_surfaced() {
    let (op, _) = operation(shoot()).await;
    let err = op.initialize_shoot_clients().await.err().expect("expected error");
    assert!(err.to_string().contains("no shoot kubeconfig"));
}

#[tokio::test]
async fn test_cluster_resource_deletion_needs_seed_client() {
    let (op, _) = operation(shoot()).await;
    let err = op.delete_cluster_resource_from_seed().await.unwrap_err();
    assert!(err.to_string().contains("no seed kubeconfig"));
}

#[tokio::test]
async fn test_no_shoot_client_while_hibernated_api_server_is_down() {
    let mut hibernated = shoot();
    hibernated.spec.hibernation = Some(Hibernation { enabled: Some(true) });
    let status_client = Arc::new(FakeStatusClient::new(hibernated));
    let clients = Arc::new(CountingClientMap::new(0));
    let op = builder(status_client)
        .build(Arc::clone(&clients) as Arc<dyn ClientMap>)
        .await
        .unwrap();

    assert!(op.initialize_shoot_clients().await.unwrap().is_none());
    assert!(op.initialize_shoot_clients().await.unwrap().is_none());
    assert_eq!(clients.shoot_clients.load(Ordering::SeqCst), 0);
    assert_eq!(clients.seed_clients.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_clients_are_created_once() {
    let status_client = Arc::new(FakeStatusClient::new(shoot()));
    let clients = Arc::new(CountingClientMap::new(1));
    let op = builder(status_client)
        .build(Arc::clone(&clients) as Arc<dyn ClientMap>)
        .await
        .unwrap();

    op.initialize_seed_clients().await.unwrap();
    op.initialize_seed_clients().await.unwrap();
    assert!(op.initialize_shoot_clients().await.unwrap().is_some());
    assert!(op.initialize_shoot_clients().await.unwrap().is_some());
    assert_eq!(clients.seed_clients.load(Ordering::SeqCst), 1);
    assert_eq!(clients.shoot_clients.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hibernated_shoot_gets_client_while_api_server_runs() {
    let mut hibernated = shoot();
    hibernated.spec.hibernation = Some(Hibernation { enabled: Some(true) });
    let status_client = Arc::new(FakeStatusClient::new(hibernated));
    let clients = Arc::new(CountingClientMap::new(1));
    let op = builder(status_client)
        .build(Arc::clone(&clients) as Arc<dyn ClientMap>)
        .await
        .unwrap();

    assert!(op.initialize_shoot_clients().await.unwrap().is_some());
    assert_eq!(clients.shoot_clients.load(Ordering::SeqCst), 1);
}
