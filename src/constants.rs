//! # Constants
//!
//! Default configuration values and well-known resource names.

/// Default port for the metrics and probe server
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default server startup timeout (seconds)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default server readiness poll interval (milliseconds)
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default interval between two care evaluations of the same shoot (seconds)
pub const DEFAULT_CARE_SYNC_PERIOD_SECS: u64 = 30;

/// Default number of shoots evaluated concurrently by the care loop
pub const DEFAULT_CARE_CONCURRENCY: usize = 5;

/// Default upper bound of concurrently running flow tasks
pub const DEFAULT_MAX_PARALLEL_FLOW_TASKS: usize = 5;

/// Default timeout for flow tasks that retry until they succeed (seconds)
pub const DEFAULT_FLOW_TASK_TIMEOUT_SECS: u64 = 600;

/// Default interval between retries of a retrying flow task (seconds)
pub const DEFAULT_FLOW_TASK_RETRY_INTERVAL_SECS: u64 = 5;

/// Default requeue interval after a successful reconciliation (seconds)
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 3600;

/// Fallback requeue interval when the backoff state cannot be read (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Attempts for optimistic status updates before giving up
pub const DEFAULT_STATUS_UPDATE_ATTEMPTS: u32 = 5;

/// Namespace in the garden cluster holding gardenlet secrets
pub const DEFAULT_GARDEN_NAMESPACE: &str = "garden";

/// Default chart root path
pub const DEFAULT_CHARTS_PATH: &str = "charts";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "gardenlet";

/// Label grouping nodes into worker pools
pub const LABEL_WORKER_POOL: &str = "worker.gardener.cloud/pool";

/// Label carrying the role of a control plane component in the seed
pub const LABEL_ROLE: &str = "gardener.cloud/role";

pub const ROLE_CONTROL_PLANE: &str = "controlplane";
pub const ROLE_MONITORING: &str = "monitoring";
pub const ROLE_LOGGING: &str = "logging";
pub const ROLE_SYSTEM_COMPONENT: &str = "system-component";

/// Label on garden secrets naming the purpose they serve
pub const LABEL_SECRET_ROLE: &str = "gardener.cloud/role";

// Control plane deployments
pub const DEPLOYMENT_GARDENER_RESOURCE_MANAGER: &str = "gardener-resource-manager";
pub const DEPLOYMENT_KUBE_APISERVER: &str = "kube-apiserver";
pub const DEPLOYMENT_KUBE_CONTROLLER_MANAGER: &str = "kube-controller-manager";
pub const DEPLOYMENT_KUBE_SCHEDULER: &str = "kube-scheduler";
pub const DEPLOYMENT_CLUSTER_AUTOSCALER: &str = "cluster-autoscaler";

// Etcds
pub const ETCD_MAIN: &str = "etcd-main";
pub const ETCD_EVENTS: &str = "etcd-events";

// Monitoring stack
pub const DEPLOYMENT_GRAFANA_OPERATORS: &str = "grafana-operators";
pub const DEPLOYMENT_GRAFANA_USERS: &str = "grafana-users";
pub const DEPLOYMENT_KUBE_STATE_METRICS_SEED: &str = "kube-state-metrics-seed";
pub const DEPLOYMENT_KUBE_STATE_METRICS_SHOOT: &str = "kube-state-metrics-shoot";
pub const STATEFULSET_PROMETHEUS: &str = "prometheus";
pub const STATEFULSET_ALERTMANAGER: &str = "alertmanager";

// Logging stack
pub const STATEFULSET_LOKI: &str = "loki";

/// Managed resources carrying shoot system components
pub const MANAGED_RESOURCE_SHOOT_CORE: &str = "shoot-core";
pub const MANAGED_RESOURCE_SHOOT_CORE_NAMESPACES: &str = "shoot-core-namespaces";

/// Roles of garden secrets read into an operation
pub const SECRET_ROLE_INTERNAL_DOMAIN: &str = "internal-domain";
pub const SECRET_ROLE_DEFAULT_DOMAIN: &str = "default-domain";

/// Annotations on domain secrets
pub const ANNOTATION_DNS_DOMAIN: &str = "dns.gardener.cloud/domain";
pub const ANNOTATION_DNS_PROVIDER: &str = "dns.gardener.cloud/provider";

/// Prefix of shoot technical ids
pub const TECHNICAL_ID_PREFIX: &str = "shoot--";

/// Secret in the shoot's seed namespace holding the shoot kubeconfig
pub const SECRET_SHOOT_KUBECONFIG: &str = "gardener";
pub const DATA_KEY_KUBECONFIG: &str = "kubeconfig";

// Ingress host prefixes of the shoot monitoring stack
pub const INGRESS_PREFIX_GRAFANA_OPERATORS: &str = "g-operators";
pub const INGRESS_PREFIX_GRAFANA_USERS: &str = "g-users";
pub const INGRESS_PREFIX_PROMETHEUS: &str = "p";
pub const INGRESS_PREFIX_ALERTMANAGER: &str = "au";
