//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, server startup,
//! Kubernetes client and reconciler setup.

use super::care_loop::CareContext;
use crate::config::{create_shared_config, ServerConfig, SharedControllerConfig};
use crate::controller::condition::SystemClock;
use crate::controller::operation::{ClientMap, GardenerInfo, ImageVector, KubeClientMap};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::observability;
use crate::provider::ProviderRegistry;
use anyhow::{Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Command-line overrides applied on top of the environment configuration
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub seed_name: Option<String>,
    pub metrics_port: Option<u16>,
    pub image_vector_path: Option<std::path::PathBuf>,
}

/// Everything the controller and care loop need to run
pub struct InitializationResult {
    pub client: Client,
    pub config: SharedControllerConfig,
    pub reconciler: Arc<Reconciler>,
    pub care: Arc<CareContext>,
    pub server_state: Arc<ServerState>,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("reconciler", &self.reconciler)
            .field("server_state", &self.server_state)
            .finish_non_exhaustive()
    }
}

/// Install the crypto provider and the tracing subscriber
///
/// Must run before anything touches rustls.
pub fn init_process() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gardenlet=info".into()),
        )
        .init();
}

/// Initialize the controller runtime
///
/// - metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - reconciler and care loop setup
pub async fn initialize(options: RuntimeOptions) -> Result<InitializationResult> {
    info!("Starting gardenlet v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let config = create_shared_config();
    {
        let mut config = config.write().await;
        if options.seed_name.is_some() {
            config.seed_name = options.seed_name.clone();
        }
        if options.image_vector_path.is_some() {
            config.image_vector_path = options.image_vector_path.clone();
        }
    }
    let server_config = ServerConfig::from_env().with_port_override(options.metrics_port);
    let port = server_config.metrics_port;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, server_state_clone).await {
            error!("HTTP server error: {:#}", e);
        }
    });
    wait_for_server_ready(
        &server_state,
        &server_handle,
        server_config.startup_timeout,
        server_config.readiness_poll_interval,
    )
    .await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let image_vector = match config.read().await.image_vector_path.clone() {
        Some(path) => ImageVector::read_from_file(&path)
            .with_context(|| format!("Failed to read image vector {}", path.display()))?,
        None => ImageVector::default(),
    };
    info!(images = image_vector.images.len(), "Image vector loaded");

    let gardener_info = GardenerInfo {
        id: std::env::var("POD_NAME").unwrap_or_else(|_| "gardenlet".to_string()),
        name: "gardenlet".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let client_map: Arc<dyn ClientMap> = Arc::new(KubeClientMap::new(client.clone()));
    let cancel = CancellationToken::new();

    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        Arc::clone(&config),
        Arc::clone(&client_map),
        Arc::new(ProviderRegistry::new()),
        image_vector,
        gardener_info,
        cancel.child_token(),
    ));
    let care = Arc::new(CareContext {
        client: client.clone(),
        config: Arc::clone(&config),
        client_map,
        clock: Arc::new(SystemClock),
    });

    server_state.set_ready(true);
    info!("Controller initialized");

    Ok(InitializationResult {
        client,
        config,
        reconciler,
        care,
        server_state,
        cancel,
    })
}

/// Wait for the HTTP server to bind its port
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    startup_timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_listening.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
