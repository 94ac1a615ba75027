//! # Care Loop
//!
//! Re-evaluates the conditions of every shoot on this seed at the care sync
//! period and persists them in the shoot status.

use crate::config::SharedControllerConfig;
use crate::constants::DEFAULT_STATUS_UPDATE_ATTEMPTS;
use crate::controller::care::{
    read_extension_conditions, CareInputs, KubeApiServerProbe, SeedSources, ShootCare, ShootSources,
};
use crate::controller::condition::{merge_conditions, Clock};
use crate::controller::lister::snapshot;
use crate::controller::operation::{try_update_shoot_status, ClientMap, KubeShootStatusClient};
use crate::controller::reconciler::is_responsible;
use crate::crd::{Etcd, ManagedResource, Seed, Shoot, ShootStatus, Worker};
use crate::error::{Error, Result};
use crate::observability::metrics;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub struct CareContext {
    pub client: Client,
    pub config: SharedControllerConfig,
    pub client_map: Arc<dyn ClientMap>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CareContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CareContext").field("clock", &self.clock).finish_non_exhaustive()
    }
}

/// Evaluate all shoots every care sync period until `cancel` fires
pub async fn run_care_loop(ctx: Arc<CareContext>, cancel: CancellationToken) {
    info!("Starting care loop");
    loop {
        let period = ctx.config.read().await.care_sync_period;
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }
        if let Err(e) = care_all(&ctx).await {
            error!(error = %e, "Care evaluation round failed");
            metrics::increment_care_errors("list");
        }
    }
    info!("Care loop stopped");
}

async fn care_all(ctx: &CareContext) -> Result<()> {
    let config = ctx.config.read().await.clone();
    let shoots = Api::<Shoot>::all(ctx.client.clone())
        .list(&ListParams::default())
        .await
        .map_err(|e| Error::List {
            kind: "Shoot",
            namespace: None,
            message: e.to_string(),
        })?;
    let care = ShootCare::from_config(&config, Arc::clone(&ctx.clock));
    let seed_name = config.seed_name.as_deref();

    let candidates: Vec<Shoot> = shoots
        .items
        .into_iter()
        .filter(|shoot| is_responsible(shoot, seed_name))
        .collect();
    debug!(shoots = candidates.len(), "Evaluating shoot health");

    futures::stream::iter(candidates)
        .map(|shoot| {
            let care = &care;
            async move {
                let span = info_span!("shoot.care", shoot.namespace = %shoot.namespace(), shoot.name = %shoot.name());
                if let Err(e) = care_shoot(ctx, care, &shoot).instrument(span).await {
                    warn!(shoot.namespace = %shoot.namespace(), shoot.name = %shoot.name(), error = %e, "Shoot care failed");
                    metrics::increment_care_errors("shoot");
                }
            }
        })
        .buffer_unordered(config.care_concurrency.max(1))
        .collect::<Vec<()>>()
        .await;
    Ok(())
}

async fn gather_inputs(ctx: &CareContext, seed: &Seed, shoot: &Shoot) -> Result<CareInputs> {
    let namespace = shoot.technical_id();
    let seed_client = ctx.client_map.seed_client(seed).await?;
    let ns = Some(namespace.as_str());

    let sources = SeedSources {
        deployments: snapshot(&Api::<Deployment>::namespaced(seed_client.clone(), &namespace), ns).await,
        statefulsets: snapshot(&Api::<StatefulSet>::namespaced(seed_client.clone(), &namespace), ns).await,
        etcds: snapshot(&Api::<Etcd>::namespaced(seed_client.clone(), &namespace), ns).await,
        workers: snapshot(&Api::<Worker>::namespaced(seed_client.clone(), &namespace), ns).await,
        managed_resources: snapshot(&Api::<ManagedResource>::namespaced(seed_client.clone(), &namespace), ns)
            .await,
    };

    let shoot_sources = match ctx.client_map.shoot_client(seed, shoot).await {
        Ok(client) => Ok(ShootSources {
            api_server: Arc::new(KubeApiServerProbe::new(client.clone())),
            nodes: snapshot(&Api::<Node>::all(client), None).await,
        }),
        Err(e) => Err(e.to_string()),
    };

    let extension_conditions = match read_extension_conditions(&seed_client, &namespace).await {
        Ok(conditions) => conditions,
        Err(e) => {
            warn!(error = %e, "Could not read extension health reports");
            Vec::new()
        }
    };

    Ok(CareInputs {
        seed_namespace: namespace,
        seed: sources,
        shoot: shoot_sources,
        extension_conditions,
    })
}

async fn care_shoot(ctx: &CareContext, care: &ShootCare, shoot: &Shoot) -> Result<()> {
    let Some(seed_name) = shoot.spec.seed_name.as_deref() else {
        debug!("Shoot is not scheduled yet, skipping care");
        return Ok(());
    };
    let seed = Api::<Seed>::all(ctx.client.clone())
        .get(seed_name)
        .await
        .map_err(|e| Error::kube("Seed", "", seed_name, e))?;

    let inputs = gather_inputs(ctx, &seed, shoot).await?;
    let conditions = care.evaluate(shoot, &inputs).await;
    metrics::increment_care_evaluations();

    let status_client = KubeShootStatusClient::new(ctx.client.clone());
    try_update_shoot_status(
        &status_client,
        shoot.namespace(),
        shoot.name(),
        DEFAULT_STATUS_UPDATE_ATTEMPTS,
        |latest| {
            let status = latest.status.get_or_insert_with(ShootStatus::default);
            status.conditions = merge_conditions(&status.conditions, conditions.iter().cloned());
            Ok(())
        },
    )
    .await?;

    for condition in &conditions {
        metrics::set_shoot_condition(shoot.namespace(), shoot.name(), condition.r#type, condition.status);
    }
    debug!(conditions = conditions.len(), "Shoot conditions updated");
    Ok(())
}
