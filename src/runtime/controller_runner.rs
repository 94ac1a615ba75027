//! # Controller Runner
//!
//! Watches shoots and runs the reconcile flow for every change.

use super::error_policy::handle_reconciliation_error;
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::Shoot;
use futures::StreamExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Must stay below the client read timeout so idle watches are closed by the API server
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the shoot controller until a termination signal arrives
pub async fn run_shoot_controller(client: Client, reconciler: Arc<Reconciler>) {
    let shoots: Api<Shoot> = Api::all(client);
    info!("Starting Shoot controller");

    let controller =
        Controller::new(shoots, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)).shutdown_on_signal();
    let cache = controller.store();
    let ctx = Arc::clone(&reconciler);

    controller
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| {
            match result {
                Ok((object, action)) => debug!(shoot = %object, ?action, "Shoot reconciliation completed"),
                Err(e) => error!(error = %e, "Shoot reconciliation error"),
            }
            // shoots gone from the cache are never reconciled again
            ctx.backoff_states
                .retain_existing(|namespace, name| cache.get(&ObjectRef::new(name).within(namespace)).is_some());
            futures::future::ready(())
        })
        .await;

    info!("Shoot controller stopped");
}
