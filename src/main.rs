//! # Gardenlet
//!
//! Runs on a seed cluster and manages the shoot clusters scheduled onto it.
//!
//! - Reconciles every responsible `Shoot` through the reconciliation flow
//! - Periodically evaluates shoot health and writes the resulting conditions
//! - Serves `/metrics`, `/healthz` and `/readyz`

use anyhow::Result;
use clap::Parser;
use gardenlet::runtime::{initialize, init_process, run_care_loop, run_shoot_controller, RuntimeOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Gardenlet - shoot reconciliation and health evaluation for a seed cluster
#[derive(Parser, Debug)]
#[command(name = "gardenlet", version, about, long_about = None)]
struct Cli {
    /// Name of the seed this gardenlet is responsible for
    #[arg(long, env = "SEED_NAME")]
    seed_name: Option<String>,

    /// Port for metrics and health probes
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Path to the image vector YAML file
    #[arg(long)]
    image_vector: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_process();

    let init = initialize(RuntimeOptions {
        seed_name: cli.seed_name,
        metrics_port: cli.metrics_port,
        image_vector_path: cli.image_vector,
    })
    .await?;

    let care = tokio::spawn(run_care_loop(Arc::clone(&init.care), init.cancel.clone()));

    run_shoot_controller(init.client.clone(), Arc::clone(&init.reconciler)).await;

    info!("Shoot controller stopped, shutting down");
    init.server_state.set_ready(false);
    init.cancel.cancel();
    if let Err(e) = care.await {
        tracing::warn!("Care loop terminated abnormally: {}", e);
    }
    Ok(())
}
