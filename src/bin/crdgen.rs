//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions the gardenlet reads and writes as a
//! multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crds.yaml
//! ```

use anyhow::{Context, Result};
use gardenlet::crd::{Etcd, ManagedResource, Seed, Shoot, Worker};
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let crds = [
        Shoot::crd(),
        Seed::crd(),
        Worker::crd(),
        Etcd::crd(),
        ManagedResource::crd(),
    ];
    for crd in crds {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let yaml = serde_yaml::to_string(&crd).with_context(|| format!("Failed to serialize CRD {name}"))?;
        println!("---\n{yaml}");
    }
    Ok(())
}
