//! # Object Applier
//!
//! Idempotent create-or-update, delete-if-exists and lookup for arbitrary objects.
//!
//! Apply is server-side apply with the gardenlet field manager. Deleting an
//! object that does not exist is not an error.

use crate::constants::FIELD_MANAGER;
use crate::error::{is_not_found, Error, Result};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Client, ResourceExt};
use tracing::debug;

#[async_trait]
pub trait ObjectApplier: Send + Sync {
    /// Create or update `object`; its `apiVersion`, `kind` and name must be set
    async fn apply(&self, object: &DynamicObject) -> Result<()>;

    /// Delete the object if it exists
    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<()>;

    /// Current state of the object, `None` if it does not exist
    async fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>>;
}

/// Split an `apiVersion` into group and version; core objects have an empty group
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Group, version and kind of a dynamic object
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| Error::InvalidObject(format!("object {} has no apiVersion/kind", object.name_any())))?;
    let (group, version) = parse_api_version(&types.api_version);
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Applies objects through the Kubernetes API
#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub struct KubeApplier {
    client: Client,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(gvk);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

#[async_trait]
impl ObjectApplier for KubeApplier {
    async fn apply(&self, object: &DynamicObject) -> Result<()> {
        let gvk = gvk_of(object)?;
        let name = object
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::InvalidObject(format!("{} without a name", gvk.kind)))?;
        let namespace = object.metadata.namespace.as_deref();

        debug!(kind = %gvk.kind, namespace = ?namespace, name, "Applying object");
        self.api(&gvk, namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(object))
            .await
            .map_err(|e| Error::kube(gvk.kind.clone(), namespace.unwrap_or_default(), name, e))?;
        Ok(())
    }

    async fn delete(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<()> {
        match self.api(gvk, namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(kind = %gvk.kind, namespace = ?namespace, name, "Deleted object");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::kube(gvk.kind.clone(), namespace.unwrap_or_default(), name, e)),
        }
    }

    async fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Result<Option<DynamicObject>> {
        self.api(gvk, namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::kube(gvk.kind.clone(), namespace.unwrap_or_default(), name, e))
    }
}
