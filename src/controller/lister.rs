//! # Listers
//!
//! Snapshot reads over cached collections of cluster objects.
//!
//! A [`Lister`] returns a consistent snapshot at call time, scoped by namespace
//! and filtered by a label [`Selector`]. There is no watch guarantee: two calls
//! may observe different states. Health checks take listers as inputs so they
//! can run against API snapshots in production and static fixtures in tests.

use crate::error::{Error, Result};
use kube::api::{Api, ListParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    match_labels: BTreeMap<String, String>,
}

impl Selector {
    /// Selector matching every object
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::everything().and(key, value)
    }

    pub fn and(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn is_everything(&self) -> bool {
        self.match_labels.is_empty()
    }

    /// Selector in API query form, e.g. `gardener.cloud/role=controlplane`
    pub fn to_query(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub trait Lister<K>: Send + Sync {
    /// Objects in `namespace` (all namespaces if `None`) matching `selector`
    fn list(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<Arc<K>>>;
}

fn select<K: Resource>(items: impl IntoIterator<Item = Arc<K>>, namespace: Option<&str>, selector: &Selector) -> Vec<Arc<K>> {
    let mut selected: Vec<Arc<K>> = items
        .into_iter()
        .filter(|obj| namespace.is_none_or(|ns| obj.meta().namespace.as_deref() == Some(ns)))
        .filter(|obj| selector.matches(obj.labels()))
        .collect();
    selected.sort_by(|a, b| {
        (a.meta().namespace.as_deref(), a.meta().name.as_deref())
            .cmp(&(b.meta().namespace.as_deref(), b.meta().name.as_deref()))
    });
    selected
}

/// Lister over a fixed set of objects
#[derive(Debug, Clone)]
pub struct StaticLister<K> {
    items: Vec<Arc<K>>,
}

impl<K> Default for StaticLister<K> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<K: Resource> StaticLister<K> {
    pub fn new(items: impl IntoIterator<Item = K>) -> Self {
        Self {
            items: items.into_iter().map(Arc::new).collect(),
        }
    }

    /// Snapshot of the objects matching `selector` in `namespace`, read from the API server
    pub async fn from_api(api: &Api<K>, selector: &Selector) -> Result<Self>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        let mut params = ListParams::default();
        if !selector.is_everything() {
            params = params.labels(&selector.to_query());
        }
        let list = api.list(&params).await.map_err(|e| Error::List {
            kind: kind_name::<K>(),
            namespace: None,
            message: e.to_string(),
        })?;
        Ok(Self::new(list.items))
    }
}

impl<K: Resource + Send + Sync> Lister<K> for StaticLister<K> {
    fn list(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<Arc<K>>> {
        Ok(select(self.items.iter().cloned(), namespace, selector))
    }
}

/// Lister whose snapshot could not be taken; every list reports the original failure
#[derive(Debug, Clone)]
pub struct FailedLister {
    kind: &'static str,
    namespace: Option<String>,
    message: String,
}

impl FailedLister {
    pub fn new(kind: &'static str, namespace: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.map(str::to_string),
            message: message.into(),
        }
    }
}

impl<K> Lister<K> for FailedLister {
    fn list(&self, _namespace: Option<&str>, _selector: &Selector) -> Result<Vec<Arc<K>>> {
        Err(Error::List {
            kind: self.kind,
            namespace: self.namespace.clone(),
            message: self.message.clone(),
        })
    }
}

/// Snapshot of every object in `api`, or a lister repeating the read failure
pub async fn snapshot<K>(api: &Api<K>, namespace: Option<&str>) -> Arc<dyn Lister<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    match StaticLister::from_api(api, &Selector::everything()).await {
        Ok(lister) => Arc::new(lister),
        Err(e) => Arc::new(FailedLister::new(kind_name::<K>(), namespace, e.to_string())),
    }
}

fn kind_name<K: Resource>() -> &'static str {
    std::any::type_name::<K>()
        .rsplit("::")
        .next()
        .unwrap_or("object")
}
