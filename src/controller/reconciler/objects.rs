//! Desired objects written by the reconcile flow.
//!
//! Everything is rendered as a [`DynamicObject`] so one applier handles core
//! objects and extension resources alike.

use crate::constants::*;
use crate::crd::Shoot;
use crate::error::Result;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, Namespace, PodSpec, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::ByteString;
use kube::api::{DynamicObject, ObjectMeta};
use kube::core::{GroupVersionKind, TypeMeta};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const EXTENSIONS_API_VERSION: &str = "extensions.gardener.cloud/v1alpha1";
pub const DRUID_API_VERSION: &str = "druid.gardener.cloud/v1alpha1";
pub const RESOURCES_API_VERSION: &str = "resources.gardener.cloud/v1alpha1";

/// Name of the provider credentials secret in the shoot namespace of the seed
pub const SECRET_CLOUD_PROVIDER: &str = "cloudprovider";

pub fn extension_gvk(kind: &str) -> GroupVersionKind {
    GroupVersionKind::gvk("extensions.gardener.cloud", "v1alpha1", kind)
}

pub fn deployment_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("apps", "v1", "Deployment")
}

pub fn etcd_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("druid.gardener.cloud", "v1alpha1", "Etcd")
}

fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
}

fn meta(namespace: Option<&str>, name: &str, labels: Option<BTreeMap<String, String>>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels,
        ..Default::default()
    }
}

/// Re-encode a typed object as a dynamic one
pub fn to_dynamic<K: Serialize>(object: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// A custom resource with the given spec
pub fn custom_object(api_version: &str, kind: &str, namespace: &str, name: &str, spec: Value) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: meta(Some(namespace), name, None),
        data: json!({ "spec": spec }),
    }
}

pub fn namespace(shoot: &Shoot) -> Result<DynamicObject> {
    let namespace = Namespace {
        metadata: meta(None, &shoot.technical_id(), labels(&[(LABEL_ROLE, "shoot")])),
        ..Default::default()
    };
    to_dynamic(&namespace)
}

pub fn cloud_provider_secret(namespace: &str, data: &BTreeMap<String, Vec<u8>>) -> Result<DynamicObject> {
    let secret = Secret {
        metadata: meta(Some(namespace), SECRET_CLOUD_PROVIDER, labels(&[(LABEL_ROLE, "cloudprovider")])),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                .collect(),
        ),
        ..Default::default()
    };
    to_dynamic(&secret)
}

/// Infrastructure extension resource carrying the generated provider config
pub fn infrastructure(shoot: &Shoot, namespace: &str, provider_config: &Value) -> DynamicObject {
    custom_object(
        EXTENSIONS_API_VERSION,
        "Infrastructure",
        namespace,
        shoot.name(),
        json!({
            "type": shoot.spec.provider.r#type,
            "region": shoot.spec.region,
            "secretRef": { "name": SECRET_CLOUD_PROVIDER, "namespace": namespace },
            "providerConfig": provider_config,
        }),
    )
}

/// Main or events etcd; hibernated shoots keep zero replicas
pub fn etcd(namespace: &str, name: &str, hibernated: bool) -> DynamicObject {
    let mut object = custom_object(
        DRUID_API_VERSION,
        "Etcd",
        namespace,
        name,
        json!({ "replicas": if hibernated { 0 } else { 1 } }),
    );
    object.metadata.labels = labels(&[(LABEL_ROLE, ROLE_CONTROL_PLANE)]);
    object
}

/// Single-container deployment running `image`
pub fn control_plane_deployment(namespace: &str, name: &str, image: &str, replicas: i32) -> Result<DynamicObject> {
    let pod_labels = labels(&[(LABEL_ROLE, ROLE_CONTROL_PLANE), ("app", name)]);
    let deployment = Deployment {
        metadata: meta(Some(namespace), name, labels(&[(LABEL_ROLE, ROLE_CONTROL_PLANE)])),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: labels(&[("app", name)]),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: pod_labels,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };
    to_dynamic(&deployment)
}

/// DNS record resolving the internal API server domain
pub fn internal_dns_record(shoot: &Shoot, namespace: &str, provider: &str, domain: &str) -> DynamicObject {
    custom_object(
        EXTENSIONS_API_VERSION,
        "DNSRecord",
        namespace,
        &format!("{}-internal", shoot.name()),
        json!({
            "type": provider,
            "name": format!("api.{domain}"),
            "recordType": "CNAME",
            "values": [format!("{DEPLOYMENT_KUBE_APISERVER}.{namespace}.svc")],
        }),
    )
}

pub fn control_plane(shoot: &Shoot, namespace: &str, provider_config: &Value) -> DynamicObject {
    custom_object(
        EXTENSIONS_API_VERSION,
        "ControlPlane",
        namespace,
        shoot.name(),
        json!({
            "type": shoot.spec.provider.r#type,
            "region": shoot.spec.region,
            "secretRef": { "name": SECRET_CLOUD_PROVIDER, "namespace": namespace },
            "providerConfig": provider_config,
        }),
    )
}

pub fn worker(shoot: &Shoot, namespace: &str) -> DynamicObject {
    let pools: Vec<Value> = shoot
        .spec
        .provider
        .workers
        .iter()
        .map(|pool| {
            json!({
                "name": pool.name,
                "minimum": pool.minimum,
                "maximum": pool.maximum,
                "machineType": pool.machine.r#type,
            })
        })
        .collect();
    custom_object(
        EXTENSIONS_API_VERSION,
        "Worker",
        namespace,
        shoot.name(),
        json!({
            "type": shoot.spec.provider.r#type,
            "region": shoot.spec.region,
            "pools": pools,
        }),
    )
}

/// Managed resource; `class` `seed` resources are applied to the seed itself
pub fn managed_resource(namespace: &str, name: &str, class: Option<&str>, role: &str) -> DynamicObject {
    let mut spec = json!({ "secretRefs": [name] });
    if let Some(class) = class {
        spec["class"] = json!(class);
    }
    let mut object = custom_object(RESOURCES_API_VERSION, "ManagedResource", namespace, name, spec);
    object.metadata.labels = labels(&[(LABEL_ROLE, role)]);
    object
}

/// Ingress hosts of the monitoring stack, consumed by the monitoring managed resource
pub fn monitoring_hosts(namespace: &str, hosts: BTreeMap<String, String>) -> Result<DynamicObject> {
    let config_map = ConfigMap {
        metadata: meta(Some(namespace), "monitoring-ingress-hosts", labels(&[(LABEL_ROLE, ROLE_MONITORING)])),
        data: Some(hosts),
        ..Default::default()
    };
    to_dynamic(&config_map)
}
