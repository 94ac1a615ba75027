//! Health reports published on extension resources.

use crate::crd::{ExtensionCondition, ExtensionKind, ExtensionStatus};
use crate::error::{Error, Result};
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Client, ResourceExt};
use tracing::debug;

const EXTENSIONS_GROUP: &str = "extensions.gardener.cloud";
const EXTENSIONS_VERSION: &str = "v1alpha1";

pub fn api_resource(kind: ExtensionKind) -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk(EXTENSIONS_GROUP, EXTENSIONS_VERSION, kind.as_str()),
        kind.plural(),
    )
}

/// Conditions reported on `objects`, dropping types and statuses this crate does not know
pub fn extension_conditions(kind: ExtensionKind, objects: &[DynamicObject]) -> Vec<ExtensionCondition> {
    let mut conditions = Vec::new();
    for object in objects {
        let Some(status) = object.data.get("status") else {
            continue;
        };
        let status: ExtensionStatus = match serde_json::from_value(status.clone()) {
            Ok(status) => status,
            Err(e) => {
                debug!(kind = %kind, name = %object.name_any(), error = %e, "Ignoring unparsable extension status");
                continue;
            }
        };
        for raw in &status.conditions {
            match raw.parse() {
                Ok(condition) => conditions.push(ExtensionCondition {
                    condition,
                    extension_type: kind.as_str().to_string(),
                    extension_name: object.name_any(),
                    extension_namespace: object.namespace().unwrap_or_default(),
                }),
                Err(e) => debug!(kind = %kind, name = %object.name_any(), error = %e, "Ignoring extension condition"),
            }
        }
    }
    conditions
}

/// Read the health reports of every extension kind in `namespace`
pub async fn read_extension_conditions(client: &Client, namespace: &str) -> Result<Vec<ExtensionCondition>> {
    let mut conditions = Vec::new();
    for kind in ExtensionKind::ALL {
        let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &api_resource(kind));
        let list = api.list(&ListParams::default()).await.map_err(|e| Error::List {
            kind: kind.as_str(),
            namespace: Some(namespace.to_string()),
            message: e.to_string(),
        })?;
        conditions.extend(extension_conditions(kind, &list.items));
    }
    Ok(conditions)
}
