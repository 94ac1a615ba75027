//! # Errors
//!
//! Error types for the reconciliation and health-evaluation core.
//!
//! Only access failures are errors. An unhealthy deployment, a stale extension
//! report or a missing node is data and ends up in a [`crate::crd::Condition`].

use thiserror::Error;

/// Result alias for the crate's fallible operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A lister could not produce a snapshot
    #[error("failed to list {kind} in namespace {namespace:?}: {message}")]
    List {
        kind: &'static str,
        namespace: Option<String>,
        message: String,
    },

    #[error("kubernetes API error for {kind} {namespace}/{name}: {source}")]
    Kube {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("last operation of Shoot {namespace}/{name} is unset")]
    LastOperationUnset { namespace: String, name: String },

    #[error("last operation of Shoot {namespace}/{name} was updated mid-air")]
    MidAirUpdate { namespace: String, name: String },

    #[error("conflicting update of {kind} {namespace}/{name} after {attempts} attempts")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
        attempts: u32,
    },

    #[error("failed to create {cluster} client: {message}")]
    Client {
        cluster: &'static str,
        message: String,
    },

    #[error("provider {provider} failed to generate config: {message}")]
    Provider { provider: String, message: String },

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Attach resource context to a kube error
    pub fn kube(kind: impl Into<String>, namespace: &str, name: &str, source: kube::Error) -> Self {
        Error::Kube {
            kind: kind.into(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        }
    }

    /// Whether the error is an optimistic-concurrency conflict (HTTP 409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(resp), .. } if resp.code == 409)
    }
}

/// Whether a raw kube error means the object does not exist
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(resp) if resp.code == 404)
}
