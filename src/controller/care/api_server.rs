//! API server availability probe.

use async_trait::async_trait;
use kube::Client;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiServerHealth {
    Healthy,
    /// `/healthz` answered with a non-success status code
    Unhealthy { status_code: u16, message: String },
    /// The request could not be completed
    Unreachable(String),
}

#[async_trait]
pub trait ApiServerProbe: Send + Sync {
    async fn healthz(&self) -> ApiServerHealth;
}

/// Probes `/healthz` through a shoot client
#[derive(Clone)]
pub struct KubeApiServerProbe {
    client: Client,
}

impl KubeApiServerProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApiServerProbe for KubeApiServerProbe {
    async fn healthz(&self) -> ApiServerHealth {
        let request = match http::Request::get("/healthz").body(Vec::new()) {
            Ok(request) => request,
            Err(e) => return ApiServerHealth::Unreachable(e.to_string()),
        };
        match self.client.request_text(request).await {
            Ok(_) => ApiServerHealth::Healthy,
            Err(kube::Error::Api(response)) => ApiServerHealth::Unhealthy {
                status_code: response.code,
                message: response.message.clone(),
            },
            Err(e) => ApiServerHealth::Unreachable(e.to_string()),
        }
    }
}
