//! Validating admission webhook for PravegaCluster
//!
//! The API server sends every create, update and delete of a PravegaCluster
//! here before it is persisted. Requests that would break a running cluster
//! (downgrades, edits during an upgrade, changes to options baked into
//! stored data, memory settings that cannot fit the pod) are rejected with a
//! message the user sees verbatim.

pub mod handler;
pub mod validation;

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    routing::{get, post},
    Router,
};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};

#[cfg(test)]
use mockall::automock;

use pravega_common::Result;

pub use validation::{validate, Denial};

/// Path the ValidatingWebhookConfiguration points at
pub const VALIDATE_PATH: &str = "/validate-pravega-pravega-io-v1beta1-pravegacluster";

/// Liveness endpoint
pub const HEALTH_PATH: &str = "/healthz";

/// Read access to the ConfigMaps the controller renders
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigMapReader: Send + Sync {
    /// Get a ConfigMap, `Ok(None)` when it does not exist
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;
}

/// [`ConfigMapReader`] over the Kubernetes API
pub struct KubeConfigMapReader {
    client: Client,
}

impl KubeConfigMapReader {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigMapReader for KubeConfigMapReader {
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Shared state for webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Source of the running controller configuration
    pub configmaps: Arc<dyn ConfigMapReader>,
}

impl WebhookState {
    /// Create webhook state backed by the given Kubernetes client
    pub fn new(kube: Client) -> Self {
        Self::with_reader(Arc::new(KubeConfigMapReader::new(kube)))
    }

    /// Create webhook state with an explicit ConfigMap source
    pub fn with_reader(configmaps: Arc<dyn ConfigMapReader>) -> Self {
        Self { configmaps }
    }
}

/// Create the webhook router
///
/// - `POST /validate-pravega-pravega-io-v1beta1-pravegacluster`
/// - `GET /healthz`
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(handler::validate_handler))
        .route(HEALTH_PATH, get(handler::health_handler))
        .with_state(state)
}
