//! PravegaCluster Custom Resource Definition

use std::sync::LazyLock;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::status::PravegaClusterStatus;
use super::types::{
    AuthenticationParameters, ExternalAccess, PravegaSpec, TlsPolicy, DEFAULT_SERVICE_TYPE,
};

/// Default ZooKeeper client address
pub const DEFAULT_ZOOKEEPER_URI: &str = "zookeeper-client:2181";
/// Default BookKeeper bookie addresses
pub const DEFAULT_BOOKKEEPER_URI: &str = "bookkeeper-bookie-0.bookkeeper-bookie-headless.default.svc.cluster.local:3181,bookkeeper-bookie-1.bookkeeper-bookie-headless.default.svc.cluster.local:3181,bookkeeper-bookie-2.bookkeeper-bookie-headless.default.svc.cluster.local:3181";
/// Version deployed when none is requested
pub const DEFAULT_PRAVEGA_VERSION: &str = "0.11.0";

static EMPTY_PRAVEGA_SPEC: LazyLock<PravegaSpec> = LazyLock::new(PravegaSpec::default);

/// Specification for a Pravega cluster
///
/// Every field is optional on input. The reconciler persists defaults for
/// anything left unset before it renders child resources, and the accessor
/// methods apply the same defaults to objects that have not been defaulted
/// yet (for example, those seen at admission time).
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pravega.pravega.io",
    version = "v1beta1",
    kind = "PravegaCluster",
    plural = "pravegaclusters",
    shortname = "pk",
    status = "PravegaClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.currentVersion"}"#,
    printcolumn = r#"{"name":"Desired Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Desired Members","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready Members","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PravegaClusterSpec {
    /// ZooKeeper client address as `host:port`
    #[serde(default)]
    pub zookeeper_uri: String,

    /// Comma-separated BookKeeper bookie addresses
    #[serde(default)]
    pub bookkeeper_uri: String,

    /// Desired Pravega version
    #[serde(default)]
    pub version: String,

    /// External access; disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_access: Option<ExternalAccess>,

    /// TLS configuration; plaintext when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsPolicy>,

    /// Authentication; disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationParameters>,

    /// Controller and segment store configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pravega: Option<PravegaSpec>,
}

impl PravegaClusterSpec {
    /// Tier configuration, or an all-default one when absent
    pub fn pravega(&self) -> &PravegaSpec {
        self.pravega.as_ref().unwrap_or(&EMPTY_PRAVEGA_SPEC)
    }

    /// Requested version, falling back to the default for an empty field
    pub fn version_or_default(&self) -> &str {
        if self.version.is_empty() {
            DEFAULT_PRAVEGA_VERSION
        } else {
            &self.version
        }
    }

    /// True if external access is enabled
    pub fn external_access_enabled(&self) -> bool {
        self.external_access.as_ref().is_some_and(|e| e.enabled)
    }

    /// External DNS domain, only when external access is enabled
    pub fn external_domain(&self) -> Option<&str> {
        self.external_access
            .as_ref()
            .filter(|e| e.enabled)
            .and_then(|e| e.domain_name.as_deref())
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    /// True if authentication is enabled
    pub fn authentication_enabled(&self) -> bool {
        self.authentication.as_ref().is_some_and(|a| a.enabled)
    }

    /// Authentication parameters, only when enabled
    pub fn enabled_authentication(&self) -> Option<&AuthenticationParameters> {
        self.authentication.as_ref().filter(|a| a.enabled)
    }

    /// TLS policy, if any
    pub fn tls(&self) -> Option<&TlsPolicy> {
        self.tls.as_ref()
    }

    /// Service type for the external controller service
    ///
    /// The tier-specific type wins over `externalAccess.type`, which wins
    /// over LoadBalancer.
    pub fn controller_external_service_type(&self) -> &str {
        self.external_service_type(self.pravega().controller_external_service_type.as_deref())
    }

    /// Service type for per-replica segment store services
    pub fn segment_store_external_service_type(&self) -> &str {
        self.external_service_type(
            self.pravega()
                .segment_store_external_service_type
                .as_deref(),
        )
    }

    fn external_service_type<'a>(&'a self, tier: Option<&'a str>) -> &'a str {
        tier.filter(|t| !t.is_empty())
            .or_else(|| {
                self.external_access
                    .as_ref()
                    .and_then(|e| e.type_.as_deref())
                    .filter(|t| !t.is_empty())
            })
            .unwrap_or(DEFAULT_SERVICE_TYPE)
    }
}

impl PravegaCluster {
    /// Name of the cluster object
    pub fn cluster_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Namespace of the cluster object
    pub fn cluster_namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// True once the API server has set a deletion timestamp
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Owned copy of the status, or an empty one
    pub fn status_or_default(&self) -> PravegaClusterStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Expected number of pods across both tiers
    pub fn expected_size(&self) -> i32 {
        let pravega = self.spec.pravega();
        pravega.controller_replicas() + pravega.segment_store_replicas()
    }
}
