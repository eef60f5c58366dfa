//! Sub-specifications embedded in a PravegaCluster

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
    PodSecurityContext, ResourceRequirements,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default image repository
pub const DEFAULT_IMAGE_REPOSITORY: &str = "pravega/pravega";
/// Default image pull policy
pub const DEFAULT_PULL_POLICY: &str = "Always";
/// Service type used for external access when none is configured
pub const DEFAULT_SERVICE_TYPE: &str = "LoadBalancer";
/// Claim name used as filesystem long-term storage by default
pub const DEFAULT_LTS_CLAIM_NAME: &str = "pravega-tier2";
/// Segment store listener port when `pravegaservice.service.listener.port` is unset
pub const DEFAULT_LISTENER_PORT: i32 = 12345;
/// Runtime option holding the segment store listener port
pub const LISTENER_PORT_OPTION: &str = "pravegaservice.service.listener.port";
/// Default replica count of each tier
pub const DEFAULT_REPLICAS: i32 = 1;
/// Default disruption budget value of each tier
pub const DEFAULT_MAX_UNAVAILABLE: i32 = 1;
/// Default stall timeout of an upgrade, in minutes
pub const DEFAULT_ROLLBACK_TIMEOUT_MINUTES: i64 = 10;
/// Default controller service name suffix
pub const DEFAULT_CONTROLLER_SVC_SUFFIX: &str = "pravega-controller";
/// Default segment store headless service name suffix
pub const DEFAULT_SEGMENT_STORE_HEADLESS_SUFFIX: &str = "pravega-segmentstore-headless";
/// Default segment store StatefulSet name suffix
pub const DEFAULT_SEGMENT_STORE_STS_SUFFIX: &str = "pravega-segment-store";
/// Where the InfluxDB secret is mounted when no path is given
pub const DEFAULT_INFLUXDB_SECRET_MOUNT_PATH: &str = "/etc/influxdb-secret-volume";
/// Directory auth plugins are copied into when no path is given
pub const DEFAULT_AUTH_PLUGIN_MOUNT_PATH: &str = "/opt/pravega/pluginlib";

/// External access configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccess {
    /// Whether clients outside the cluster can reach the services
    #[serde(default)]
    pub enabled: bool,

    /// Service type used for external access (LoadBalancer or NodePort)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Domain used to publish external DNS names; ignored when disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
}

/// TLS configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct TlsPolicy {
    /// Keys and certificates provided by the user as secrets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#static: Option<StaticTls>,
}

/// Secret names for user-provided TLS material
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaticTls {
    /// Secret with the controller's key and certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_secret: Option<String>,
    /// Secret with the segment store's key and certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_secret: Option<String>,
    /// Secret with the CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

impl TlsPolicy {
    fn secret(&self, pick: impl Fn(&StaticTls) -> Option<&String>) -> Option<&str> {
        self.r#static
            .as_ref()
            .and_then(pick)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Controller TLS secret, if the controller is secured
    pub fn controller_secret(&self) -> Option<&str> {
        self.secret(|s| s.controller_secret.as_ref())
    }

    /// Segment store TLS secret, if the segment store is secured
    pub fn segment_store_secret(&self) -> Option<&str> {
        self.secret(|s| s.segment_store_secret.as_ref())
    }

    /// CA bundle secret, if one is configured
    pub fn ca_bundle(&self) -> Option<&str> {
        self.secret(|s| s.ca_bundle.as_ref())
    }
}

/// Authentication configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationParameters {
    /// Whether client authentication is enforced
    #[serde(default)]
    pub enabled: bool,

    /// Secret with password-based auth parameters (users, passwords, ACLs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_auth_secret: Option<String>,

    /// Secret with the controller token signing key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_token_secret: Option<String>,

    /// Secret with the segment store token signing key and auth token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_token_secret: Option<String>,
}

/// Container image
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image repository, without tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Kubernetes image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
}

/// Long-term (tier 2) storage backend; exactly one should be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct LongTermStorageSpec {
    /// Shared filesystem mounted from a claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FileSystemSpec>,
    /// ECS object storage through the extended S3 API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecs: Option<EcsSpec>,
    /// HDFS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdfs: Option<HdfsSpec>,
}

/// Filesystem tier 2
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemSpec {
    /// Claim providing the shared filesystem
    pub persistent_volume_claim: PersistentVolumeClaimVolumeSource,
}

/// ECS tier 2
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EcsSpec {
    /// ECS configuration URI
    #[serde(default)]
    pub config_uri: String,
    /// Bucket name
    #[serde(default)]
    pub bucket: String,
    /// Object key prefix
    #[serde(default)]
    pub prefix: String,
    /// Secret holding the access key id and secret key
    #[serde(default)]
    pub credentials: String,
}

/// HDFS tier 2
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HdfsSpec {
    /// Namenode URI
    #[serde(default)]
    pub uri: String,
    /// Root directory
    #[serde(default)]
    pub root: String,
    /// Replication factor
    #[serde(default)]
    pub replication_factor: i32,
}

/// Extra secret for the segment store, as environment or as a mount
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentStoreSecret {
    /// Secret name
    #[serde(default)]
    pub secret: String,
    /// Mount path; when empty the secret is exposed as environment
    #[serde(default)]
    pub mount_path: String,
}

/// Secret with InfluxDB credentials, mounted into both tiers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfluxDbSecret {
    /// Secret name; nothing is mounted when empty
    #[serde(default)]
    pub secret: String,
    /// Mount path inside the containers
    #[serde(default)]
    pub mount_path: String,
}

impl InfluxDbSecret {
    /// Secret name, if one is configured
    pub fn secret_name(&self) -> Option<&str> {
        Some(self.secret.trim()).filter(|s| !s.is_empty())
    }

    /// Mount path, defaulted
    pub fn mount_path(&self) -> &str {
        Some(self.mount_path.trim())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_INFLUXDB_SECRET_MOUNT_PATH)
    }
}

/// Timing of one probe; unset fields keep the tier's default
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    /// Seconds before the first check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    /// Seconds between checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    /// Consecutive failures before the probe fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
    /// Consecutive successes before the probe passes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
    /// Seconds a single check may take
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
}

impl ProbeConfig {
    /// Fields set here, the rest from `defaults`
    pub fn over(&self, defaults: ProbeConfig) -> ProbeConfig {
        ProbeConfig {
            initial_delay_seconds: self.initial_delay_seconds.or(defaults.initial_delay_seconds),
            period_seconds: self.period_seconds.or(defaults.period_seconds),
            failure_threshold: self.failure_threshold.or(defaults.failure_threshold),
            success_threshold: self.success_threshold.or(defaults.success_threshold),
            timeout_seconds: self.timeout_seconds.or(defaults.timeout_seconds),
        }
    }
}

/// Probe timings of one tier
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Probes {
    /// Readiness probe timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<ProbeConfig>,
    /// Liveness probe timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<ProbeConfig>,
}

/// Image carrying one auth plugin
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthHandlerSpec {
    /// Image holding the plugin
    #[serde(default)]
    pub image: String,
    /// Path of the plugin inside the image
    #[serde(default)]
    pub source: String,
}

/// Auth plugins copied into the controller before it starts
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthImplementationSpec {
    /// Directory the plugins are copied into
    #[serde(default)]
    pub mount_path: String,
    /// Plugins, copied in order
    #[serde(default)]
    pub auth_handlers: Vec<AuthHandlerSpec>,
}

impl AuthImplementationSpec {
    /// Plugin directory, defaulted
    pub fn mount_path(&self) -> &str {
        Some(self.mount_path.trim())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_AUTH_PLUGIN_MOUNT_PATH)
    }
}

/// Configuration of the controller and segment store tiers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PravegaSpec {
    /// Number of controller replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_replicas: Option<i32>,

    /// Number of segment store replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_replicas: Option<i32>,

    /// Enable DEBUG logging in both tiers
    #[serde(default)]
    pub debug_logging: bool,

    /// Image used by both tiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,

    /// Runtime options passed as `-Dkey=value` system properties
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    /// JVM options overriding the controller defaults
    #[serde(default, rename = "controllerjvmOptions")]
    pub controller_jvm_options: Vec<String>,

    /// JVM options overriding the segment store defaults
    #[serde(default, rename = "segmentStoreJVMOptions")]
    pub segment_store_jvm_options: Vec<String>,

    /// Per-replica cache claim, used by versions below 0.7.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_volume_claim_template: Option<PersistentVolumeClaimSpec>,

    /// Tier 2 storage
    #[serde(default, rename = "longtermStorage", skip_serializing_if = "Option::is_none")]
    pub long_term_storage: Option<LongTermStorageSpec>,

    /// Service account for controller pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_service_account_name: Option<String>,

    /// Service account for segment store pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_service_account_name: Option<String>,

    /// Controller container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_resources: Option<ResourceRequirements>,

    /// Segment store container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_resources: Option<ResourceRequirements>,

    /// Name of a ConfigMap exposed as extra segment store environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_env_vars: Option<String>,

    /// Extra segment store secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_secret: Option<SegmentStoreSecret>,

    /// Service type for the external controller service
    #[serde(default, rename = "controllerExtServiceType", skip_serializing_if = "Option::is_none")]
    pub controller_external_service_type: Option<String>,

    /// Annotations for the external controller service
    #[serde(default, rename = "controllerSvcAnnotations")]
    pub controller_service_annotations: BTreeMap<String, String>,

    /// Service type for the per-replica segment store services
    #[serde(
        default,
        rename = "segmentStoreExtServiceType",
        skip_serializing_if = "Option::is_none"
    )]
    pub segment_store_external_service_type: Option<String>,

    /// Annotations for the per-replica segment store services
    #[serde(default, rename = "segmentStoreSvcAnnotations")]
    pub segment_store_service_annotations: BTreeMap<String, String>,

    /// Fixed load balancer IP shared by the per-replica segment store services
    #[serde(default, rename = "segmentStoreLoadBalancerIP", skip_serializing_if = "Option::is_none")]
    pub segment_store_load_balancer_ip: Option<String>,

    /// External traffic policy for per-replica services (Local or Cluster)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_external_traffic_policy: Option<String>,

    /// Suffix of the controller service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_svc_name_suffix: Option<String>,

    /// Suffix of the segment store headless service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_headless_svc_name_suffix: Option<String>,

    /// Suffix of the segment store StatefulSet name (0.7.0 and later)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_sts_name_suffix: Option<String>,

    /// Extra labels on controller pods
    #[serde(default)]
    pub controller_pod_labels: BTreeMap<String, String>,

    /// Extra annotations on controller pods
    #[serde(default)]
    pub controller_pod_annotations: BTreeMap<String, String>,

    /// Extra labels on segment store pods
    #[serde(default)]
    pub segment_store_pod_labels: BTreeMap<String, String>,

    /// Extra annotations on segment store pods
    #[serde(default)]
    pub segment_store_pod_annotations: BTreeMap<String, String>,

    /// Scheduling affinity of controller pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_pod_affinity: Option<Affinity>,

    /// Scheduling affinity of segment store pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_pod_affinity: Option<Affinity>,

    /// Minimum available controller pods during voluntary disruption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_controller_replicas: Option<i32>,

    /// Maximum unavailable segment store pods during voluntary disruption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_segment_store_replicas: Option<i32>,

    /// Minutes a tier may make no progress before an upgrade is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_timeout: Option<i64>,

    /// InfluxDB credentials mounted into both tiers
    #[serde(default, rename = "influxDBSecret", skip_serializing_if = "Option::is_none")]
    pub influx_db_secret: Option<InfluxDbSecret>,

    /// Controller probe timings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_probes: Option<Probes>,

    /// Segment store probe timings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_probes: Option<Probes>,

    /// Pod security context of controller pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_security_context: Option<PodSecurityContext>,

    /// Pod security context of segment store pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_security_context: Option<PodSecurityContext>,

    /// Init containers run before the controller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controller_init_containers: Vec<Container>,

    /// Init containers run before the segment store
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segment_store_init_containers: Vec<Container>,

    /// Auth plugins installed into the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_implementations: Option<AuthImplementationSpec>,
}

fn non_empty<'a>(value: &'a Option<String>, default: &'a str) -> &'a str {
    value.as_deref().filter(|v| !v.is_empty()).unwrap_or(default)
}

impl PravegaSpec {
    /// Desired controller replicas
    pub fn controller_replicas(&self) -> i32 {
        self.controller_replicas
            .filter(|r| *r >= 1)
            .unwrap_or(DEFAULT_REPLICAS)
    }

    /// Desired segment store replicas
    pub fn segment_store_replicas(&self) -> i32 {
        self.segment_store_replicas
            .filter(|r| *r >= 1)
            .unwrap_or(DEFAULT_REPLICAS)
    }

    /// Controller disruption budget value
    pub fn max_unavailable_controller_replicas(&self) -> i32 {
        self.max_unavailable_controller_replicas
            .unwrap_or(DEFAULT_MAX_UNAVAILABLE)
    }

    /// Segment store disruption budget value
    pub fn max_unavailable_segment_store_replicas(&self) -> i32 {
        self.max_unavailable_segment_store_replicas
            .unwrap_or(DEFAULT_MAX_UNAVAILABLE)
    }

    /// Stall timeout of an upgrade step, in minutes
    pub fn rollback_timeout_minutes(&self) -> i64 {
        self.rollback_timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_ROLLBACK_TIMEOUT_MINUTES)
    }

    /// Controller service name suffix
    pub fn controller_svc_name_suffix(&self) -> &str {
        non_empty(&self.controller_svc_name_suffix, DEFAULT_CONTROLLER_SVC_SUFFIX)
    }

    /// Segment store headless service name suffix
    pub fn segment_store_headless_svc_name_suffix(&self) -> &str {
        non_empty(
            &self.segment_store_headless_svc_name_suffix,
            DEFAULT_SEGMENT_STORE_HEADLESS_SUFFIX,
        )
    }

    /// Segment store StatefulSet name suffix
    pub fn segment_store_sts_name_suffix(&self) -> &str {
        non_empty(
            &self.segment_store_sts_name_suffix,
            DEFAULT_SEGMENT_STORE_STS_SUFFIX,
        )
    }

    /// Segment store listener port from the runtime options
    ///
    /// Falls back to the default when the option is absent or not a number.
    pub fn listener_port(&self) -> i32 {
        self.options
            .get(LISTENER_PORT_OPTION)
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_LISTENER_PORT)
    }

    /// Image repository, defaulted
    pub fn image_repository(&self) -> &str {
        self.image
            .as_ref()
            .and_then(|i| i.repository.as_deref())
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_IMAGE_REPOSITORY)
    }

    /// Image pull policy, defaulted
    pub fn pull_policy(&self) -> &str {
        self.image
            .as_ref()
            .and_then(|i| i.pull_policy.as_deref())
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PULL_POLICY)
    }
}
