//! Defaulting of PravegaCluster specs
//!
//! `with_defaults` fills every unset field and reports whether anything
//! changed. The reconciler persists the defaulted object and requeues, so
//! the rest of the pipeline only ever sees complete specs.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodAffinityTerm,
    PodAntiAffinity, ResourceRequirements, VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use super::cluster::{
    PravegaCluster, DEFAULT_BOOKKEEPER_URI, DEFAULT_PRAVEGA_VERSION, DEFAULT_ZOOKEEPER_URI,
};
use super::naming::{CONTROLLER_COMPONENT, SEGMENT_STORE_COMPONENT};
use super::types::*;
use crate::version::{is_version_below, SEGMENT_STORE_RENAME_VERSION};

/// Size of the per-replica cache claim used below 0.7.0
pub const DEFAULT_CACHE_VOLUME_SIZE: &str = "20Gi";

fn resource_list(cpu: &str, memory: &str) -> BTreeMap<String, Quantity> {
    BTreeMap::from([
        ("cpu".to_string(), Quantity(cpu.to_string())),
        ("memory".to_string(), Quantity(memory.to_string())),
    ])
}

/// Resources given to controller pods when none are requested
pub fn default_controller_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(resource_list("250m", "512Mi")),
        limits: Some(resource_list("500m", "1Gi")),
        ..Default::default()
    }
}

/// Resources given to segment store pods when none are requested
pub fn default_segment_store_resources() -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(resource_list("500m", "1Gi")),
        limits: Some(resource_list("1", "2Gi")),
        ..Default::default()
    }
}

/// Per-replica cache claim used below 0.7.0
pub fn default_cache_claim() -> PersistentVolumeClaimSpec {
    PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(DEFAULT_CACHE_VOLUME_SIZE.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Spread pods of one tier of one cluster across nodes, preferably
pub fn pod_anti_affinity(component: &str, cluster_name: &str) -> Affinity {
    let requirement = |key: &str, value: &str| LabelSelectorRequirement {
        key: key.to_string(),
        operator: "In".to_string(),
        values: Some(vec![value.to_string()]),
    };

    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(vec![
                                requirement("component", component),
                                requirement("pravega_cluster", cluster_name),
                            ]),
                            ..Default::default()
                        }),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn default_long_term_storage() -> LongTermStorageSpec {
    LongTermStorageSpec {
        filesystem: Some(FileSystemSpec {
            persistent_volume_claim: PersistentVolumeClaimVolumeSource {
                claim_name: DEFAULT_LTS_CLAIM_NAME.to_string(),
                ..Default::default()
            },
        }),
        ..Default::default()
    }
}

/// Set `slot` to `value` if it is `None`; true when it did
fn fill<T>(slot: &mut Option<T>, value: impl FnOnce() -> T) -> bool {
    if slot.is_none() {
        *slot = Some(value());
        true
    } else {
        false
    }
}

/// Set an empty or missing string to `value`; true when it did
fn fill_str(slot: &mut Option<String>, value: &str) -> bool {
    if slot.as_deref().is_none_or(str::is_empty) {
        *slot = Some(value.to_string());
        true
    } else {
        false
    }
}

fn fill_string(slot: &mut String, value: &str) -> bool {
    if slot.is_empty() {
        *slot = value.to_string();
        true
    } else {
        false
    }
}

impl ExternalAccess {
    /// Clear type and domain when external access is off
    fn with_defaults(&mut self) -> bool {
        if !self.enabled && (self.type_.is_some() || self.domain_name.is_some()) {
            self.type_ = None;
            self.domain_name = None;
            return true;
        }
        false
    }
}

impl PravegaSpec {
    fn with_defaults(&mut self, cluster_name: &str, version: &str) -> bool {
        let mut changed = false;

        if self.controller_replicas.is_none_or(|r| r < 1) {
            self.controller_replicas = Some(DEFAULT_REPLICAS);
            changed = true;
        }
        if self.segment_store_replicas.is_none_or(|r| r < 1) {
            self.segment_store_replicas = Some(DEFAULT_REPLICAS);
            changed = true;
        }

        let image = self.image.get_or_insert_with(|| {
            changed = true;
            ImageSpec::default()
        });
        changed |= fill_str(&mut image.repository, DEFAULT_IMAGE_REPOSITORY);
        changed |= fill_str(&mut image.pull_policy, DEFAULT_PULL_POLICY);

        changed |= fill(&mut self.long_term_storage, default_long_term_storage);
        changed |= fill(&mut self.controller_resources, default_controller_resources);
        changed |= fill(&mut self.segment_store_resources, default_segment_store_resources);
        changed |= fill(&mut self.segment_store_secret, SegmentStoreSecret::default);

        changed |= fill_str(
            &mut self.controller_svc_name_suffix,
            DEFAULT_CONTROLLER_SVC_SUFFIX,
        );
        changed |= fill_str(
            &mut self.segment_store_headless_svc_name_suffix,
            DEFAULT_SEGMENT_STORE_HEADLESS_SUFFIX,
        );
        changed |= fill_str(
            &mut self.segment_store_sts_name_suffix,
            DEFAULT_SEGMENT_STORE_STS_SUFFIX,
        );

        changed |= fill(&mut self.max_unavailable_controller_replicas, || {
            DEFAULT_MAX_UNAVAILABLE
        });
        changed |= fill(&mut self.max_unavailable_segment_store_replicas, || {
            DEFAULT_MAX_UNAVAILABLE
        });
        changed |= fill(&mut self.rollback_timeout, || DEFAULT_ROLLBACK_TIMEOUT_MINUTES);

        changed |= fill(&mut self.controller_pod_affinity, || {
            pod_anti_affinity(CONTROLLER_COMPONENT, cluster_name)
        });
        changed |= fill(&mut self.segment_store_pod_affinity, || {
            pod_anti_affinity(SEGMENT_STORE_COMPONENT, cluster_name)
        });

        if is_version_below(version, SEGMENT_STORE_RENAME_VERSION) {
            changed |= fill(&mut self.cache_volume_claim_template, default_cache_claim);
        }

        if let Some(influx) = self.influx_db_secret.as_mut() {
            if influx.secret_name().is_some() && influx.mount_path.trim().is_empty() {
                influx.mount_path = DEFAULT_INFLUXDB_SECRET_MOUNT_PATH.to_string();
                changed = true;
            }
        }

        changed
    }
}

impl PravegaCluster {
    /// Fill every unset field with its default
    ///
    /// Returns true if anything changed. Calling it again on the result
    /// returns false and leaves the object untouched.
    pub fn with_defaults(&mut self) -> bool {
        let name = self.cluster_name().to_string();
        let spec = &mut self.spec;
        let mut changed = false;

        changed |= fill_string(&mut spec.zookeeper_uri, DEFAULT_ZOOKEEPER_URI);
        changed |= fill_string(&mut spec.bookkeeper_uri, DEFAULT_BOOKKEEPER_URI);
        changed |= fill_string(&mut spec.version, DEFAULT_PRAVEGA_VERSION);

        changed |= fill(&mut spec.external_access, ExternalAccess::default);
        if let Some(external) = spec.external_access.as_mut() {
            changed |= external.with_defaults();
        }

        changed |= fill(&mut spec.tls, || TlsPolicy {
            r#static: Some(StaticTls::default()),
        });
        changed |= fill(&mut spec.authentication, AuthenticationParameters::default);

        let pravega = spec.pravega.get_or_insert_with(|| {
            changed = true;
            PravegaSpec::default()
        });
        changed |= pravega.with_defaults(&name, &spec.version);

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::cluster::PravegaClusterSpec;

    fn empty_cluster(version: &str) -> PravegaCluster {
        PravegaCluster::new(
            "bar",
            PravegaClusterSpec {
                version: version.to_string(),
                ..Default::default()
            },
        )
    }

    /// Story: a bare cluster gets a complete, runnable spec
    #[test]
    fn story_bare_cluster_is_completed() {
        let mut cluster = empty_cluster("");
        assert!(cluster.with_defaults());

        let spec = &cluster.spec;
        assert_eq!(spec.version, DEFAULT_PRAVEGA_VERSION);
        assert_eq!(spec.zookeeper_uri, "zookeeper-client:2181");
        assert!(spec.bookkeeper_uri.contains(":3181"));

        let pravega = spec.pravega();
        assert_eq!(pravega.controller_replicas, Some(1));
        assert_eq!(pravega.segment_store_replicas, Some(1));
        assert_eq!(pravega.pull_policy(), "Always");
        assert_eq!(pravega.rollback_timeout, Some(10));
        assert_eq!(
            pravega.segment_store_sts_name_suffix.as_deref(),
            Some("pravega-segment-store")
        );
        assert_eq!(
            pravega.segment_store_resources,
            Some(default_segment_store_resources())
        );
        assert!(pravega.cache_volume_claim_template.is_none());
        assert!(pravega.controller_pod_affinity.is_some());
    }

    /// Story: defaulting twice changes nothing the second time
    #[test]
    fn story_defaulting_is_idempotent() {
        let mut cluster = empty_cluster("0.6.0");
        assert!(cluster.with_defaults());
        let once = cluster.spec.clone();

        assert!(!cluster.with_defaults());
        assert_eq!(cluster.spec, once);
    }

    #[test]
    fn legacy_versions_get_a_cache_claim() {
        let mut cluster = empty_cluster("0.6.0");
        cluster.with_defaults();
        assert_eq!(
            cluster.spec.pravega().cache_volume_claim_template,
            Some(default_cache_claim())
        );
    }

    #[test]
    fn disabled_external_access_drops_type_and_domain() {
        let mut cluster = empty_cluster("0.9.0");
        cluster.spec.external_access = Some(ExternalAccess {
            enabled: false,
            type_: Some("NodePort".to_string()),
            domain_name: Some("example.com".to_string()),
        });
        cluster.with_defaults();
        assert_eq!(cluster.spec.external_access, Some(ExternalAccess::default()));
    }

    #[test]
    fn user_values_are_kept() {
        let mut cluster = empty_cluster("0.9.0");
        cluster.spec.pravega = Some(PravegaSpec {
            segment_store_replicas: Some(3),
            rollback_timeout: Some(30),
            ..Default::default()
        });
        cluster.with_defaults();
        assert_eq!(cluster.spec.pravega().segment_store_replicas, Some(3));
        assert_eq!(cluster.spec.pravega().rollback_timeout, Some(30));
    }

    #[test]
    fn influx_secret_gets_a_mount_path() {
        let mut cluster = empty_cluster("0.9.0");
        cluster.spec.pravega = Some(PravegaSpec {
            influx_db_secret: Some(InfluxDbSecret {
                secret: "influxdb-secret".to_string(),
                mount_path: String::new(),
            }),
            ..Default::default()
        });

        assert!(cluster.with_defaults());
        assert!(!cluster.with_defaults());
        assert_eq!(
            cluster.spec.pravega().influx_db_secret.as_ref().map(|s| s.mount_path.as_str()),
            Some("/etc/influxdb-secret-volume")
        );
    }

    #[test]
    fn zero_replicas_are_raised_to_one() {
        let mut cluster = empty_cluster("0.9.0");
        cluster.spec.pravega = Some(PravegaSpec {
            controller_replicas: Some(0),
            ..Default::default()
        });
        cluster.with_defaults();
        assert_eq!(cluster.spec.pravega().controller_replicas, Some(1));
    }

    #[test]
    fn anti_affinity_targets_tier_and_cluster() {
        let affinity = pod_anti_affinity("pravega-controller", "bar");
        let terms = affinity
            .pod_anti_affinity
            .and_then(|a| a.preferred_during_scheduling_ignored_during_execution)
            .unwrap();
        assert_eq!(terms[0].weight, 100);
        let exprs = terms[0]
            .pod_affinity_term
            .label_selector
            .as_ref()
            .and_then(|s| s.match_expressions.clone())
            .unwrap();
        assert_eq!(exprs[0].values, Some(vec!["pravega-controller".to_string()]));
        assert_eq!(exprs[1].values, Some(vec!["bar".to_string()]));
    }
}
