//! Segment store tier: StatefulSet, Services and PodDisruptionBudget
//!
//! Names, the cache claim and probe commands depend on the version being
//! rendered. Callers that need another version's objects (cross-era upgrade
//! and rollback) render a copy of the cluster retargeted with
//! [`at_version`].

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, EnvVar, EnvVarSource,
    ObjectFieldSelector, PersistentVolumeClaim, PodSpec, PodTemplateSpec, SecretEnvSource,
    Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use pravega_common::crd::{
    default_cache_claim, default_segment_store_resources, PravegaCluster, ProbeConfig,
    SEGMENT_STORE_COMPONENT, SEGMENT_STORE_REST_PORT,
};
use pravega_common::version::{is_version_below, NamingEra, HEALTHCHECK_VERSION};
use pravega_common::Result;

use super::config::TIER2_MOUNT_DIR;
use super::{
    child_meta, health_check, influx_db_secret, listening_check, liveness_command,
    option_volumes, secret_volume, timed_probe, TLS_MOUNT_DIR, TLS_VOLUME_NAME,
};

/// Name of the segment store container
pub const CONTAINER_NAME: &str = SEGMENT_STORE_COMPONENT;
/// Name of the per-replica cache claim template used by the legacy era
pub const CACHE_VOLUME_NAME: &str = "cache";
/// Label the StatefulSet controller puts on each pod with its name
pub const POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";
/// Annotation read by external-dns
pub const EXTERNAL_DNS_ANNOTATION: &str = "external-dns.alpha.kubernetes.io/hostname";

const CACHE_MOUNT_DIR: &str = "/tmp/pravega/cache";
const TIER2_VOLUME_NAME: &str = "tier2";
const SECRET_VOLUME_NAME: &str = "ss-secret";
const CA_BUNDLE_VOLUME_NAME: &str = "ca-bundle";
const CA_BUNDLE_MOUNT_DIR: &str = "/etc/secret-volume/ca-bundle";
const TOKEN_VOLUME_NAME: &str = "ss-auth-secret";
const TOKEN_MOUNT_DIR: &str = "/etc/ss-auth-volume";

/// Readiness timing unless the cluster overrides it
///
/// External access may hold a replica back until its address is assigned,
/// so readiness is allowed five minutes.
pub const READINESS_DEFAULTS: ProbeConfig = ProbeConfig {
    initial_delay_seconds: None,
    period_seconds: Some(10),
    failure_threshold: Some(30),
    success_threshold: None,
    timeout_seconds: None,
};

/// Liveness timing unless the cluster overrides it
pub const LIVENESS_DEFAULTS: ProbeConfig = ProbeConfig {
    initial_delay_seconds: Some(300),
    period_seconds: Some(15),
    failure_threshold: Some(4),
    success_threshold: None,
    timeout_seconds: None,
};

/// Copy of `cluster` whose spec targets `version`
pub fn at_version(cluster: &PravegaCluster, version: &str) -> PravegaCluster {
    let mut retargeted = cluster.clone();
    retargeted.spec.version = version.to_string();
    retargeted
}

/// Readiness command of the segment store container
pub fn readiness_command(version: &str, listener_port: i32) -> String {
    if is_version_below(version, HEALTHCHECK_VERSION) {
        listening_check(listener_port)
    } else {
        health_check(SEGMENT_STORE_REST_PORT, "readiness")
    }
}

fn env_from(cluster: &PravegaCluster) -> Vec<EnvFromSource> {
    let pravega = cluster.spec.pravega();
    let config_map = |name: String| EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name,
            ..Default::default()
        }),
        ..Default::default()
    };
    let secret = |name: String, prefix: Option<String>| EnvFromSource {
        prefix,
        secret_ref: Some(SecretEnvSource {
            name,
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut sources = vec![config_map(cluster.segment_store_config_map_name())];
    if let Some(env_vars) = pravega
        .segment_store_env_vars
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        sources.push(config_map(env_vars.to_string()));
    }
    if let Some(ss_secret) = pravega.segment_store_secret.as_ref() {
        let name = ss_secret.secret.trim();
        if !name.is_empty() && ss_secret.mount_path.trim().is_empty() {
            sources.push(secret(name.to_string(), None));
        }
    }
    if let Some(ecs) = pravega
        .long_term_storage
        .as_ref()
        .and_then(|lts| lts.ecs.as_ref())
    {
        sources.push(secret(
            ecs.credentials.clone(),
            Some("EXTENDEDS3_".to_string()),
        ));
    }
    sources
}

fn downward_api_env() -> Vec<EnvVar> {
    let field = |name: &str, path: &str| EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: path.to_string(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    vec![
        field("POD_NAME", "metadata.name"),
        field("POD_NAMESPACE", "metadata.namespace"),
    ]
}

fn volumes(cluster: &PravegaCluster) -> (Vec<Volume>, Vec<VolumeMount>) {
    let spec = &cluster.spec;
    let pravega = spec.pravega();
    let (mut volumes, mut mounts) = option_volumes(&pravega.options);

    if NamingEra::for_version(&spec.version) == NamingEra::Legacy {
        mounts.push(VolumeMount {
            name: CACHE_VOLUME_NAME.to_string(),
            mount_path: CACHE_MOUNT_DIR.to_string(),
            ..Default::default()
        });
    }

    let mut secrets: Vec<(&str, String, String)> = Vec::new();
    if let Some(ss_secret) = pravega.segment_store_secret.as_ref() {
        let (name, path) = (ss_secret.secret.trim(), ss_secret.mount_path.trim());
        if !name.is_empty() && !path.is_empty() {
            secrets.push((SECRET_VOLUME_NAME, name.to_string(), path.to_string()));
        }
    }
    if let Some(secret) = spec.tls().and_then(|t| t.segment_store_secret()) {
        secrets.push((TLS_VOLUME_NAME, secret.to_string(), TLS_MOUNT_DIR.to_string()));
    }
    if let Some(bundle) = spec.tls().and_then(|t| t.ca_bundle()) {
        secrets.push((
            CA_BUNDLE_VOLUME_NAME,
            bundle.to_string(),
            CA_BUNDLE_MOUNT_DIR.to_string(),
        ));
    }
    for (name, secret, path) in &secrets {
        let (volume, mount) = secret_volume(name, secret, path);
        volumes.push(volume);
        mounts.push(mount);
    }

    if let Some(fs) = pravega
        .long_term_storage
        .as_ref()
        .and_then(|lts| lts.filesystem.as_ref())
    {
        volumes.push(Volume {
            name: TIER2_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(fs.persistent_volume_claim.clone()),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: TIER2_VOLUME_NAME.to_string(),
            mount_path: TIER2_MOUNT_DIR.to_string(),
            ..Default::default()
        });
    }

    if let Some(token) = spec
        .authentication
        .as_ref()
        .and_then(|a| a.segment_store_token_secret.as_deref())
        .filter(|s| !s.is_empty())
    {
        let (volume, mount) = secret_volume(TOKEN_VOLUME_NAME, token, TOKEN_MOUNT_DIR);
        volumes.push(volume);
        mounts.push(mount);
    }

    (volumes, mounts)
}

/// Desired segment store pod template
pub fn pod_template(cluster: &PravegaCluster) -> PodTemplateSpec {
    let spec = &cluster.spec;
    let pravega = spec.pravega();
    let port = pravega.listener_port();
    let (mut volumes, mut mounts) = volumes(cluster);

    let mut env = downward_api_env();
    if let Some((volume, mount, var)) = influx_db_secret(pravega) {
        volumes.push(volume);
        mounts.push(mount);
        env.push(var);
    }

    let probes = pravega.segment_store_probes.as_ref();
    let readiness = timed_probe(
        readiness_command(&spec.version, port),
        probes
            .and_then(|p| p.readiness_probe)
            .map_or(READINESS_DEFAULTS, |p| p.over(READINESS_DEFAULTS)),
    );
    let liveness = timed_probe(
        liveness_command(&spec.version, port, SEGMENT_STORE_REST_PORT),
        probes
            .and_then(|p| p.liveness_probe)
            .map_or(LIVENESS_DEFAULTS, |p| p.over(LIVENESS_DEFAULTS)),
    );

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(cluster.image()),
        image_pull_policy: Some(pravega.pull_policy().to_string()),
        args: Some(vec!["segmentstore".to_string()]),
        ports: Some(vec![ContainerPort {
            name: Some("server".to_string()),
            container_port: port,
            ..Default::default()
        }]),
        env_from: Some(env_from(cluster)),
        env: Some(env),
        volume_mounts: Some(mounts),
        resources: Some(
            pravega
                .segment_store_resources
                .clone()
                .unwrap_or_else(default_segment_store_resources),
        ),
        readiness_probe: Some(readiness),
        liveness_probe: Some(liveness),
        ..Default::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(cluster.segment_store_labels()),
            annotations: Some(cluster.segment_store_annotations()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            affinity: pravega.segment_store_pod_affinity.clone(),
            service_account_name: pravega
                .segment_store_service_account_name
                .clone()
                .filter(|s| !s.is_empty()),
            security_context: pravega.segment_store_security_context.clone(),
            init_containers: Some(pravega.segment_store_init_containers.clone())
                .filter(|c| !c.is_empty()),
            volumes: Some(volumes),
            ..Default::default()
        }),
    }
}

/// Desired segment store StatefulSet for the cluster's spec version
pub fn stateful_set(cluster: &PravegaCluster) -> Result<StatefulSet> {
    let pravega = cluster.spec.pravega();
    let labels = cluster.segment_store_labels();

    let volume_claim_templates =
        (NamingEra::for_version(&cluster.spec.version) == NamingEra::Legacy).then(|| {
            vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(CACHE_VOLUME_NAME.to_string()),
                    namespace: Some(cluster.cluster_namespace().to_string()),
                    ..Default::default()
                },
                spec: Some(
                    pravega
                        .cache_volume_claim_template
                        .clone()
                        .unwrap_or_else(default_cache_claim),
                ),
                ..Default::default()
            }]
        });

    Ok(StatefulSet {
        metadata: child_meta(cluster, cluster.segment_store_sts_name(), Some(labels.clone()))?,
        spec: Some(StatefulSetSpec {
            service_name: Some(cluster.segment_store_headless_service_name()),
            replicas: Some(pravega.segment_store_replicas()),
            pod_management_policy: Some("OrderedReady".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template: pod_template(cluster),
            volume_claim_templates,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Desired headless Service backing the StatefulSet
pub fn headless_service(cluster: &PravegaCluster) -> Result<Service> {
    let labels = cluster.segment_store_labels();
    Ok(Service {
        metadata: child_meta(
            cluster,
            cluster.segment_store_headless_service_name(),
            Some(labels.clone()),
        )?,
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("server".to_string()),
                port: cluster.spec.pravega().listener_port(),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            selector: Some(labels),
            cluster_ip: Some("None".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// external-dns hostname for a per-replica Service
fn dns_hostname(service_name: &str, domain: &str) -> String {
    let domain = domain.trim();
    if domain.ends_with('.') {
        format!("{service_name}.{domain}")
    } else {
        format!("{service_name}.{domain}.")
    }
}

/// Desired per-replica external Service for replica `ordinal`
pub fn external_service(cluster: &PravegaCluster, ordinal: i32) -> Result<Service> {
    let spec = &cluster.spec;
    let pravega = spec.pravega();
    let name = cluster.segment_store_service_name(ordinal);

    let mut annotations = pravega.segment_store_service_annotations.clone();
    if let Some(domain) = spec.external_domain() {
        annotations.insert(
            EXTERNAL_DNS_ANNOTATION.to_string(),
            dns_hostname(&name, domain),
        );
    }

    let traffic_policy = match pravega.segment_store_external_traffic_policy.as_deref() {
        Some(policy) if policy.eq_ignore_ascii_case("cluster") => "Cluster",
        _ => "Local",
    };

    let listener = pravega.listener_port();
    let load_balancer_ip = pravega
        .segment_store_load_balancer_ip
        .clone()
        .filter(|ip| !ip.is_empty());
    // A shared load balancer IP needs a distinct port per replica
    let port = if load_balancer_ip.is_some() {
        listener + ordinal
    } else {
        listener
    };

    let mut meta = child_meta(cluster, name, Some(cluster.segment_store_labels()))?;
    meta.annotations = Some(annotations);

    Ok(Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            type_: Some(spec.segment_store_external_service_type().to_string()),
            ports: Some(vec![ServicePort {
                name: Some("server".to_string()),
                port,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(listener)),
                ..Default::default()
            }]),
            external_traffic_policy: Some(traffic_policy.to_string()),
            load_balancer_ip,
            selector: Some(BTreeMap::from([(
                POD_NAME_LABEL.to_string(),
                format!("{}-{}", cluster.segment_store_sts_name(), ordinal),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Desired per-replica external Services, empty when external access is off
pub fn external_services(cluster: &PravegaCluster) -> Result<Vec<Service>> {
    if !cluster.spec.external_access_enabled() {
        return Ok(Vec::new());
    }
    (0..cluster.spec.pravega().segment_store_replicas())
        .map(|i| external_service(cluster, i))
        .collect()
}

/// Desired segment store PodDisruptionBudget
pub fn pod_disruption_budget(cluster: &PravegaCluster) -> Result<PodDisruptionBudget> {
    let pravega = cluster.spec.pravega();
    let max_unavailable = if pravega.segment_store_replicas() == 1 {
        0
    } else {
        pravega.max_unavailable_segment_store_replicas()
    };
    Ok(PodDisruptionBudget {
        metadata: child_meta(cluster, cluster.segment_store_pdb_name(), None)?,
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(max_unavailable)),
            selector: Some(LabelSelector {
                match_labels: Some(cluster.segment_store_labels()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PodSecurityContext;
    use pravega_common::crd::{
        AuthenticationParameters, EcsSpec, ExternalAccess, InfluxDbSecret, LongTermStorageSpec,
        PravegaSpec, Probes, SegmentStoreSecret, StaticTls, TlsPolicy,
    };

    use super::super::fixtures;
    use super::*;

    fn container(sts: &StatefulSet) -> &Container {
        &sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    fn mount_paths(sts: &StatefulSet) -> BTreeMap<String, String> {
        container(sts)
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .map(|m| (m.name.clone(), m.mount_path.clone()))
            .collect()
    }

    fn with_external_access(mut cluster: PravegaCluster, domain: Option<&str>) -> PravegaCluster {
        cluster.spec.external_access = Some(ExternalAccess {
            enabled: true,
            type_: Some("LoadBalancer".to_string()),
            domain_name: domain.map(str::to_string),
        });
        cluster
    }

    mod stateful_set {
        use super::*;

        #[test]
        fn modern_shape() {
            let cluster = fixtures::cluster("0.9.0");
            let sts = stateful_set(&cluster).unwrap();
            let spec = sts.spec.as_ref().unwrap();

            assert_eq!(sts.metadata.name.as_deref(), Some("bar-pravega-segment-store"));
            assert_eq!(
                spec.service_name.as_deref(),
                Some("bar-pravega-segmentstore-headless")
            );
            assert_eq!(spec.pod_management_policy.as_deref(), Some("OrderedReady"));
            assert_eq!(
                spec.update_strategy.as_ref().and_then(|u| u.type_.as_deref()),
                Some("OnDelete")
            );
            assert!(spec.volume_claim_templates.is_none());

            let c = container(&sts);
            assert_eq!(c.name, "pravega-segmentstore");
            assert_eq!(c.args, Some(vec!["segmentstore".to_string()]));
            assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 12345);
            let env = c.env.as_ref().unwrap();
            assert_eq!(env[0].name, "POD_NAME");
            assert_eq!(env[1].name, "POD_NAMESPACE");

            let mounts = mount_paths(&sts);
            assert_eq!(mounts["tier2"], "/mnt/tier2");
            assert!(!mounts.contains_key("cache"));
        }

        #[test]
        fn legacy_era_has_cache_claim() {
            let cluster = fixtures::cluster("0.6.1");
            let sts = stateful_set(&cluster).unwrap();
            let spec = sts.spec.as_ref().unwrap();

            assert_eq!(sts.metadata.name.as_deref(), Some("bar-pravega-segmentstore"));
            let claims = spec.volume_claim_templates.as_ref().unwrap();
            assert_eq!(claims[0].metadata.name.as_deref(), Some("cache"));
            assert_eq!(mount_paths(&sts)["cache"], "/tmp/pravega/cache");
        }

        #[test]
        fn retargeted_copy_renders_other_era() {
            let cluster = fixtures::cluster("0.9.0");
            let legacy = stateful_set(&at_version(&cluster, "0.6.1")).unwrap();
            assert_eq!(legacy.metadata.name.as_deref(), Some("bar-pravega-segmentstore"));
            assert_eq!(
                container(&legacy).image.as_deref(),
                Some("pravega/pravega:0.6.1")
            );
            assert!(legacy.spec.unwrap().volume_claim_templates.is_some());
        }

        #[test]
        fn env_sources_in_order() {
            let cluster = fixtures::cluster_with(
                "0.9.0",
                PravegaSpec {
                    segment_store_env_vars: Some(" extra-env ".to_string()),
                    segment_store_secret: Some(SegmentStoreSecret {
                        secret: "ss-creds".to_string(),
                        mount_path: String::new(),
                    }),
                    long_term_storage: Some(LongTermStorageSpec {
                        ecs: Some(EcsSpec {
                            credentials: "ecs-creds".to_string(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            );
            let sts = stateful_set(&cluster).unwrap();
            let sources = container(&sts).env_from.clone().unwrap();

            assert_eq!(sources.len(), 4);
            assert_eq!(
                sources[0].config_map_ref.as_ref().unwrap().name,
                "bar-pravega-segmentstore"
            );
            assert_eq!(sources[1].config_map_ref.as_ref().unwrap().name, "extra-env");
            assert_eq!(sources[2].secret_ref.as_ref().unwrap().name, "ss-creds");
            assert_eq!(sources[3].secret_ref.as_ref().unwrap().name, "ecs-creds");
            assert_eq!(sources[3].prefix.as_deref(), Some("EXTENDEDS3_"));
            assert!(!mount_paths(&sts).contains_key("tier2"));
        }

        #[test]
        fn secrets_mounted_when_configured() {
            let mut cluster = fixtures::cluster_with(
                "0.9.0",
                PravegaSpec {
                    segment_store_secret: Some(SegmentStoreSecret {
                        secret: "ss-creds".to_string(),
                        mount_path: "/etc/ss".to_string(),
                    }),
                    ..Default::default()
                },
            );
            cluster.spec.tls = Some(TlsPolicy {
                r#static: Some(StaticTls {
                    segment_store_secret: Some("ss-tls".to_string()),
                    ca_bundle: Some("ca".to_string()),
                    ..Default::default()
                }),
            });
            cluster.spec.authentication = Some(AuthenticationParameters {
                segment_store_token_secret: Some("token".to_string()),
                ..Default::default()
            });

            let sts = stateful_set(&cluster).unwrap();
            let mounts = mount_paths(&sts);
            assert_eq!(mounts["ss-secret"], "/etc/ss");
            assert_eq!(mounts["tls-secret"], "/etc/secret-volume");
            assert_eq!(mounts["ca-bundle"], "/etc/secret-volume/ca-bundle");
            assert_eq!(mounts["ss-auth-secret"], "/etc/ss-auth-volume");
            assert_eq!(container(&sts).env_from.as_ref().unwrap().len(), 1);
        }

        #[test]
        fn influx_secret_follows_downward_api_env() {
            let cluster = fixtures::cluster_with(
                "0.9.0",
                PravegaSpec {
                    influx_db_secret: Some(InfluxDbSecret {
                        secret: "influxdb-secret".to_string(),
                        mount_path: "/etc/influx".to_string(),
                    }),
                    ..Default::default()
                },
            );

            let sts = stateful_set(&cluster).unwrap();
            assert_eq!(mount_paths(&sts)["influxdb-secret"], "/etc/influx");
            let env = container(&sts).env.as_ref().unwrap();
            assert_eq!(env.len(), 3);
            assert_eq!(env[2].name, "INFLUX_DB_SECRET_MOUNT_PATH");
            assert_eq!(env[2].value.as_deref(), Some("/etc/influx"));
        }

        #[test]
        fn probe_timing_defaults_and_overrides() {
            let sts = stateful_set(&fixtures::cluster("0.9.0")).unwrap();
            let readiness = container(&sts).readiness_probe.clone().unwrap();
            assert_eq!(readiness.period_seconds, Some(10));
            assert_eq!(readiness.failure_threshold, Some(30));
            let liveness = container(&sts).liveness_probe.clone().unwrap();
            assert_eq!(liveness.initial_delay_seconds, Some(300));

            let cluster = fixtures::cluster_with(
                "0.9.0",
                PravegaSpec {
                    segment_store_probes: Some(Probes {
                        readiness_probe: Some(ProbeConfig {
                            failure_threshold: Some(60),
                            ..Default::default()
                        }),
                        liveness_probe: None,
                    }),
                    ..Default::default()
                },
            );
            let sts = stateful_set(&cluster).unwrap();
            let readiness = container(&sts).readiness_probe.clone().unwrap();
            assert_eq!(readiness.failure_threshold, Some(60));
            assert_eq!(readiness.period_seconds, Some(10));
            let liveness = container(&sts).liveness_probe.clone().unwrap();
            assert_eq!(liveness.initial_delay_seconds, Some(300));
        }

        #[test]
        fn security_context_and_init_containers() {
            let cluster = fixtures::cluster_with(
                "0.9.0",
                PravegaSpec {
                    segment_store_security_context: Some(PodSecurityContext {
                        fs_group: Some(2000),
                        ..Default::default()
                    }),
                    segment_store_init_containers: vec![Container {
                        name: "testing".to_string(),
                        image: Some("dummy-image".to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                },
            );

            let sts = stateful_set(&cluster).unwrap();
            let pod = sts.spec.unwrap().template.spec.unwrap();
            assert_eq!(pod.security_context.and_then(|s| s.fs_group), Some(2000));
            assert_eq!(pod.init_containers.unwrap()[0].name, "testing");

            let plain = stateful_set(&fixtures::cluster("0.9.0")).unwrap();
            let pod = plain.spec.unwrap().template.spec.unwrap();
            assert!(pod.security_context.is_none());
            assert!(pod.init_containers.is_none());
        }

        #[test]
        fn probes_follow_version() {
            assert_eq!(
                readiness_command("0.9.0", 12345),
                "netstat -ltn 2> /dev/null | grep 12345 || ss -ltn 2> /dev/null | grep 12345"
            );
            assert!(readiness_command("0.10.0", 12345)
                .contains("http://localhost:6061/v1/health/readiness"));
        }
    }

    mod services {
        use super::*;

        #[test]
        fn headless_service_has_no_cluster_ip() {
            let cluster = fixtures::cluster("0.9.0");
            let svc = headless_service(&cluster).unwrap();
            let spec = svc.spec.unwrap();
            assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
            assert_eq!(spec.ports.unwrap()[0].port, 12345);
        }

        #[test]
        fn no_external_services_without_external_access() {
            let cluster = fixtures::cluster("0.9.0");
            assert!(external_services(&cluster).unwrap().is_empty());
        }

        #[test]
        fn external_service_per_replica() {
            let mut cluster = with_external_access(fixtures::cluster("0.9.0"), Some("example.com"));
            cluster.spec.pravega.as_mut().unwrap().segment_store_replicas = Some(2);
            let services = external_services(&cluster).unwrap();

            assert_eq!(services.len(), 2);
            let svc = &services[1];
            assert_eq!(svc.metadata.name.as_deref(), Some("bar-pravega-segment-store-1"));
            assert_eq!(
                svc.metadata.annotations.as_ref().unwrap()[EXTERNAL_DNS_ANNOTATION],
                "bar-pravega-segment-store-1.example.com."
            );
            let spec = svc.spec.as_ref().unwrap();
            assert_eq!(spec.external_traffic_policy.as_deref(), Some("Local"));
            assert_eq!(
                spec.selector.as_ref().unwrap()[POD_NAME_LABEL],
                "bar-pravega-segment-store-1"
            );
            assert_eq!(spec.ports.as_ref().unwrap()[0].port, 12345);
        }

        #[test]
        fn dns_domain_with_trailing_dot() {
            assert_eq!(dns_hostname("svc-0", " example.com. "), "svc-0.example.com.");
        }

        #[test]
        fn shared_load_balancer_ip_offsets_port() {
            let mut cluster = with_external_access(fixtures::cluster("0.9.0"), None);
            let pravega = cluster.spec.pravega.as_mut().unwrap();
            pravega.segment_store_load_balancer_ip = Some("10.0.0.1".to_string());
            pravega.segment_store_external_traffic_policy = Some("cluster".to_string());

            let svc = external_service(&cluster, 2).unwrap();
            let spec = svc.spec.unwrap();
            assert_eq!(spec.ports.unwrap()[0].port, 12347);
            assert_eq!(spec.load_balancer_ip.as_deref(), Some("10.0.0.1"));
            assert_eq!(spec.external_traffic_policy.as_deref(), Some("Cluster"));
            assert!(svc
                .metadata
                .annotations
                .unwrap()
                .get(EXTERNAL_DNS_ANNOTATION)
                .is_none());
        }
    }

    #[test]
    fn pdb_allows_no_disruption_for_single_replica() {
        let mut cluster = fixtures::cluster("0.9.0");
        let pdb = pod_disruption_budget(&cluster).unwrap();
        assert_eq!(pdb.spec.unwrap().max_unavailable, Some(IntOrString::Int(0)));

        cluster.spec.pravega.as_mut().unwrap().segment_store_replicas = Some(3);
        let pdb = pod_disruption_budget(&cluster).unwrap();
        assert_eq!(pdb.metadata.name.as_deref(), Some("bar-segmentstore"));
        assert_eq!(pdb.spec.unwrap().max_unavailable, Some(IntOrString::Int(1)));
    }
}
