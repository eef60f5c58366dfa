//! Controller tier: Deployment, Service and PodDisruptionBudget

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, ContainerPort, EmptyDirVolumeSource, EnvFromSource, PodSpec,
    PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use pravega_common::crd::{
    default_controller_resources, AuthImplementationSpec, PravegaCluster, ProbeConfig,
    CONTROLLER_COMPONENT, CONTROLLER_GRPC_PORT, CONTROLLER_REST_PORT,
};
use pravega_common::version::{is_version_below, HEALTHCHECK_VERSION};
use pravega_common::Result;

use super::{
    child_meta, health_check, influx_db_secret, liveness_command, option_volumes, secret_volume,
    timed_probe, TLS_MOUNT_DIR, TLS_VOLUME_NAME,
};

/// Name of the controller container
pub const CONTAINER_NAME: &str = CONTROLLER_COMPONENT;

const AUTH_VOLUME_NAME: &str = "auth-passwd-secret";
const AUTH_MOUNT_DIR: &str = "/etc/auth-passwd-volume";
const TOKEN_VOLUME_NAME: &str = "controller-auth-secret";
const TOKEN_MOUNT_DIR: &str = "/etc/controller-auth-volume";
const AUTH_PLUGIN_VOLUME_NAME: &str = "authplugin";

/// Readiness timing unless the cluster overrides it
pub const READINESS_DEFAULTS: ProbeConfig = ProbeConfig {
    initial_delay_seconds: Some(20),
    period_seconds: None,
    failure_threshold: None,
    success_threshold: Some(3),
    timeout_seconds: Some(60),
};

/// Liveness timing unless the cluster overrides it
pub const LIVENESS_DEFAULTS: ProbeConfig = ProbeConfig {
    initial_delay_seconds: Some(60),
    period_seconds: Some(15),
    failure_threshold: Some(4),
    success_threshold: None,
    timeout_seconds: None,
};

/// Readiness command of the controller container
///
/// Before the health endpoints existed readiness meant the REST API answers:
/// with auth on a bogus login must be refused with 401, with auth off the
/// `_system` scope must be listed. Each variant tries every TLS combination.
pub fn readiness_command(version: &str, auth_enabled: bool) -> String {
    let port = CONTROLLER_REST_PORT;
    if !is_version_below(version, HEALTHCHECK_VERSION) {
        return health_check(port, "readiness");
    }
    if auth_enabled {
        format!(
            "echo $JAVA_OPTS | grep 'controller.auth.tlsEnabled=true' &&  curl -v -k -u testtls:testtls -s -X GET 'https://localhost:{port}/v1/scopes/' 2>&1 -H 'accept: application/json' | grep 401 || (echo $JAVA_OPTS | grep 'controller.auth.tlsEnabled=false' && curl -v -k -u testtls:testtls -s -X GET 'http://localhost:{port}/v1/scopes/' 2>&1 -H 'accept: application/json' | grep 401 ) ||  (echo $JAVA_OPTS | grep 'controller.security.tls.enable=true' && echo $JAVA_OPTS | grep -v 'controller.auth.tlsEnabled' && curl -v -k -u testtls:testtls -s -X GET 'https://localhost:{port}/v1/scopes/' 2>&1 -H 'accept: application/json' | grep 401 ) || (curl -v -k -u testtls:testtls -s -X GET 'http://localhost:{port}/v1/scopes/' 2>&1 -H 'accept: application/json' | grep 401 )"
        )
    } else {
        format!(
            "echo $JAVA_OPTS | grep 'controller.auth.tlsEnabled=true' &&  curl -s -X GET 'https://localhost:{port}/v1/scopes/' -H 'accept: application/json' | grep '_system'|| (echo $JAVA_OPTS | grep 'controller.auth.tlsEnabled=false' && curl -s -X GET 'http://localhost:{port}/v1/scopes/' -H 'accept: application/json' | grep '_system' ) || (echo $JAVA_OPTS | grep 'controller.security.tls.enable=true' && echo $JAVA_OPTS | grep -v 'controller.auth.tlsEnabled' && curl -s -X GET 'https://localhost:{port}/v1/scopes/' -H 'accept: application/json' | grep '_system' ) || (curl -s -X GET 'http://localhost:{port}/v1/scopes/' -H 'accept: application/json' | grep '_system') "
        )
    }
}

/// Init containers copying each auth plugin into a shared emptyDir
///
/// Returns nothing when no plugin is listed.
fn auth_plugins(auth: &AuthImplementationSpec) -> Option<(Vec<Container>, Volume, VolumeMount)> {
    if auth.auth_handlers.is_empty() {
        return None;
    }
    let mount = VolumeMount {
        name: AUTH_PLUGIN_VOLUME_NAME.to_string(),
        mount_path: auth.mount_path().to_string(),
        ..Default::default()
    };
    let containers = auth
        .auth_handlers
        .iter()
        .enumerate()
        .map(|(i, plugin)| Container {
            name: format!("{AUTH_PLUGIN_VOLUME_NAME}{i}"),
            image: Some(plugin.image.clone()),
            command: Some(vec!["/bin/sh".to_string()]),
            args: Some(vec![
                "-cx".to_string(),
                format!("cp {} {}", plugin.source, auth.mount_path()),
            ]),
            volume_mounts: Some(vec![mount.clone()]),
            ..Default::default()
        })
        .collect();
    let volume = Volume {
        name: AUTH_PLUGIN_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    };
    Some((containers, volume, mount))
}

/// Desired controller pod template
pub fn pod_template(cluster: &PravegaCluster) -> PodTemplateSpec {
    let spec = &cluster.spec;
    let pravega = spec.pravega();
    let (mut volumes, mut mounts) = option_volumes(&pravega.options);

    let mut secrets = Vec::new();
    if let Some(secret) = spec.tls().and_then(|t| t.controller_secret()) {
        secrets.push((TLS_VOLUME_NAME, secret, TLS_MOUNT_DIR));
    }
    if let Some(auth) = spec.enabled_authentication() {
        if let Some(secret) = auth.password_auth_secret.as_deref().filter(|s| !s.is_empty()) {
            secrets.push((AUTH_VOLUME_NAME, secret, AUTH_MOUNT_DIR));
        }
        if let Some(secret) = auth
            .controller_token_secret
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            secrets.push((TOKEN_VOLUME_NAME, secret, TOKEN_MOUNT_DIR));
        }
    }
    for (name, secret, dir) in secrets {
        let (volume, mount) = secret_volume(name, secret, dir);
        volumes.push(volume);
        mounts.push(mount);
    }

    let mut env = Vec::new();
    if let Some((volume, mount, var)) = influx_db_secret(pravega) {
        volumes.push(volume);
        mounts.push(mount);
        env.push(var);
    }

    let mut init_containers = pravega.controller_init_containers.clone();
    if let Some((plugins, volume, mount)) = pravega
        .auth_implementations
        .as_ref()
        .and_then(auth_plugins)
    {
        init_containers.extend(plugins);
        volumes.push(volume);
        mounts.push(mount);
    }

    let probes = pravega.controller_probes.as_ref();
    let readiness = timed_probe(
        readiness_command(&spec.version, spec.authentication_enabled()),
        probes
            .and_then(|p| p.readiness_probe)
            .map_or(READINESS_DEFAULTS, |p| p.over(READINESS_DEFAULTS)),
    );
    let liveness = timed_probe(
        liveness_command(&spec.version, CONTROLLER_GRPC_PORT, CONTROLLER_REST_PORT),
        probes
            .and_then(|p| p.liveness_probe)
            .map_or(LIVENESS_DEFAULTS, |p| p.over(LIVENESS_DEFAULTS)),
    );

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(cluster.image()),
        image_pull_policy: Some(pravega.pull_policy().to_string()),
        args: Some(vec!["controller".to_string()]),
        ports: Some(vec![
            ContainerPort {
                name: Some("rest".to_string()),
                container_port: CONTROLLER_REST_PORT,
                ..Default::default()
            },
            ContainerPort {
                name: Some("grpc".to_string()),
                container_port: CONTROLLER_GRPC_PORT,
                ..Default::default()
            },
        ]),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: cluster.controller_config_map_name(),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        env: (!env.is_empty()).then_some(env),
        volume_mounts: Some(mounts),
        resources: Some(
            pravega
                .controller_resources
                .clone()
                .unwrap_or_else(default_controller_resources),
        ),
        readiness_probe: Some(readiness),
        liveness_probe: Some(liveness),
        ..Default::default()
    };

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(cluster.controller_labels()),
            annotations: Some(cluster.controller_annotations()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            affinity: pravega.controller_pod_affinity.clone(),
            service_account_name: pravega
                .controller_service_account_name
                .clone()
                .filter(|s| !s.is_empty()),
            security_context: pravega.controller_security_context.clone(),
            init_containers: (!init_containers.is_empty()).then_some(init_containers),
            volumes: Some(volumes),
            ..Default::default()
        }),
    }
}

/// Desired controller Deployment
pub fn deployment(cluster: &PravegaCluster) -> Result<Deployment> {
    let labels = cluster.controller_labels();
    Ok(Deployment {
        metadata: child_meta(
            cluster,
            cluster.controller_deployment_name(),
            Some(labels.clone()),
        )?,
        spec: Some(DeploymentSpec {
            progress_deadline_seconds: Some(600),
            revision_history_limit: Some(0),
            replicas: Some(cluster.spec.pravega().controller_replicas()),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template: pod_template(cluster),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Desired controller Service
///
/// ClusterIP unless external access is on, in which case it takes the
/// external service type and the user's service annotations.
pub fn service(cluster: &PravegaCluster) -> Result<Service> {
    let spec = &cluster.spec;
    let labels = cluster.controller_labels();
    let mut meta = child_meta(cluster, cluster.controller_service_name(), Some(labels.clone()))?;

    let service_type = if spec.external_access_enabled() {
        meta.annotations = Some(spec.pravega().controller_service_annotations.clone());
        spec.controller_external_service_type().to_string()
    } else {
        "ClusterIP".to_string()
    };

    Ok(Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            type_: Some(service_type),
            ports: Some(vec![
                ServicePort {
                    name: Some("rest".to_string()),
                    port: CONTROLLER_REST_PORT,
                    ..Default::default()
                },
                ServicePort {
                    name: Some("grpc".to_string()),
                    port: CONTROLLER_GRPC_PORT,
                    ..Default::default()
                },
            ]),
            selector: Some(labels),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Desired controller PodDisruptionBudget
pub fn pod_disruption_budget(cluster: &PravegaCluster) -> Result<PodDisruptionBudget> {
    let min_available = cluster
        .spec
        .pravega()
        .max_unavailable_controller_replicas();
    Ok(PodDisruptionBudget {
        metadata: child_meta(cluster, cluster.controller_pdb_name(), None)?,
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(min_available)),
            selector: Some(LabelSelector {
                match_labels: Some(cluster.controller_labels()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
