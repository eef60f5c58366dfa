//! Desired state of the objects owned by a PravegaCluster
//!
//! Every function in this module is pure: it renders a child object from the
//! cluster spec and never touches the API. The reconciler compares these
//! renderings with what is live.

pub mod config;
pub mod controller;
pub mod segmentstore;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, EmptyDirVolumeSource, EnvVar, ExecAction, HostPathVolumeSource, Probe,
    SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;

use pravega_common::crd::{PravegaCluster, PravegaSpec, ProbeConfig};
use pravega_common::version::{is_version_below, HEALTHCHECK_VERSION};
use pravega_common::{Error, Result};

/// Option listing `name=path` host path mounts
pub const HOST_PATH_MOUNTS_OPTION: &str = "hostPathVolumeMounts";
/// Option listing `name=path` emptyDir mounts
pub const EMPTY_DIR_MOUNTS_OPTION: &str = "emptyDirVolumeMounts";
/// Option listing `configmap:key=path` ConfigMap file mounts
pub const CONFIG_MAP_MOUNTS_OPTION: &str = "configMapVolumeMounts";

/// Directory JVM heap dumps are written to
pub const HEAP_DUMP_DIR: &str = "/tmp/dumpfile/heap";
const HEAP_DUMP_VOLUME: &str = "heap-dump";

pub(crate) const TLS_VOLUME_NAME: &str = "tls-secret";
pub(crate) const TLS_MOUNT_DIR: &str = "/etc/secret-volume";

/// Environment variable naming the InfluxDB secret's mount path
pub const INFLUXDB_MOUNT_PATH_ENV: &str = "INFLUX_DB_SECRET_MOUNT_PATH";
const INFLUXDB_VOLUME_NAME: &str = "influxdb-secret";

/// Owner reference making the cluster the controller of a child object
pub fn owner_reference(cluster: &PravegaCluster) -> Result<OwnerReference> {
    cluster.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "resources",
            format!("cluster {} has no uid", cluster.cluster_name()),
        )
    })
}

/// Metadata for a child object in the cluster's namespace
pub fn child_meta(
    cluster: &PravegaCluster,
    name: String,
    labels: Option<BTreeMap<String, String>>,
) -> Result<ObjectMeta> {
    Ok(ObjectMeta {
        name: Some(name),
        namespace: Some(cluster.cluster_namespace().to_string()),
        labels,
        owner_references: Some(vec![owner_reference(cluster)?]),
        ..Default::default()
    })
}

/// Exec probe running `command` through `/bin/sh -c`
fn shell_probe(command: String) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), command]),
        }),
        ..Default::default()
    }
}

/// Exec probe running `command` with the given timing
pub(crate) fn timed_probe(command: String, timing: ProbeConfig) -> Probe {
    Probe {
        initial_delay_seconds: timing.initial_delay_seconds,
        period_seconds: timing.period_seconds,
        failure_threshold: timing.failure_threshold,
        success_threshold: timing.success_threshold,
        timeout_seconds: timing.timeout_seconds,
        ..shell_probe(command)
    }
}

/// Liveness command for a tier
///
/// Below the health endpoint version this only checks that `port` is
/// listening; later versions ask the REST health endpoint on `rest_port`.
pub fn liveness_command(version: &str, port: i32, rest_port: i32) -> String {
    if is_version_below(version, HEALTHCHECK_VERSION) {
        listening_check(port)
    } else {
        health_check(rest_port, "liveness")
    }
}

pub(crate) fn listening_check(port: i32) -> String {
    format!("netstat -ltn 2> /dev/null | grep {port} || ss -ltn 2> /dev/null | grep {port}")
}

pub(crate) fn health_check(rest_port: i32, probe: &str) -> String {
    format!(
        "curl -s -X GET 'http://localhost:{rest_port}/v1/health/{probe}' || curl -s -k -X GET 'https://localhost:{rest_port}/v1/health/{probe}'"
    )
}

/// Secret volume plus its mount
pub(crate) fn secret_volume(name: &str, secret: &str, mount_path: &str) -> (Volume, VolumeMount) {
    (
        Volume {
            name: name.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        },
    )
}

/// InfluxDB secret volume, its mount and the variable pointing at it
pub(crate) fn influx_db_secret(pravega: &PravegaSpec) -> Option<(Volume, VolumeMount, EnvVar)> {
    let influx = pravega.influx_db_secret.as_ref()?;
    let secret = influx.secret_name()?;
    let (volume, mount) = secret_volume(INFLUXDB_VOLUME_NAME, secret, influx.mount_path());
    let env = EnvVar {
        name: INFLUXDB_MOUNT_PATH_ENV.to_string(),
        value: Some(influx.mount_path().to_string()),
        ..Default::default()
    };
    Some((volume, mount, env))
}

fn entries(options: &BTreeMap<String, String>, key: &str) -> Vec<(String, String)> {
    options
        .get(key)
        .into_iter()
        .flat_map(|value| value.split(','))
        .filter_map(|entry| entry.split_once('='))
        .map(|(name, path)| (name.trim().to_string(), path.trim().to_string()))
        .filter(|(name, path)| !name.is_empty() && !path.is_empty())
        .collect()
}

/// Extra volumes requested through runtime options
///
/// Host path and emptyDir entries are `name=path`. ConfigMap entries are
/// `configmap:key=path` and mount the single key at `path`. Malformed entries
/// are skipped. Without any emptyDir option a scratch volume is mounted at
/// [`HEAP_DUMP_DIR`].
pub fn option_volumes(options: &BTreeMap<String, String>) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();

    for (name, path) in entries(options, HOST_PATH_MOUNTS_OPTION) {
        volumes.push(Volume {
            name: name.clone(),
            host_path: Some(HostPathVolumeSource {
                path: path.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name,
            mount_path: path,
            ..Default::default()
        });
    }

    let mut empty_dirs = entries(options, EMPTY_DIR_MOUNTS_OPTION);
    if !options.contains_key(EMPTY_DIR_MOUNTS_OPTION) {
        empty_dirs.push((HEAP_DUMP_VOLUME.to_string(), HEAP_DUMP_DIR.to_string()));
    }
    for (name, path) in empty_dirs {
        volumes.push(Volume {
            name: name.clone(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name,
            mount_path: path,
            ..Default::default()
        });
    }

    for (source, path) in entries(options, CONFIG_MAP_MOUNTS_OPTION) {
        let Some((config_map, key)) = source.split_once(':') else {
            continue;
        };
        volumes.push(Volume {
            name: config_map.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: config_map.to_string(),
            mount_path: path,
            sub_path: Some(key.to_string()),
            ..Default::default()
        });
    }

    (volumes, mounts)
}
