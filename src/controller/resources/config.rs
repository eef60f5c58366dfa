//! ConfigMaps carrying the runtime environment of both tiers

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;

use pravega_common::crd::{PravegaCluster, DEFAULT_LISTENER_PORT, LISTENER_PORT_OPTION};
use pravega_common::version::is_version_below;
use pravega_common::Result;

use super::{child_meta, HEAP_DUMP_DIR};

/// Key holding the JVM command line in both ConfigMaps
pub const JAVA_OPTS_KEY: &str = "JAVA_OPTS";
/// Mount point of the filesystem long-term storage volume
pub const TIER2_MOUNT_DIR: &str = "/mnt/tier2";

const TOKEN_SIGNING_KEY: &str = "secret";

/// One parsed JVM flag: the key it overrides by and its value
#[derive(Debug, Clone, PartialEq, Eq)]
struct JvmOption {
    key: String,
    value: String,
}

impl JvmOption {
    fn parse(arg: &str) -> Self {
        if let Some(size) = arg.strip_prefix("-Xms") {
            return Self::new("-Xms", size);
        }
        if let Some(flag) = arg.strip_prefix("-XX:") {
            if let Some(name) = flag.strip_prefix('+') {
                return Self::new(name, "+");
            }
            if let Some(name) = flag.strip_prefix('-') {
                return Self::new(name, "-");
            }
            if let Some((name, value)) = flag.split_once('=') {
                return Self::new(name, value);
            }
        }
        Self::new(arg, "")
    }

    fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn render(&self) -> String {
        match self.value.as_str() {
            "" => self.key.clone(),
            _ if self.key == "-Xms" => format!("-Xms{}", self.value),
            "+" | "-" => format!("-XX:{}{}", self.value, self.key),
            value => format!("-XX:{}={}", self.key, value),
        }
    }
}

/// Merge user JVM flags over defaults
///
/// A custom flag replaces the default with the same key in place; new keys
/// are appended. Order of first appearance is preserved.
pub fn merge_jvm_options(defaults: &[String], custom: &[String]) -> Vec<String> {
    if custom.is_empty() {
        return defaults.to_vec();
    }

    let mut merged: Vec<JvmOption> = Vec::with_capacity(defaults.len() + custom.len());
    for option in defaults.iter().chain(custom).map(|arg| JvmOption::parse(arg)) {
        match merged.iter_mut().find(|o| o.key == option.key) {
            Some(existing) => existing.value = option.value,
            None => merged.push(option),
        }
    }
    merged.iter().map(JvmOption::render).collect()
}

/// Sorted, space separated JVM command line
fn java_opts(
    cluster_name: &str,
    defaults: Vec<String>,
    custom: &[String],
    options: &BTreeMap<String, String>,
) -> String {
    let mut opts = vec![format!("-Dpravegaservice.clusterName={cluster_name}")];
    opts.extend(merge_jvm_options(&defaults, custom));
    opts.extend(options.iter().map(|(k, v)| format!("-D{k}={v}")));
    opts.sort();
    opts.join(" ")
}

fn controller_jvm_defaults(version: &str) -> Vec<String> {
    let mut defaults = vec![
        "-Xms512m".to_string(),
        "-XX:+ExitOnOutOfMemoryError".to_string(),
        "-XX:+CrashOnOutOfMemoryError".to_string(),
        "-XX:+HeapDumpOnOutOfMemoryError".to_string(),
        format!("-XX:HeapDumpPath={HEAP_DUMP_DIR}"),
    ];
    // Older images ship a JVM without container support
    if !is_version_below(version, "0.4.0") {
        defaults.extend([
            "-XX:+UnlockExperimentalVMOptions".to_string(),
            "-XX:+UseContainerSupport".to_string(),
            "-XX:MaxRAMPercentage=50.0".to_string(),
        ]);
    }
    defaults
}

/// Runtime options of the segment store with the listener port filled in
pub fn segment_store_options(cluster: &PravegaCluster) -> BTreeMap<String, String> {
    let mut options = cluster.spec.pravega().options.clone();
    options
        .entry(LISTENER_PORT_OPTION.to_string())
        .or_insert_with(|| DEFAULT_LISTENER_PORT.to_string());
    options
}

/// The `-D` flag pinning the listener port, as it appears in `JAVA_OPTS`
pub fn listener_port_flag(cluster: &PravegaCluster) -> String {
    let options = segment_store_options(cluster);
    let port = options
        .get(LISTENER_PORT_OPTION)
        .map(String::as_str)
        .unwrap_or_default();
    format!("-D{LISTENER_PORT_OPTION}={port}")
}

/// Desired controller ConfigMap
pub fn controller_config_map(cluster: &PravegaCluster) -> Result<ConfigMap> {
    let spec = &cluster.spec;
    let pravega = spec.pravega();
    let name = cluster.cluster_name();

    let mut data = BTreeMap::from([
        ("CLUSTER_NAME".to_string(), name.to_string()),
        ("ZK_URL".to_string(), spec.zookeeper_uri.clone()),
        (
            JAVA_OPTS_KEY.to_string(),
            java_opts(
                name,
                controller_jvm_defaults(&spec.version),
                &pravega.controller_jvm_options,
                &pravega.options,
            ),
        ),
        ("REST_SERVER_PORT".to_string(), "10080".to_string()),
        ("CONTROLLER_SERVER_PORT".to_string(), "9090".to_string()),
        (
            "AUTHORIZATION_ENABLED".to_string(),
            spec.authentication_enabled().to_string(),
        ),
        ("TOKEN_SIGNING_KEY".to_string(), TOKEN_SIGNING_KEY.to_string()),
        ("TLS_ENABLED".to_string(), "false".to_string()),
        ("WAIT_FOR".to_string(), spec.zookeeper_uri.clone()),
    ]);
    if pravega.debug_logging {
        data.insert("log.level".to_string(), "DEBUG".to_string());
    }

    Ok(ConfigMap {
        metadata: child_meta(
            cluster,
            cluster.controller_config_map_name(),
            Some(cluster.controller_labels()),
        )?,
        data: Some(data),
        ..Default::default()
    })
}

fn tier2_options(cluster: &PravegaCluster) -> BTreeMap<String, String> {
    let Some(storage) = cluster.spec.pravega().long_term_storage.as_ref() else {
        return BTreeMap::new();
    };
    let entries: Vec<(&str, String)> = if storage.filesystem.is_some() {
        vec![
            ("TIER2_STORAGE", "FILESYSTEM".to_string()),
            ("NFS_MOUNT", TIER2_MOUNT_DIR.to_string()),
        ]
    } else if let Some(ecs) = storage.ecs.as_ref() {
        vec![
            ("TIER2_STORAGE", "EXTENDEDS3".to_string()),
            ("EXTENDEDS3_CONFIGURI", ecs.config_uri.clone()),
            ("EXTENDEDS3_BUCKET", ecs.bucket.clone()),
            ("EXTENDEDS3_PREFIX", ecs.prefix.clone()),
        ]
    } else if let Some(hdfs) = storage.hdfs.as_ref() {
        vec![
            ("TIER2_STORAGE", "HDFS".to_string()),
            ("HDFS_URL", hdfs.uri.clone()),
            ("HDFS_ROOT", hdfs.root.clone()),
        ]
    } else {
        Vec::new()
    };
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Desired segment store ConfigMap
pub fn segment_store_config_map(cluster: &PravegaCluster) -> Result<ConfigMap> {
    let spec = &cluster.spec;
    let pravega = spec.pravega();
    let name = cluster.cluster_name();

    let mut data = BTreeMap::from([
        (
            "AUTHORIZATION_ENABLED".to_string(),
            spec.authentication_enabled().to_string(),
        ),
        ("CLUSTER_NAME".to_string(), name.to_string()),
        ("ZK_URL".to_string(), spec.zookeeper_uri.clone()),
        (
            JAVA_OPTS_KEY.to_string(),
            java_opts(
                name,
                Vec::new(),
                &pravega.segment_store_jvm_options,
                &segment_store_options(cluster),
            ),
        ),
        ("CONTROLLER_URL".to_string(), cluster.controller_url()),
        ("WAIT_FOR".to_string(), spec.bookkeeper_uri.clone()),
    ]);
    if spec.external_access_enabled() {
        data.insert("K8_EXTERNAL_ACCESS".to_string(), "true".to_string());
    }
    if pravega.debug_logging {
        data.insert("log.level".to_string(), "DEBUG".to_string());
    }
    data.extend(tier2_options(cluster));

    Ok(ConfigMap {
        metadata: child_meta(
            cluster,
            cluster.segment_store_config_map_name(),
            Some(cluster.segment_store_labels()),
        )?,
        data: Some(data),
        ..Default::default()
    })
}
