//! Admission rules for PravegaCluster
//!
//! Each rule returns the first violation it finds as a [`Denial`] whose text
//! is handed back to the API client unchanged.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::admission::Operation;
use tracing::debug;

use pravega_common::crd::{PravegaCluster, PravegaClusterSpec, PravegaClusterStatus};
use pravega_common::quantity::{parse_bytes, parse_jvm_size, parse_millis};
use pravega_common::version::normalize;

use super::ConfigMapReader;
use crate::controller::resources::config::JAVA_OPTS_KEY;

/// Reason a request was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Denial(pub String);

impl Denial {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

type Verdict = Result<(), Denial>;

/// Options that cannot change once the cluster exists, as `(old, new)` names
///
/// An old-style key must be found verbatim in the running configuration;
/// a new-style key may be found under either name.
const PROTECTED_OPTIONS: [(&str, &str); 8] = [
    ("controller.containerCount", "controller.container.count"),
    ("pravegaservice.containerCount", "pravegaservice.container.count"),
    ("bookkeeper.bkLedgerPath", "bookkeeper.ledger.path"),
    ("controller.retention.bucketCount", "controller.retention.bucket.count"),
    ("controller.watermarking.bucketCount", "controller.watermarking.bucket.count"),
    ("pravegaservice.dataLogImplementation", "pravegaservice.dataLog.impl.name"),
    ("pravegaservice.storageImplementation", "pravegaservice.storage.impl.name"),
    ("storageextra.storageNoOpMode", "storageextra.noOp.mode.enable"),
];

const CACHE_SIZE_OPTION: &str = "pravegaservice.cache.size.max";
const ENSEMBLE_SIZE_OPTION: &str = "bookkeeper.ensemble.size";
const WRITE_QUORUM_OPTION: &str = "bookkeeper.write.quorum.size";
const ACK_QUORUM_OPTION: &str = "bookkeeper.ack.quorum.size";
const RACKS_OPTION: &str = "bookkeeper.write.quorum.racks.minimumCount.enable";
const DEFAULT_QUORUM: i64 = 3;

const AUTH_ENABLE_OPTION: &str = "autoScale.controller.connect.security.auth.enable";
const AUTH_ENABLE_LEGACY_OPTION: &str = "autoScale.authEnabled";
const CONTROLLER_SIGNING_KEY: (&str, &str) = (
    "controller.security.auth.delegationToken.signingKey.basis",
    "controller.auth.tokenSigningKey",
);
const SEGMENT_STORE_SIGNING_KEY: (&str, &str) = (
    "autoScale.security.auth.token.signingKey.basis",
    "autoScale.tokenSigningKey",
);

/// Decide on a create, update or delete of a PravegaCluster
///
/// The status consulted by the version rule is the one carried by
/// `proposed`, falling back to `prior` when the request omits it.
pub async fn validate(
    operation: &Operation,
    proposed: &PravegaCluster,
    prior: Option<&PravegaCluster>,
    configmaps: &dyn ConfigMapReader,
) -> Verdict {
    match operation {
        Operation::Create => {
            validate_version(&proposed.spec, &observed_status(proposed, prior))?;
            validate_segment_store_memory(&proposed.spec)?;
            validate_quorum(&proposed.spec)?;
            validate_authentication(&proposed.spec)
        }
        Operation::Update => {
            validate_version(&proposed.spec, &observed_status(proposed, prior))?;
            let name = proposed.controller_config_map_name();
            let live = configmaps
                .get_config_map(proposed.cluster_namespace(), &name)
                .await
                .map_err(|e| Denial(format!("failed to get configmap ({name}): {e}")))?;
            let java_opts = live
                .and_then(|cm| cm.data)
                .and_then(|mut data| data.remove(JAVA_OPTS_KEY));
            if let Some(java_opts) = java_opts.as_deref() {
                validate_protected_options(&proposed.spec.pravega().options, java_opts)?;
            }
            validate_segment_store_memory(&proposed.spec)?;
            validate_quorum(&proposed.spec)?;
            validate_authentication(&proposed.spec)
        }
        Operation::Delete | Operation::Connect => Ok(()),
    }
}

fn observed_status(proposed: &PravegaCluster, prior: Option<&PravegaCluster>) -> PravegaClusterStatus {
    proposed
        .status
        .clone()
        .or_else(|| prior.and_then(|p| p.status.clone()))
        .unwrap_or_default()
}

fn last_version(status: &PravegaClusterStatus) -> Result<&str, Denial> {
    status.last_version().map_err(|e| Denial(e.to_string()))
}

/// Gate version changes on the cluster's lifecycle state
pub fn validate_version(spec: &PravegaClusterSpec, status: &PravegaClusterStatus) -> Verdict {
    let requested = spec.version_or_default();

    if status.is_upgrading() && requested != status.target_version {
        return Err(Denial::new("failed to process the request, cluster is upgrading"));
    }

    if status.is_rolling_back() && requested != last_version(status)? {
        return Err(Denial::new("failed to process the request, rollback in progress."));
    }

    if status.is_upgrade_failed() {
        let last = last_version(status)?;
        if requested != last {
            return Err(Denial(format!(
                "Rollback to version {requested} not supported. Only rollback to version {last} is supported."
            )));
        }
        return Ok(());
    }

    if status.is_in_error() {
        return Err(Denial::new("failed to process the request, cluster is in error state."));
    }

    let requested_norm = normalize(requested)
        .map_err(|_| Denial(format!("request version is not in valid format: {requested}")))?;

    let current = status.current_version.as_str();
    if current.is_empty() || current == requested {
        return Ok(());
    }

    let current_norm = normalize(current).map_err(|_| {
        Denial(format!(
            "found version is not in valid format, something bad happens: {current}"
        ))
    })?;
    if requested_norm < current_norm {
        return Err(Denial(format!(
            "downgrading the cluster from version {current} to {requested} is not supported"
        )));
    }

    debug!(from = current, to = requested, "version change accepted");
    Ok(())
}

/// Reject changes to options that are baked into stored data
///
/// `java_opts` is the space-separated `-Dkey=value` list of the running
/// controller.
pub fn validate_protected_options(options: &BTreeMap<String, String>, java_opts: &str) -> Verdict {
    let running: Vec<&str> = java_opts.split(' ').collect();
    let present = |key: &str, value: &str| running.contains(&format!("-D{key}={value}").as_str());

    for (old, new) in PROTECTED_OPTIONS {
        if let Some(value) = options.get(old) {
            if !present(old, value) {
                return Err(Denial(format!("{old} should not be modified")));
            }
        }
        if let Some(value) = options.get(new) {
            if !present(old, value) && !present(new, value) {
                return Err(Denial(format!("{new} should not be modified")));
            }
        }
    }
    Ok(())
}

fn quantity(field: &str, q: &Quantity, parse: fn(&str) -> pravega_common::Result<u128>) -> Result<u128, Denial> {
    parse(&q.0).map_err(|_| Denial(format!("invalid quantity for {field}: {}", q.0)))
}

fn required_limit(
    limits: &BTreeMap<String, Quantity>,
    resource: &str,
    parse: fn(&str) -> pravega_common::Result<u128>,
) -> Result<u128, Denial> {
    let field = format!("spec.pravega.segmentStoreResources.limits.{resource}");
    match limits.get(resource).filter(|q| !q.0.is_empty()) {
        Some(q) => quantity(&field, q, parse),
        None => Err(Denial(format!("Missing required value for field {field}"))),
    }
}

/// Check that the segment store heap, direct memory and cache fit the pod
pub fn validate_segment_store_memory(spec: &PravegaClusterSpec) -> Verdict {
    let pravega = spec.pravega();
    let Some(resources) = pravega.segment_store_resources.as_ref() else {
        return Err(Denial::new("spec.pravega.segmentStoreResources cannot be empty"));
    };
    let Some(limits) = resources.limits.as_ref() else {
        return Err(Denial::new("spec.pravega.segmentStoreResources.limits cannot be empty"));
    };
    let requests = resources.requests.clone().unwrap_or_default();

    let memory_limit = required_limit(limits, "memory", parse_bytes)?;
    let cpu_limit = required_limit(limits, "cpu", parse_millis)?;
    let memory_request = match requests.get("memory") {
        Some(q) => quantity("spec.pravega.segmentStoreResources.requests.memory", q, parse_bytes)?,
        None => 0,
    };
    let cpu_request = match requests.get("cpu") {
        Some(q) => quantity("spec.pravega.segmentStoreResources.requests.cpu", q, parse_millis)?,
        None => 0,
    };

    if memory_limit < memory_request {
        return Err(Denial::new(
            "spec.pravega.segmentStoreResources.requests.memory value must be less than or equal to spec.pravega.segmentStoreResources.limits.memory",
        ));
    }
    if cpu_limit < cpu_request {
        return Err(Denial::new(
            "spec.pravega.segmentStoreResources.requests.cpu value must be less than or equal to spec.pravega.segmentStoreResources.limits.cpu",
        ));
    }

    let cache = match pravega.options.get(CACHE_SIZE_OPTION).filter(|v| !v.is_empty()) {
        Some(v) => parse_bytes(v)
            .map_err(|_| Denial(format!("invalid quantity for option {CACHE_SIZE_OPTION}: {v}")))?,
        None => {
            return Err(Denial(format!(
                "Missing required value for option {CACHE_SIZE_OPTION}"
            )))
        }
    };

    let mut xmx = None;
    let mut direct = None;
    for opt in &pravega.segment_store_jvm_options {
        if let Some(v) = opt.strip_prefix("-Xmx") {
            xmx = Some(v);
        }
        if let Some(v) = opt.strip_prefix("-XX:MaxDirectMemorySize=") {
            direct = Some(v);
        }
    }
    let Some(xmx) = xmx else {
        return Err(Denial::new("Missing required value for Segment Store JVM Option -Xmx"));
    };
    let xmx = parse_jvm_size(xmx).map_err(|_| Denial(format!("invalid value for -Xmx: {xmx}")))?;
    let Some(direct) = direct else {
        return Err(Denial::new(
            "Missing required value for Segment Store JVM option -XX:MaxDirectMemorySize",
        ));
    };
    let direct = parse_jvm_size(direct)
        .map_err(|_| Denial(format!("invalid value for -XX:MaxDirectMemorySize: {direct}")))?;

    if memory_limit <= direct + xmx {
        return Err(Denial(format!(
            "MaxDirectMemorySize({direct} B) along with JVM Xmx value({xmx} B) should be less than the total available memory({memory_limit} B)!"
        )));
    }
    if direct <= cache {
        return Err(Denial(format!(
            "Cache size({cache} B) configured should be less than the JVM MaxDirectMemorySize({direct} B) value"
        )));
    }
    Ok(())
}

fn quorum_size(options: &BTreeMap<String, String>, key: &str, what: &str) -> Result<(i64, bool), Denial> {
    match options.get(key).filter(|v| !v.is_empty()) {
        Some(v) => v
            .parse::<i64>()
            .map(|n| (n, true))
            .map_err(|e| Denial(format!("Cannot convert {what} from string to integer: {e}"))),
        None => Ok((DEFAULT_QUORUM, false)),
    }
}

/// Enforce ensemble >= write quorum >= ack quorum for BookKeeper
pub fn validate_quorum(spec: &PravegaClusterSpec) -> Verdict {
    let options = &spec.pravega().options;
    let (ensemble, ensemble_set) = quorum_size(options, ENSEMBLE_SIZE_OPTION, "ensemble size")?;
    let (write, write_set) = quorum_size(options, WRITE_QUORUM_OPTION, "write quorum size")?;
    let (ack, ack_set) = quorum_size(options, ACK_QUORUM_OPTION, "ack quorum size")?;

    let racks = options.get(RACKS_OPTION).map(String::as_str).unwrap_or("");
    if !matches!(racks, "true" | "false" | "") {
        return Err(Denial(format!(
            "{RACKS_OPTION} can be only set to \"true\" \"false\" or \"\""
        )));
    }
    if racks == "true" && ensemble == 1 {
        return Err(Denial(format!(
            "{RACKS_OPTION} should be set to false if {ENSEMBLE_SIZE_OPTION} is 1"
        )));
    }

    if ensemble < write {
        let msg = if !ensemble_set {
            format!("The value provided for the option {WRITE_QUORUM_OPTION} should be less than or equal to the value of option {ENSEMBLE_SIZE_OPTION} (default is 3)")
        } else if !write_set {
            format!("The value provided for the option {ENSEMBLE_SIZE_OPTION} should be greater than or equal to the value of option {WRITE_QUORUM_OPTION} (default is 3)")
        } else {
            format!("The value provided for the option {WRITE_QUORUM_OPTION} should be less than or equal to the value of option {ENSEMBLE_SIZE_OPTION}")
        };
        return Err(Denial(msg));
    }

    if write < ack {
        let msg = if !write_set {
            format!("The value provided for the option {ACK_QUORUM_OPTION} should be less than or equal to the value of option {WRITE_QUORUM_OPTION} (default is 3)")
        } else if !ack_set {
            format!("The value provided for the option {WRITE_QUORUM_OPTION} should be greater than or equal to the value of option {ACK_QUORUM_OPTION} (default is 3)")
        } else {
            format!("The value provided for the option {ACK_QUORUM_OPTION} should be less than or equal to the value of option {WRITE_QUORUM_OPTION}")
        };
        return Err(Denial(msg));
    }
    Ok(())
}

fn signing_key<'a>(options: &'a BTreeMap<String, String>, (new, old): (&str, &str)) -> Result<&'a str, Denial> {
    options
        .get(new)
        .or_else(|| options.get(old))
        .map(String::as_str)
        .ok_or_else(|| Denial(format!("{new} field is not present")))
}

/// Check the auth options agree with the authentication switch
pub fn validate_authentication(spec: &PravegaClusterSpec) -> Verdict {
    let options = &spec.pravega().options;
    let new = options.get(AUTH_ENABLE_OPTION).map(String::as_str).unwrap_or("");
    let old = options
        .get(AUTH_ENABLE_LEGACY_OPTION)
        .map(String::as_str)
        .unwrap_or("");

    if !spec.authentication_enabled() {
        if new == "true" || old == "true" {
            return Err(Denial(format!(
                "{AUTH_ENABLE_OPTION}/{AUTH_ENABLE_LEGACY_OPTION} should not be set to true"
            )));
        }
        return Ok(());
    }

    match (new.is_empty(), old.is_empty()) {
        (true, true) => {
            return Err(Denial(format!("{AUTH_ENABLE_OPTION} field is not present")));
        }
        (true, false) if old != "true" => {
            return Err(Denial(format!("{AUTH_ENABLE_LEGACY_OPTION} should be set to true")));
        }
        (false, true) if new != "true" => {
            return Err(Denial(format!("{AUTH_ENABLE_OPTION} should be set to true")));
        }
        (false, false) if new != "true" || old != "true" => {
            return Err(Denial(format!(
                "Both {AUTH_ENABLE_OPTION} and {AUTH_ENABLE_LEGACY_OPTION} should be set to true"
            )));
        }
        _ => {}
    }

    let controller_key = signing_key(options, CONTROLLER_SIGNING_KEY)?;
    let segment_store_key = signing_key(options, SEGMENT_STORE_SIGNING_KEY)?;
    if controller_key != segment_store_key {
        return Err(Denial::new(
            "controller and segmentstore token signing key should have same value",
        ));
    }
    Ok(())
}
