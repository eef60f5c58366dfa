//! Shared Kubernetes helpers
//!
//! Pod and Deployment condition checks, the cancellable poll loop used for
//! long waits, and the semantic comparison used to detect workload drift.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition};
use k8s_openapi::api::core::v1::{Pod, PodCondition};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::quantity::parse_millis;
use crate::Error;

/// Kubernetes condition status value for "True"
pub const STATUS_TRUE: &str = "True";

/// Container waiting reasons that fail an upgrade immediately
pub const FATAL_WAITING_REASONS: [&str; 2] = ["ImagePullBackOff", "CrashLoopBackOff"];

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields for DeploymentCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Check if a condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// True if the pod's `Ready` condition is True
pub fn is_pod_ready(pod: &Pod) -> bool {
    has_condition(
        pod.status.as_ref().and_then(|s| s.conditions.as_deref()),
        "Ready",
    )
}

/// Value of a pod annotation
pub fn pod_annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Waiting reason of a named container stuck in a state no retry fixes
pub fn fatal_waiting_reason<'a>(pod: &'a Pod, containers: &[&str]) -> Option<&'a str> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .filter(|cs| containers.contains(&cs.name.as_str()))
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref()?.reason.as_deref())
        .find(|reason| FATAL_WAITING_REASONS.contains(reason))
}

/// True if the Deployment gave up rolling out
///
/// The deployment controller marks `Progressing=False` with reason
/// `ProgressDeadlineExceeded` once `progressDeadlineSeconds` elapses.
pub fn deployment_deadline_exceeded(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| {
            c.type_ == "Progressing"
                && c.status == "False"
                && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
        })
}

/// True if a per-replica object is beyond the replica count
///
/// The ordinal is the integer after the last `-`; names without one are
/// never orphans.
pub fn is_orphan(name: &str, replicas: i32) -> bool {
    name.rsplit_once('-')
        .and_then(|(_, ordinal)| ordinal.parse::<i64>().ok())
        .is_some_and(|ordinal| ordinal >= i64::from(replicas))
}

/// Render labels as an equality-based selector string
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn scalars_match(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) if a != b => {
            // The API server canonicalizes quantities ("1000m" is stored as "1")
            matches!((parse_millis(a), parse_millis(b)), (Ok(x), Ok(y)) if x == y)
        }
        _ => desired == live,
    }
}

/// True if everything `desired` specifies is present in `live`
///
/// Objects are compared key by key over the keys `desired` sets, so fields
/// the API server fills in or defaults on the live side are ignored. Arrays
/// must have the same length and match element-wise in any order.
pub fn is_semantic_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => want.iter().all(|(key, value)| {
            match have.get(key) {
                Some(live_value) => is_semantic_subset(value, live_value),
                None => is_unset(value),
            }
        }),
        (Value::Array(want), Value::Array(have)) => {
            if want.len() != have.len() {
                return false;
            }
            let mut used = vec![false; have.len()];
            want.iter().all(|w| {
                let found = have
                    .iter()
                    .enumerate()
                    .find(|(i, h)| !used[*i] && is_semantic_subset(w, h))
                    .map(|(i, _)| i);
                match found {
                    Some(i) => {
                        used[i] = true;
                        true
                    }
                    None => false,
                }
            })
        }
        (want, Value::Null) => is_unset(want),
        (want, have) => scalars_match(want, have),
    }
}

/// Poll until a condition is met, the timeout elapses or `cancel` fires
///
/// `check_fn` returns `Ok(true)` when done and `Ok(false)` to keep waiting.
/// Errors from `check_fn` are treated as "not yet" since API reads during a
/// rollout fail transiently.
pub async fn poll_until<F, Fut>(
    cancel: &CancellationToken,
    operation: &str,
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!(operation, "Polling condition not yet met, retrying..."),
            Err(e) => trace!(operation, error = %e, "Polling check returned error (retrying)"),
        }

        if tokio::time::Instant::now() + poll_interval > deadline {
            return Err(Error::timeout(operation, timeout_msg));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(operation)),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
