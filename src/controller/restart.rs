//! Rolling restarts of tier pods
//!
//! A restart deletes one pod at a time and waits for its replacement to be
//! ready before touching the next, so a tier never loses more than one
//! member to a configuration change.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use tracing::{debug, info};

use pravega_common::crd::PravegaCluster;
use pravega_common::kube_utils::{is_pod_ready, label_selector, poll_until};
use pravega_common::Result;

use super::Context;

fn template_labels(template: &PodTemplateSpec) -> Option<BTreeMap<String, String>> {
    template.metadata.as_ref().and_then(|m| m.labels.clone())
}

fn sorted_by_name(mut pods: Vec<Pod>) -> Vec<Pod> {
    pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    pods
}

/// Restart every segment store pod, one by one
///
/// The StatefulSet uses the `OnDelete` strategy, so a changed template only
/// reaches the pods through this restart. Nothing happens when the
/// StatefulSet does not exist.
pub async fn restart_segment_store_pods(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let Some(sts) = ctx
        .client
        .get_stateful_set(ns, &cluster.segment_store_sts_name())
        .await?
    else {
        debug!("no segment store to restart");
        return Ok(());
    };

    let labels = sts
        .spec
        .as_ref()
        .and_then(|s| template_labels(&s.template))
        .unwrap_or_else(|| cluster.segment_store_labels());
    let pods = ctx.client.list_pods(ns, &label_selector(&labels)).await?;

    for pod in sorted_by_name(pods) {
        let Some(name) = pod.metadata.name.clone() else {
            continue;
        };
        let uid = pod.metadata.uid.clone();
        info!(pod = %name, "restarting segment store pod");
        ctx.client.delete_pod(ns, &name).await?;

        wait_pod_replaced(ctx, ns, &name, uid.as_deref(), "segment store restart", format!(
            "failed to delete Segmentstore pod ({name}) for 10 mins "
        ))
        .await?;
        wait_pod_ready(ctx, ns, &name, format!(
            "failed to get Segmentstore pod ({name}) as ready for 10 mins "
        ))
        .await?;
    }
    Ok(())
}

/// Restart every controller pod, one by one
///
/// After each deletion the Deployment must report all replicas ready before
/// the next pod goes. Nothing happens when the Deployment does not exist.
pub async fn restart_controller_pods(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let deploy_name = cluster.controller_deployment_name();
    let Some(deploy) = ctx.client.get_deployment(ns, &deploy_name).await? else {
        debug!("no controller to restart");
        return Ok(());
    };

    let labels = deploy
        .spec
        .as_ref()
        .and_then(|s| template_labels(&s.template))
        .unwrap_or_else(|| cluster.controller_labels());
    let pods = ctx.client.list_pods(ns, &label_selector(&labels)).await?;

    for pod in sorted_by_name(pods) {
        let Some(name) = pod.metadata.name.clone() else {
            continue;
        };
        let uid = pod.metadata.uid.clone();
        info!(pod = %name, "restarting controller pod");
        ctx.client.delete_pod(ns, &name).await?;

        wait_pod_replaced(ctx, ns, &name, uid.as_deref(), "controller restart", format!(
            "failed to delete controller pod ({name}) for 10 mins "
        ))
        .await?;

        let client = &ctx.client;
        let deploy_name = deploy_name.as_str();
        let timeouts = &ctx.config.timeouts;
        poll_until(
            &ctx.cancel,
            "controller restart",
            timeouts.restart,
            timeouts.restart_poll,
            "failed to make controller pod ready for 10 mins ",
            move || async move {
                let ready = client
                    .get_deployment(ns, deploy_name)
                    .await?
                    .and_then(|d| d.status)
                    .is_some_and(|s| s.ready_replicas.unwrap_or(0) == s.replicas.unwrap_or(0));
                Ok(ready)
            },
        )
        .await?;
    }
    Ok(())
}

/// Wait until the deleted pod is gone, unready, or replaced by a new one
async fn wait_pod_replaced(
    ctx: &Context,
    ns: &str,
    name: &str,
    old_uid: Option<&str>,
    operation: &str,
    timeout_msg: String,
) -> Result<()> {
    let client = &ctx.client;
    let timeouts = &ctx.config.timeouts;
    poll_until(
        &ctx.cancel,
        operation,
        timeouts.restart,
        timeouts.restart_poll,
        timeout_msg,
        move || async move {
            let replaced = match client.get_pod(ns, name).await? {
                None => true,
                Some(pod) => pod.metadata.uid.as_deref() != old_uid || !is_pod_ready(&pod),
            };
            Ok(replaced)
        },
    )
    .await
}

async fn wait_pod_ready(ctx: &Context, ns: &str, name: &str, timeout_msg: String) -> Result<()> {
    let client = &ctx.client;
    let timeouts = &ctx.config.timeouts;
    poll_until(
        &ctx.cancel,
        "pod readiness",
        timeouts.restart,
        timeouts.restart_poll,
        timeout_msg,
        move || async move {
            Ok(client
                .get_pod(ns, name)
                .await?
                .is_some_and(|pod| is_pod_ready(&pod)))
        },
    )
    .await
}
