//! ZooKeeper metadata cleanup on cluster deletion
//!
//! The `cleanUpZookeeper` finalizer holds a deleted cluster until its pods are
//! gone and its znodes below `/pravega/<name>` are removed. A failed cleanup
//! keeps the finalizer so the next pass retries.

use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{info, warn};

use pravega_common::crd::PravegaCluster;
use pravega_common::events::{actions, reasons};
use pravega_common::kube_utils::{label_selector, poll_until};
use pravega_common::{Error, Result, ZOOKEEPER_FINALIZER};

use super::Context;
use crate::zookeeper::cluster_znode;

/// Whether the cluster carries the cleanup finalizer
pub fn has_finalizer(cluster: &PravegaCluster) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|name| name == ZOOKEEPER_FINALIZER))
}

/// Add the cleanup finalizer and return the cluster as stored
pub async fn add_finalizer(cluster: &PravegaCluster, ctx: &Context) -> Result<PravegaCluster> {
    let mut updated = cluster.clone();
    updated
        .metadata
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(ZOOKEEPER_FINALIZER.to_string());
    info!("adding finalizer");
    ctx.client.replace_cluster(&updated).await
}

/// Wait for the pods to terminate, clear the cluster's znodes and release
/// the finalizer
///
/// Any failure is published as a `ZKMetaCleanupFailed` warning and returned
/// with the finalizer still in place.
pub async fn cleanup(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let Err(e) = run_cleanup(cluster, ctx).await else {
        return Ok(());
    };

    let znode = cluster_znode(cluster.cluster_name());
    warn!(error = %e, %znode, "metadata cleanup failed");
    ctx.events
        .publish(
            &cluster.object_ref(&()),
            EventType::Warning,
            reasons::ZK_META_CLEANUP_FAILED,
            actions::DELETE,
            Some(format!(
                "failed to cleanup pravega metadata from zookeeper (znode path: {znode}): {e}"
            )),
        )
        .await;
    Err(e)
}

async fn run_cleanup(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let name = cluster.cluster_name();
    wait_for_pods_terminated(cluster, ctx)
        .await
        .map_err(|e| Error::sync(format!("failed to wait for cluster pods termination ({name}): {e}")))?;

    let znode = cluster_znode(name);
    ctx.metadata
        .delete_tree(&cluster.spec.zookeeper_uri, &znode)
        .await
        .map_err(|e| Error::zookeeper(format!("failed to delete zookeeper znodes for ({name}): {e}")))?;
    info!(%znode, "cleared cluster metadata");

    let mut released = cluster.clone();
    if let Some(finalizers) = released.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != ZOOKEEPER_FINALIZER);
    }
    ctx.client.replace_cluster(&released).await?;
    info!("removed finalizer");
    Ok(())
}

async fn wait_for_pods_terminated(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let selector = label_selector(&cluster.cluster_labels());
    let selector = selector.as_str();
    let client = &ctx.client;
    let timeouts = &ctx.config.timeouts;
    poll_until(
        &ctx.cancel,
        "pod termination",
        timeouts.drain,
        timeouts.drain_poll,
        "pods still running",
        move || async move { Ok(client.list_pods(ns, selector).await?.is_empty()) },
    )
    .await
}
