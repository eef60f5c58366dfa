//! Convergence of the cluster's child objects
//!
//! ConfigMaps and workload templates are kept in line with the spec;
//! Services and disruption budgets are only created. Template drift is
//! ignored while an upgrade or rollback owns the workloads.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PodTemplateSpec};
use serde::Serialize;
use tracing::{debug, info};

use pravega_common::crd::{PravegaCluster, PravegaClusterStatus};
use pravega_common::kube_utils::is_semantic_subset;
use pravega_common::version::NamingEra;
use pravega_common::{Error, Result};

use super::resources::config::{
    controller_config_map, listener_port_flag, segment_store_config_map, JAVA_OPTS_KEY,
};
use super::resources::segmentstore::CACHE_VOLUME_NAME;
use super::resources::{controller, segmentstore};
use super::restart::{restart_controller_pods, restart_segment_store_pods};
use super::upgrade::{cross_era_in_flight, rollback_triggered, upgrade_triggered};
use super::Context;

/// API group version of the pre-v1beta1 PravegaCluster
const LEGACY_OWNER_API_VERSION: &str = "pravega.pravega.io/v1alpha1";
const OWNER_KIND: &str = "PravegaCluster";

/// Ignore an "already exists" answer to a create
fn created(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

/// Create `desired`, or bring the live copy's data in line with it
///
/// # Returns
///
/// The data the live ConfigMap held before it was replaced, or `None` when
/// it was created or already matched.
pub(crate) async fn converge_config_map(
    ctx: &Context,
    ns: &str,
    desired: ConfigMap,
) -> Result<Option<BTreeMap<String, String>>> {
    let name = desired.metadata.name.clone().unwrap_or_default();
    let Some(mut live) = ctx.client.get_config_map(ns, &name).await? else {
        info!(config_map = %name, "creating config map");
        created(ctx.client.create_config_map(ns, &desired).await)?;
        return Ok(None);
    };

    if live.data == desired.data {
        return Ok(None);
    }

    info!(config_map = %name, "updating config map");
    let previous = std::mem::replace(&mut live.data, desired.data);
    ctx.client.replace_config_map(ns, &live).await?;
    Ok(Some(previous.unwrap_or_default()))
}

/// Reconcile both tiers' ConfigMaps, restarting a tier whose config changed
///
/// Restarts wait while an upgrade is pending, since the upgrade rolls every
/// pod anyway. A changed segment store listener port also changes the pod
/// template, so the template sync handles that restart instead.
pub async fn reconcile_config_maps(
    cluster: &PravegaCluster,
    status: &PravegaClusterStatus,
    ctx: &Context,
) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let upgrading = upgrade_triggered(cluster, status);

    let changed = converge_config_map(ctx, ns, controller_config_map(cluster)?).await?;
    if changed.is_some() && !upgrading {
        info!("controller config changed, restarting controller pods");
        restart_controller_pods(cluster, ctx).await?;
    }

    let changed = converge_config_map(ctx, ns, segment_store_config_map(cluster)?).await?;
    if let Some(previous) = changed {
        let port_flag = listener_port_flag(cluster);
        let same_port = previous
            .get(JAVA_OPTS_KEY)
            .is_some_and(|opts| opts.contains(&port_flag));
        if !upgrading && same_port {
            info!("segment store config changed, restarting segment store pods");
            restart_segment_store_pods(cluster, ctx).await?;
        }
    }
    Ok(())
}

/// Create both tiers' PodDisruptionBudgets if absent
pub async fn reconcile_disruption_budgets(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    for pdb in [
        controller::pod_disruption_budget(cluster)?,
        segmentstore::pod_disruption_budget(cluster)?,
    ] {
        let name = pdb.metadata.name.clone().unwrap_or_default();
        if ctx.client.get_pdb(ns, &name).await?.is_none() {
            info!(pdb = %name, "creating pod disruption budget");
            created(ctx.client.create_pdb(ns, &pdb).await)?;
        }
    }
    Ok(())
}

/// Create the controller, headless and per-replica Services if absent
pub async fn reconcile_services(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let mut services = vec![
        controller::service(cluster)?,
        segmentstore::headless_service(cluster)?,
    ];
    services.extend(segmentstore::external_services(cluster)?);

    for svc in services {
        let name = svc.metadata.name.clone().unwrap_or_default();
        if ctx.client.get_service(ns, &name).await?.is_none() {
            info!(service = %name, "creating service");
            created(ctx.client.create_service(ns, &svc).await)?;
        }
    }
    Ok(())
}

fn to_json<T: Serialize>(kind: &str, value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// True if the live template lacks something the desired one sets
fn template_drifted(desired: &PodTemplateSpec, live: &PodTemplateSpec) -> Result<bool> {
    let desired = to_json("PodTemplateSpec", desired)?;
    let live = to_json("PodTemplateSpec", live)?;
    Ok(!is_semantic_subset(&desired, &live))
}

/// Create the workloads and keep their templates in line with the spec
pub async fn deploy_cluster(
    cluster: &PravegaCluster,
    status: &PravegaClusterStatus,
    ctx: &Context,
) -> Result<()> {
    let transition = upgrade_triggered(cluster, status) || rollback_triggered(cluster, status);
    deploy_controller(cluster, transition, ctx).await?;

    if cross_era_in_flight(cluster, status) {
        debug!("segment store is being moved between naming eras");
        return Ok(());
    }
    deploy_segment_store(cluster, transition, ctx).await?;

    if NamingEra::for_version(&cluster.spec.version) == NamingEra::Modern {
        remove_legacy_after_migration(cluster, ctx).await?;
    }
    Ok(())
}

async fn deploy_controller(cluster: &PravegaCluster, transition: bool, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let desired = controller::deployment(cluster)?;
    let name = cluster.controller_deployment_name();

    let Some(mut live) = ctx.client.get_deployment(ns, &name).await? else {
        info!(deployment = %name, "creating controller deployment");
        return created(ctx.client.create_deployment(ns, &desired).await);
    };
    if transition {
        return Ok(());
    }

    let (Some(want), Some(have)) = (desired.spec, live.spec.as_mut()) else {
        return Ok(());
    };
    if template_drifted(&want.template, &have.template)? {
        info!(deployment = %name, "controller pod template drifted, updating");
        have.template = want.template;
        ctx.client.replace_deployment(ns, &live).await?;
    }
    Ok(())
}

fn owned_by_legacy_cluster(sts: &StatefulSet) -> bool {
    sts.metadata
        .owner_references
        .iter()
        .flatten()
        .any(|o| o.kind == OWNER_KIND && o.api_version == LEGACY_OWNER_API_VERSION)
}

async fn deploy_segment_store(
    cluster: &PravegaCluster,
    transition: bool,
    ctx: &Context,
) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let desired = segmentstore::stateful_set(cluster)?;
    let name = cluster.segment_store_sts_name();

    let Some(mut live) = ctx.client.get_stateful_set(ns, &name).await? else {
        info!(statefulset = %name, "creating segment store statefulset");
        return created(ctx.client.create_stateful_set(ns, &desired).await);
    };

    if owned_by_legacy_cluster(&live) {
        info!(statefulset = %name, "deleting statefulset owned by a v1alpha1 cluster");
        return ctx.client.delete_stateful_set(ns, &name).await;
    }
    if transition {
        return Ok(());
    }

    let (Some(want), Some(have)) = (desired.spec, live.spec.as_mut()) else {
        return Ok(());
    };
    if template_drifted(&want.template, &have.template)? {
        info!(statefulset = %name, "segment store pod template drifted, updating");
        have.template = want.template;
        ctx.client.replace_stateful_set(ns, &live).await?;
        restart_segment_store_pods(cluster, ctx).await?;
    }
    Ok(())
}

/// Remove the legacy segment store once its modern replacement serves
async fn remove_legacy_after_migration(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let name = cluster.segment_store_sts_name_for(NamingEra::Modern);
    let Some(modern) = ctx.client.get_stateful_set(ns, &name).await? else {
        debug!(statefulset = %name, "modern segment store not created yet");
        return Ok(());
    };

    let ready = modern
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    if ready > 0 {
        remove_legacy_segment_store(cluster, ctx).await?;
    }
    Ok(())
}

/// Delete the legacy-era StatefulSet with its cache claims and external Services
///
/// Nothing is done when the legacy StatefulSet is already gone.
pub(crate) async fn remove_legacy_segment_store(
    cluster: &PravegaCluster,
    ctx: &Context,
) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let legacy = cluster.segment_store_sts_name_for(NamingEra::Legacy);
    if ctx.client.get_stateful_set(ns, &legacy).await?.is_none() {
        return Ok(());
    }

    let replicas = cluster.spec.pravega().segment_store_replicas();
    for ordinal in 0..replicas {
        ctx.client
            .delete_pvc(ns, &format!("{CACHE_VOLUME_NAME}-{legacy}-{ordinal}"))
            .await?;
        if cluster.spec.external_access_enabled() {
            ctx.client
                .delete_service(ns, &cluster.segment_store_service_name_for(NamingEra::Legacy, ordinal))
                .await?;
        }
    }

    info!(statefulset = %legacy, "deleting legacy segment store statefulset");
    ctx.client.delete_stateful_set(ns, &legacy).await
}
