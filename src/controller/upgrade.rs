//! Version upgrades and rollbacks
//!
//! The running transition is derived from the status conditions:
//!
//! | State          | Conditions                                   |
//! |----------------|----------------------------------------------|
//! | Steady         | nothing below                                |
//! | Upgrading      | `Upgrading=True`                             |
//! | UpgradeFailed  | `Error=True`, reason `UpgradeFailed`         |
//! | RollingBack    | `RollbackInProgress=True`                    |
//! | RollbackFailed | `Error=True`, reason `RollbackFailed`        |
//!
//! Each pass moves a running transition by at most one step: a template
//! update, one outdated pod deletion, or a verdict. Tiers go one after the
//! other, segment store first.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{info, warn};

use pravega_common::crd::{
    ConditionType, PravegaCluster, PravegaClusterStatus, ROLLBACK_FAILED_REASON,
    UPDATING_CONTROLLER_REASON, UPDATING_SEGMENT_STORE_REASON, UPGRADE_FAILED_REASON,
    VERSION_ANNOTATION,
};
use pravega_common::events::{actions, reasons};
use pravega_common::kube_utils::{
    deployment_deadline_exceeded, fatal_waiting_reason, is_pod_ready, label_selector,
    pod_annotation,
};
use pravega_common::version::{crosses_era, NamingEra};
use pravega_common::{Error, Result};

use super::deploy::{converge_config_map, remove_legacy_segment_store};
use super::resources::config::{controller_config_map, segment_store_config_map};
use super::resources::segmentstore::at_version;
use super::resources::{controller, segmentstore};
use super::Context;

/// True while the spec asks for a version the cluster does not run
pub fn upgrade_triggered(cluster: &PravegaCluster, status: &PravegaClusterStatus) -> bool {
    status.current_version != cluster.spec.version
}

/// True once a failed upgrade has been reverted in the spec
pub fn rollback_triggered(cluster: &PravegaCluster, status: &PravegaClusterStatus) -> bool {
    status.is_upgrade_failed() && status.last_version().ok() == Some(cluster.spec.version.as_str())
}

/// True while the segment store moves between naming eras
///
/// During that window the upgrade engine alone manages the segment store.
pub fn cross_era_in_flight(cluster: &PravegaCluster, status: &PravegaClusterStatus) -> bool {
    !status.current_version.is_empty()
        && crosses_era(&status.current_version, &cluster.spec.version)
}

fn clear_upgrade(status: &mut PravegaClusterStatus, now: DateTime<Utc>) {
    status.set_upgrading_false(now);
    status.target_version.clear();
}

fn clear_rollback(status: &mut PravegaClusterStatus, now: DateTime<Utc>) {
    status.set_rollback_false(now);
    status.target_version.clear();
}

async fn publish(
    cluster: &PravegaCluster,
    ctx: &Context,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    let reference = cluster.object_ref(&());
    ctx.events
        .publish(&reference, type_, reason, action, Some(note))
        .await;
}

/// Start, advance or finish an upgrade
///
/// # Returns
///
/// The error that failed the upgrade. The status then carries
/// `Error=True` with reason `UpgradeFailed` and must still be written.
pub async fn sync_cluster_version(
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<()> {
    if status.is_upgrade_failed() || status.is_rolling_back() {
        return Ok(());
    }

    let Some(upgrading) = status
        .condition(ConditionType::Upgrading)
        .map(|c| c.is_true())
    else {
        status.set_upgrading_false(now);
        status.current_version = cluster.spec.version.clone();
        return Ok(());
    };

    if upgrading {
        if status.target_version.is_empty() {
            info!("syncing to an unknown version, cancelling upgrade");
            clear_upgrade(status, now);
            return Ok(());
        }
        if status.target_version == status.current_version {
            info!(version = %status.target_version, "upgrade completed");
            clear_upgrade(status, now);
            return Ok(());
        }

        return match sync_components(cluster, status, ctx, now).await {
            Ok(true) => {
                let target = status.target_version.clone();
                status.add_to_version_history(&target);
                status.current_version = target;
                info!(version = %status.current_version, "all components upgraded");
                publish(
                    cluster,
                    ctx,
                    EventType::Normal,
                    reasons::UPGRADE_COMPLETE,
                    actions::UPGRADE,
                    format!("Upgraded to version {}", status.current_version),
                )
                .await;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                warn!(error = %e, "upgrade failed");
                status.set_error_true(UPGRADE_FAILED_REASON, &e.to_string(), now);
                publish(
                    cluster,
                    ctx,
                    EventType::Warning,
                    reasons::UPGRADE_ERROR,
                    actions::UPGRADE,
                    format!(
                        "Error Upgrading from version {} to {}. {e}",
                        status.current_version, status.target_version
                    ),
                )
                .await;
                clear_upgrade(status, now);
                Err(e)
            }
        };
    }

    if cluster.spec.version == status.current_version {
        return Ok(());
    }

    if status.is_rollback_failed() {
        status.set_error_false(now);
    } else if !status.is_pods_ready() {
        clear_upgrade(status, now);
        info!("cannot trigger upgrade if there are unready pods");
        return Ok(());
    }

    info!(
        from = %status.current_version,
        to = %cluster.spec.version,
        "starting upgrade"
    );
    status.target_version = cluster.spec.version.clone();
    status.set_upgrading_true("", "", now);
    publish(
        cluster,
        ctx,
        EventType::Normal,
        reasons::UPGRADE_STARTED,
        actions::UPGRADE,
        format!(
            "Upgrading from version {} to {}",
            status.current_version, cluster.spec.version
        ),
    )
    .await;
    Ok(())
}

/// Roll a failed upgrade back to the last version that ran
///
/// # Returns
///
/// `true` when a rollback was started on this pass; the status must then be
/// persisted before anything else happens. A failed rollback leaves the
/// cluster in RollbackFailed and is not retried.
pub async fn rollback_failed_upgrade(
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<bool> {
    if !status.is_upgrade_failed() {
        return Ok(false);
    }
    let version = status.last_version()?.to_string();
    if version != cluster.spec.version {
        return Ok(false);
    }

    if !status.is_rolling_back() {
        info!(%version, "starting rollback");
        status.target_version = version.clone();
        status.set_rollback_true("", "", now);
        publish(
            cluster,
            ctx,
            EventType::Normal,
            reasons::ROLLBACK_STARTED,
            actions::ROLLBACK,
            format!("Rolling back from version {} to {version}", status.current_version),
        )
        .await;
        return Ok(true);
    }

    match sync_components(cluster, status, ctx, now).await {
        Ok(true) => {
            status.current_version = status.target_version.clone();
            status.set_error_false(now);
            clear_rollback(status, now);
            info!(%version, "rollback completed");
            publish(
                cluster,
                ctx,
                EventType::Normal,
                reasons::ROLLBACK_COMPLETE,
                actions::ROLLBACK,
                format!("Rolled back to version {version}"),
            )
            .await;
            Ok(false)
        }
        Ok(false) => Ok(false),
        Err(e) => {
            warn!(error = %e, %version, "rollback failed");
            status.set_error_true(ROLLBACK_FAILED_REASON, &e.to_string(), now);
            publish(
                cluster,
                ctx,
                EventType::Warning,
                reasons::ROLLBACK_ERROR,
                actions::ROLLBACK,
                format!(
                    "Error Rollingback from version {} to {}. {e}",
                    status.current_version, status.target_version
                ),
            )
            .await;
            clear_rollback(status, now);
            Err(e)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tier {
    SegmentStore,
    Controller,
}

impl Tier {
    fn name(self) -> &'static str {
        match self {
            Tier::SegmentStore => "segmentstore",
            Tier::Controller => "controller",
        }
    }
}

/// Move every tier to the target version, one at a time
async fn sync_components(
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<bool> {
    let order = if status.is_rolling_back() && cluster.spec.pravega().segment_store_replicas() > 1
    {
        [Tier::Controller, Tier::SegmentStore]
    } else {
        [Tier::SegmentStore, Tier::Controller]
    };

    for tier in order {
        let synced = match tier {
            Tier::SegmentStore => sync_segment_store(cluster, status, ctx, now).await,
            Tier::Controller => sync_controller(cluster, status, ctx, now).await,
        }
        .map_err(|e| Error::upgrade(tier.name(), e))?;

        if !synced {
            return Ok(false);
        }
        info!(component = tier.name(), "version sync completed");
    }
    Ok(true)
}

fn template_image(template: &PodTemplateSpec) -> Option<&str> {
    template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .as_deref()
}

/// Replica counts of a rolling workload
struct Rollout {
    desired: i32,
    updated: i32,
    ready: i32,
}

impl Rollout {
    fn of_stateful_set(sts: &StatefulSet) -> Self {
        let status = sts.status.clone().unwrap_or_default();
        Self {
            desired: sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            updated: status.updated_replicas.unwrap_or(0),
            ready: status.ready_replicas.unwrap_or(0),
        }
    }

    fn of_deployment(deploy: &Deployment) -> Self {
        let status = deploy.status.clone().unwrap_or_default();
        Self {
            desired: deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1),
            updated: status.updated_replicas.unwrap_or(0),
            ready: status.ready_replicas.unwrap_or(0),
        }
    }

    fn complete(&self) -> bool {
        self.updated == self.desired && self.ready == self.desired
    }
}

/// Record the progress fingerprint, or report that it has not moved for
/// longer than the rollback timeout
fn progress_stalled(
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    reason: &str,
    updated: i32,
    now: DateTime<Utc>,
) -> bool {
    let updated = updated.to_string();
    let timeout = Duration::minutes(cluster.spec.pravega().rollback_timeout_minutes());

    if let Some(progress) = status.progress_condition() {
        if progress.reason == reason && progress.message == updated {
            return progress
                .last_update_time
                .is_some_and(|since| now > since + timeout);
        }
    }
    status.update_progress(reason, &updated, now);
    false
}

async fn tier_pods(ctx: &Context, ns: &str, template: &PodTemplateSpec) -> Result<Vec<Pod>> {
    let labels = template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    let mut pods = ctx.client.list_pods(ns, &label_selector(&labels)).await?;
    pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    Ok(pods)
}

fn runs_version(pod: &Pod, version: &str) -> bool {
    pod_annotation(pod, VERSION_ANNOTATION) == Some(version)
}

/// Fail fast when an updated pod can never become ready
fn check_updated_pods(pods: &[Pod], container: &str, version: &str) -> Result<()> {
    for pod in pods.iter().filter(|p| runs_version(p, version)) {
        if let Some(reason) = fatal_waiting_reason(pod, &[container]) {
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            return Err(Error::sync(format!(
                "pod {name} update failed because of {reason}"
            )));
        }
    }
    Ok(())
}

async fn sync_controller(
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ns = cluster.cluster_namespace();
    let target = status.target_version.clone();
    let target_image = cluster.target_image(&target)?;
    let rendered = at_version(cluster, &target);
    let name = cluster.controller_deployment_name();

    let Some(mut deploy) = ctx.client.get_deployment(ns, &name).await? else {
        return Err(Error::sync(format!("failed to get deployment ({name})")));
    };
    let Some(template) = deploy.spec.as_ref().map(|s| s.template.clone()) else {
        return Err(Error::sync(format!("deployment ({name}) has no spec")));
    };

    if template_image(&template) != Some(target_image.as_str()) {
        status.update_progress(UPDATING_CONTROLLER_REASON, "0", now);
        info!(deployment = %name, image = %target_image, "updating controller pod template");
        converge_config_map(ctx, ns, controller_config_map(&rendered)?).await?;
        if let Some(spec) = deploy.spec.as_mut() {
            spec.template = controller::pod_template(&rendered);
        }
        ctx.client.replace_deployment(ns, &deploy).await?;
        return Ok(false);
    }

    let rollout = Rollout::of_deployment(&deploy);
    info!(
        deployment = %name,
        updated = rollout.updated,
        ready = rollout.ready,
        desired = rollout.desired,
        "controller rollout"
    );
    if rollout.complete() {
        return Ok(true);
    }

    if deployment_deadline_exceeded(&deploy) {
        return Err(Error::sync(format!(
            "updating deployment ({name}) failed due to ProgressDeadlineExceeded"
        )));
    }

    let pods = tier_pods(ctx, ns, &template).await?;
    check_updated_pods(&pods, controller::CONTAINER_NAME, &target)?;

    if progress_stalled(cluster, status, UPDATING_CONTROLLER_REASON, rollout.updated, now) {
        return Err(Error::sync(format!(
            "updating deployment ({name}) failed due to progress deadline exceeded"
        )));
    }
    Ok(false)
}

async fn sync_segment_store(
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<bool> {
    let target = status.target_version.clone();
    let rendered = at_version(cluster, &target);

    match NamingEra::for_version(&target) {
        NamingEra::Modern if crosses_era(&status.current_version, &target) => {
            sync_segment_store_to_modern(cluster, &rendered, status, ctx, now).await
        }
        NamingEra::Legacy => {
            retire_modern_segment_store(&rendered, ctx).await?;
            sync_segment_store_in_place(cluster, &rendered, status, ctx, now).await
        }
        NamingEra::Modern => {
            sync_segment_store_in_place(cluster, &rendered, status, ctx, now).await
        }
    }
}

/// Roll the segment store StatefulSet one outdated pod at a time
///
/// The StatefulSet uses `OnDelete`, so the operator picks the next pod to
/// replace once every already updated pod is ready.
async fn sync_segment_store_in_place(
    cluster: &PravegaCluster,
    rendered: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ns = cluster.cluster_namespace();
    let target = rendered.spec.version.clone();
    let target_image = cluster.target_image(&target)?;
    let name = rendered.segment_store_sts_name();

    let Some(mut sts) = ctx.client.get_stateful_set(ns, &name).await? else {
        return Err(Error::sync(format!("failed to get stateful-set ({name})")));
    };
    let Some(template) = sts.spec.as_ref().map(|s| s.template.clone()) else {
        return Err(Error::sync(format!("stateful-set ({name}) has no spec")));
    };

    if template_image(&template) != Some(target_image.as_str()) {
        status.update_progress(UPDATING_SEGMENT_STORE_REASON, "0", now);
        info!(statefulset = %name, image = %target_image, "updating segment store pod template");
        converge_config_map(ctx, ns, segment_store_config_map(rendered)?).await?;
        if let Some(spec) = sts.spec.as_mut() {
            spec.template = segmentstore::pod_template(rendered);
        }
        ctx.client.replace_stateful_set(ns, &sts).await?;
        return Ok(false);
    }

    let rollout = Rollout::of_stateful_set(&sts);
    info!(
        statefulset = %name,
        updated = rollout.updated,
        ready = rollout.ready,
        desired = rollout.desired,
        "segment store rollout"
    );
    if rollout.complete() {
        return Ok(true);
    }

    let pods = tier_pods(ctx, ns, &template).await?;
    check_updated_pods(&pods, segmentstore::CONTAINER_NAME, &target)?;

    if progress_stalled(cluster, status, UPDATING_SEGMENT_STORE_REASON, rollout.updated, now) {
        return Err(Error::sync(format!(
            "updating statefulset ({name}) failed due to progress deadline exceeded"
        )));
    }

    let updated_ready = pods
        .iter()
        .filter(|p| runs_version(p, &target))
        .all(is_pod_ready);
    if updated_ready {
        let Some(outdated) = pods.iter().find(|p| !runs_version(p, &target)) else {
            return Err(Error::sync("could not obtain outdated pod"));
        };
        let pod_name = outdated.metadata.name.clone().unwrap_or_default();
        info!(pod = %pod_name, "upgrading pod");
        ctx.client.delete_pod(ns, &pod_name).await?;
    }
    Ok(false)
}

fn desired_replicas(sts: &StatefulSet) -> i32 {
    sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0)
}

fn ready_replicas(sts: &StatefulSet) -> i32 {
    sts.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0)
}

fn set_replicas(sts: &mut StatefulSet, replicas: i32) {
    if let Some(spec) = sts.spec.as_mut() {
        spec.replicas = Some(replicas);
    }
}

/// Move the segment store into the modern StatefulSet one pod at a time
///
/// The modern StatefulSet starts empty. Each settled pass moves one replica
/// across, growing the modern set by one and shrinking the legacy set by
/// one, so the tier never runs more pods than the spec asks for. The legacy
/// objects are removed once every modern pod is ready.
async fn sync_segment_store_to_modern(
    cluster: &PravegaCluster,
    rendered: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<bool> {
    let ns = cluster.cluster_namespace();
    let wanted = cluster.spec.pravega().segment_store_replicas();
    let name = rendered.segment_store_sts_name();

    let Some(mut modern) = ctx.client.get_stateful_set(ns, &name).await? else {
        status.update_progress(UPDATING_SEGMENT_STORE_REASON, "0", now);
        info!(statefulset = %name, "creating empty segment store under its new name");
        converge_config_map(ctx, ns, segment_store_config_map(rendered)?).await?;
        for svc in segmentstore::external_services(rendered)? {
            if let Err(e) = ctx.client.create_service(ns, &svc).await {
                if !e.is_already_exists() {
                    return Err(e);
                }
            }
        }
        let mut sts = segmentstore::stateful_set(rendered)?;
        set_replicas(&mut sts, 0);
        ctx.client.create_stateful_set(ns, &sts).await?;
        return Ok(false);
    };

    let legacy_name = cluster.segment_store_sts_name_for(NamingEra::Legacy);
    let mut legacy = ctx.client.get_stateful_set(ns, &legacy_name).await?;
    let legacy_replicas = legacy.as_ref().map_or(0, desired_replicas);
    let legacy_ready = legacy.as_ref().map_or(0, ready_replicas);
    let modern_replicas = desired_replicas(&modern);
    let modern_ready = ready_replicas(&modern);
    info!(
        statefulset = %name,
        modern_replicas,
        modern_ready,
        legacy_replicas,
        legacy_ready,
        "segment store migration"
    );

    if legacy_replicas == 0 {
        if modern_ready >= wanted {
            remove_legacy_segment_store(cluster, ctx).await?;
            return Ok(true);
        }
        if modern_replicas != wanted {
            set_replicas(&mut modern, wanted);
            ctx.client.replace_stateful_set(ns, &modern).await?;
            return Ok(false);
        }
    }

    if legacy_ready + modern_ready < wanted {
        if let Some(spec) = modern.spec.as_ref() {
            let pods = tier_pods(ctx, ns, &spec.template).await?;
            check_updated_pods(&pods, segmentstore::CONTAINER_NAME, &rendered.spec.version)?;
        }
        if progress_stalled(cluster, status, UPDATING_SEGMENT_STORE_REASON, modern_ready, now) {
            return Err(Error::sync(format!(
                "updating statefulset ({name}) failed due to progress deadline exceeded"
            )));
        }
        return Ok(false);
    }
    if modern_ready < modern_replicas {
        return Ok(false);
    }

    let legacy_next = (legacy_replicas - 1).max(0);
    let modern_next = wanted - legacy_next;
    info!(
        statefulset = %name,
        replicas = modern_next,
        legacy_replicas = legacy_next,
        "moving one segment store replica to the new statefulset"
    );
    set_replicas(&mut modern, modern_next);
    ctx.client.replace_stateful_set(ns, &modern).await?;
    if let Some(legacy) = legacy.as_mut() {
        set_replicas(legacy, legacy_next);
        ctx.client.replace_stateful_set(ns, legacy).await?;
    }
    Ok(false)
}

/// Going back to a legacy version: drop the modern StatefulSet and make
/// sure the legacy one exists
async fn retire_modern_segment_store(rendered: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = rendered.cluster_namespace();
    let modern = rendered.segment_store_sts_name_for(NamingEra::Modern);
    if ctx.client.get_stateful_set(ns, &modern).await?.is_some() {
        info!(statefulset = %modern, "deleting segment store created by the failed upgrade");
        ctx.client.delete_stateful_set(ns, &modern).await?;
        if rendered.spec.external_access_enabled() {
            for ordinal in 0..rendered.spec.pravega().segment_store_replicas() {
                ctx.client
                    .delete_service(
                        ns,
                        &rendered.segment_store_service_name_for(NamingEra::Modern, ordinal),
                    )
                    .await?;
            }
        }
    }

    let legacy = rendered.segment_store_sts_name();
    if ctx.client.get_stateful_set(ns, &legacy).await?.is_none() {
        info!(statefulset = %legacy, "recreating legacy segment store");
        ctx.client
            .create_stateful_set(ns, &segmentstore::stateful_set(rendered)?)
            .await?;
    }
    Ok(())
}
