//! Replica count synchronization
//!
//! Scaling the segment store down leaves per-replica claims and external
//! Services behind; they are removed here once the replica count no longer
//! covers their ordinal.

use std::collections::BTreeMap;

use tracing::{debug, info};

use pravega_common::crd::{PravegaCluster, PravegaClusterStatus};
use pravega_common::kube_utils::{is_orphan, label_selector};
use pravega_common::{Error, Result};

use super::upgrade::cross_era_in_flight;
use super::Context;

/// Bring both workloads to the replica counts in the spec
pub async fn sync_cluster_size(
    cluster: &PravegaCluster,
    status: &PravegaClusterStatus,
    ctx: &Context,
) -> Result<()> {
    if cross_era_in_flight(cluster, status) {
        debug!("segment store size is owned by the upgrade");
    } else {
        sync_segment_store_size(cluster, ctx).await?;
    }
    sync_controller_size(cluster, ctx).await
}

async fn sync_segment_store_size(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let name = cluster.segment_store_sts_name();
    let Some(mut sts) = ctx.client.get_stateful_set(ns, &name).await? else {
        return Err(Error::sync(format!("failed to get stateful-set ({name})")));
    };

    let wanted = cluster.spec.pravega().segment_store_replicas();
    let Some(spec) = sts.spec.as_mut() else {
        return Err(Error::sync(format!("stateful-set ({name}) has no spec")));
    };
    let current = spec.replicas.unwrap_or(1);
    if current == wanted {
        return Ok(());
    }

    info!(statefulset = %name, from = current, to = wanted, "resizing segment store");
    spec.replicas = Some(wanted);
    let labels: BTreeMap<String, String> = spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    ctx.client.replace_stateful_set(ns, &sts).await.map_err(|e| {
        Error::sync(format!("failed to update size of stateful-set ({name}): {e}"))
    })?;

    if wanted > current {
        return Ok(());
    }

    let selector = label_selector(&labels);
    for pvc in ctx.client.list_pvcs(ns, &selector).await? {
        let pvc_name = pvc.metadata.name.unwrap_or_default();
        if is_orphan(&pvc_name, wanted) {
            info!(pvc = %pvc_name, "deleting orphaned claim");
            ctx.client.delete_pvc(ns, &pvc_name).await?;
        }
    }

    if cluster.spec.external_access_enabled() {
        for svc in ctx.client.list_services(ns, &selector).await? {
            let svc_name = svc.metadata.name.unwrap_or_default();
            if is_orphan(&svc_name, wanted) {
                info!(service = %svc_name, "deleting orphaned external service");
                ctx.client.delete_service(ns, &svc_name).await?;
            }
        }
    }
    Ok(())
}

async fn sync_controller_size(cluster: &PravegaCluster, ctx: &Context) -> Result<()> {
    let ns = cluster.cluster_namespace();
    let name = cluster.controller_deployment_name();
    let Some(mut deploy) = ctx.client.get_deployment(ns, &name).await? else {
        return Err(Error::sync(format!("failed to get deployment ({name})")));
    };

    let wanted = cluster.spec.pravega().controller_replicas();
    if let Some(spec) = deploy.spec.as_mut() {
        if spec.replicas != Some(wanted) {
            info!(deployment = %name, to = wanted, "resizing controller");
            spec.replicas = Some(wanted);
            ctx.client.replace_deployment(ns, &deploy).await.map_err(|e| {
                Error::sync(format!("failed to update size of deployment ({name}): {e}"))
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pravega_common::crd::{ExternalAccess, PravegaSpec};
    use pravega_common::events::NoopEventPublisher;

    use super::*;
    use crate::controller::resources::{controller, fixtures, segmentstore};
    use crate::controller::testing::FakeCluster;
    use crate::zookeeper::MockMetadataStore;

    fn context(fake: &Arc<FakeCluster>) -> Context {
        Context::for_testing(
            fake.clone(),
            Arc::new(NoopEventPublisher),
            Arc::new(MockMetadataStore::new()),
        )
    }

    fn sized(segment_stores: i32, controllers: i32, external: bool) -> PravegaCluster {
        let mut cluster = fixtures::cluster_with(
            "0.9.0",
            PravegaSpec {
                segment_store_replicas: Some(segment_stores),
                controller_replicas: Some(controllers),
                ..Default::default()
            },
        );
        if external {
            cluster.spec.external_access = Some(ExternalAccess {
                enabled: true,
                ..Default::default()
            });
            cluster.with_defaults();
        }
        cluster
    }

    fn steady() -> PravegaClusterStatus {
        PravegaClusterStatus {
            current_version: "0.9.0".to_string(),
            ..Default::default()
        }
    }

    /// Workloads, per-replica claims and Services of a running cluster
    fn running(fake: &FakeCluster, cluster: &PravegaCluster) {
        fake.put_stateful_set(segmentstore::stateful_set(cluster).unwrap());
        fake.put_deployment(controller::deployment(cluster).unwrap());
        let labels = cluster.segment_store_labels();
        for ordinal in 0..cluster.spec.pravega().segment_store_replicas() {
            fake.add_pvc(&format!("data-bar-pravega-segment-store-{ordinal}"), &labels);
        }
        for svc in segmentstore::external_services(cluster).unwrap() {
            fake.put_service(svc);
        }
    }

    #[tokio::test]
    async fn story_scale_down_removes_orphaned_claims_and_services() {
        let fake = Arc::new(FakeCluster::new());
        running(&fake, &sized(3, 1, true));
        let cluster = sized(1, 1, true);

        sync_cluster_size(&cluster, &steady(), &context(&fake))
            .await
            .unwrap();

        let sts = fake.stateful_set("bar-pravega-segment-store").unwrap();
        assert_eq!(sts.spec.unwrap().replicas, Some(1));
        assert_eq!(fake.pvc_names(), vec!["data-bar-pravega-segment-store-0"]);
        assert_eq!(fake.service_names(), vec!["bar-pravega-segment-store-0"]);
    }

    #[tokio::test]
    async fn scale_up_keeps_existing_services() {
        let fake = Arc::new(FakeCluster::new());
        running(&fake, &sized(1, 1, true));
        let cluster = sized(3, 1, true);

        sync_cluster_size(&cluster, &steady(), &context(&fake))
            .await
            .unwrap();

        let sts = fake.stateful_set("bar-pravega-segment-store").unwrap();
        assert_eq!(sts.spec.unwrap().replicas, Some(3));
        assert_eq!(fake.service_names(), vec!["bar-pravega-segment-store-0"]);
    }

    #[tokio::test]
    async fn scale_down_deletes_claims_of_removed_ordinals() {
        let fake = Arc::new(FakeCluster::new());
        running(&fake, &sized(3, 1, false));
        let cluster = sized(1, 1, false);

        sync_cluster_size(&cluster, &steady(), &context(&fake))
            .await
            .unwrap();

        assert_eq!(fake.pvc_names(), vec!["data-bar-pravega-segment-store-0"]);
    }

    #[tokio::test]
    async fn scale_up_never_deletes_claims() {
        let fake = Arc::new(FakeCluster::new());
        let before = sized(1, 1, false);
        running(&fake, &before);
        fake.add_pvc("data-bar-pravega-segment-store-4", &before.segment_store_labels());
        let cluster = sized(3, 1, false);

        sync_cluster_size(&cluster, &steady(), &context(&fake))
            .await
            .unwrap();

        assert_eq!(
            fake.pvc_names(),
            vec!["data-bar-pravega-segment-store-0", "data-bar-pravega-segment-store-4"]
        );
    }

    #[tokio::test]
    async fn controller_replicas_follow_the_spec() {
        let fake = Arc::new(FakeCluster::new());
        running(&fake, &sized(1, 1, false));
        let cluster = sized(1, 3, false);

        sync_cluster_size(&cluster, &steady(), &context(&fake))
            .await
            .unwrap();

        let deploy = fake.deployment("bar-pravega-controller").unwrap();
        assert_eq!(deploy.spec.unwrap().replicas, Some(3));
    }

    #[tokio::test]
    async fn matching_sizes_write_nothing() {
        let fake = Arc::new(FakeCluster::new());
        let cluster = sized(2, 1, false);
        running(&fake, &cluster);

        sync_cluster_size(&cluster, &steady(), &context(&fake))
            .await
            .unwrap();

        let sts = fake.stateful_set("bar-pravega-segment-store").unwrap();
        assert!(sts.metadata.resource_version.is_none());
        assert_eq!(fake.pvc_names().len(), 2);
    }

    #[tokio::test]
    async fn missing_statefulset_is_an_error() {
        let fake = Arc::new(FakeCluster::new());
        let cluster = sized(1, 1, false);
        fake.put_deployment(controller::deployment(&cluster).unwrap());

        let err = sync_cluster_size(&cluster, &steady(), &context(&fake))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to get stateful-set (bar-pravega-segment-store)"
        );
    }

    #[tokio::test]
    async fn cross_era_transition_leaves_the_segment_store_alone() {
        let fake = Arc::new(FakeCluster::new());
        let cluster = fixtures::cluster("0.7.0");
        fake.put_deployment(controller::deployment(&cluster).unwrap());
        let status = PravegaClusterStatus {
            current_version: "0.6.1".to_string(),
            ..Default::default()
        };

        sync_cluster_size(&cluster, &status, &context(&fake))
            .await
            .unwrap();
    }
}
