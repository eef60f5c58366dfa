//! Pod membership and readiness of a cluster

use chrono::{DateTime, Utc};
use tracing::debug;

use pravega_common::crd::{MembersStatus, PravegaCluster, PravegaClusterStatus};
use pravega_common::kube_utils::{is_pod_ready, label_selector};
use pravega_common::Result;

use super::Context;

/// Recompute replica counts, members and the PodsReady condition
///
/// The cluster is ready only when the number of ready pods matches the
/// expected size exactly; surplus pods left over from a scale-down keep it
/// unready until they are gone.
pub async fn reconcile_cluster_status(
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<()> {
    status.init(now);

    let selector = label_selector(&cluster.cluster_labels());
    let pods = ctx
        .client
        .list_pods(cluster.cluster_namespace(), &selector)
        .await?;

    let mut members = MembersStatus::default();
    for pod in &pods {
        let name = pod.metadata.name.clone().unwrap_or_default();
        if is_pod_ready(pod) {
            members.ready.push(name);
        } else {
            members.unready.push(name);
        }
    }

    let expected = cluster.expected_size();
    let ready = members.ready.len() as i32;
    debug!(expected, ready, observed = pods.len(), "pod membership");

    if ready == expected {
        status.set_pods_ready_true(now);
    } else {
        status.set_pods_ready_false(now);
    }

    status.replicas = expected;
    status.current_replicas = pods.len() as i32;
    status.ready_replicas = ready;
    status.members = members;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use pravega_common::crd::{ConditionType, PravegaSpec};
    use pravega_common::events::NoopEventPublisher;

    use super::*;
    use crate::controller::resources::fixtures;
    use crate::controller::testing::{ready_pod, FakeCluster};
    use crate::zookeeper::MockMetadataStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn context(fake: &Arc<FakeCluster>) -> Context {
        Context::for_testing(
            fake.clone(),
            Arc::new(NoopEventPublisher),
            Arc::new(MockMetadataStore::new()),
        )
    }

    fn three_node_cluster() -> PravegaCluster {
        fixtures::cluster_with(
            "0.9.0",
            PravegaSpec {
                controller_replicas: Some(1),
                segment_store_replicas: Some(2),
                ..Default::default()
            },
        )
    }

    fn add_pods(fake: &FakeCluster, cluster: &PravegaCluster, segment_stores: i32) {
        fake.add_pod(ready_pod(
            "bar-pravega-controller-0",
            &cluster.controller_labels(),
            "0.9.0",
        ));
        for i in 0..segment_stores {
            fake.add_pod(ready_pod(
                &format!("bar-pravega-segment-store-{i}"),
                &cluster.segment_store_labels(),
                "0.9.0",
            ));
        }
    }

    #[tokio::test]
    async fn story_all_expected_pods_ready() {
        let fake = Arc::new(FakeCluster::new());
        let cluster = three_node_cluster();
        add_pods(&fake, &cluster, 2);
        let mut status = PravegaClusterStatus::default();

        reconcile_cluster_status(&cluster, &mut status, &context(&fake), now())
            .await
            .unwrap();

        assert!(status.is_pods_ready());
        assert_eq!(status.replicas, 3);
        assert_eq!(status.current_replicas, 3);
        assert_eq!(status.ready_replicas, 3);
        assert_eq!(
            status.members.ready,
            vec![
                "bar-pravega-controller-0",
                "bar-pravega-segment-store-0",
                "bar-pravega-segment-store-1"
            ]
        );
        assert!(status.members.unready.is_empty());
    }

    #[tokio::test]
    async fn unready_pod_is_listed_and_clears_readiness() {
        let fake = Arc::new(FakeCluster::new());
        let cluster = three_node_cluster();
        add_pods(&fake, &cluster, 2);
        fake.set_pod_ready("bar-pravega-segment-store-1", false);
        let mut status = PravegaClusterStatus::default();

        reconcile_cluster_status(&cluster, &mut status, &context(&fake), now())
            .await
            .unwrap();

        assert!(!status.is_pods_ready());
        assert_eq!(status.ready_replicas, 2);
        assert_eq!(status.members.unready, vec!["bar-pravega-segment-store-1"]);
    }

    #[tokio::test]
    async fn surplus_ready_pods_are_not_ready() {
        let fake = Arc::new(FakeCluster::new());
        let cluster = three_node_cluster();
        add_pods(&fake, &cluster, 3);
        let mut status = PravegaClusterStatus::default();

        reconcile_cluster_status(&cluster, &mut status, &context(&fake), now())
            .await
            .unwrap();

        assert!(!status.is_pods_ready());
        assert_eq!(status.replicas, 3);
        assert_eq!(status.current_replicas, 4);
    }

    #[tokio::test]
    async fn pods_of_other_clusters_are_ignored() {
        let fake = Arc::new(FakeCluster::new());
        let cluster = three_node_cluster();
        add_pods(&fake, &cluster, 2);
        let other = PravegaCluster::new("other", cluster.spec.clone());
        fake.add_pod(ready_pod(
            "other-pravega-controller-0",
            &other.controller_labels(),
            "0.9.0",
        ));
        let mut status = PravegaClusterStatus::default();

        reconcile_cluster_status(&cluster, &mut status, &context(&fake), now())
            .await
            .unwrap();

        assert_eq!(status.current_replicas, 3);
        assert!(status.is_pods_ready());
    }

    #[tokio::test]
    async fn init_seeds_conditions_and_history() {
        let fake = Arc::new(FakeCluster::new());
        let cluster = three_node_cluster();
        let mut status = PravegaClusterStatus {
            current_version: "0.9.0".to_string(),
            ..Default::default()
        };

        reconcile_cluster_status(&cluster, &mut status, &context(&fake), now())
            .await
            .unwrap();

        assert_eq!(status.version_history, vec!["0.9.0"]);
        for type_ in ConditionType::ALL {
            assert!(status.condition(type_).is_some(), "{type_:?} missing");
        }
        assert!(status.members.ready.is_empty());
    }
}
