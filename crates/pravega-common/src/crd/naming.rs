//! Child resource names, labels and images
//!
//! Every name here is a pure function of the cluster name, the spec's
//! suffixes and the naming era of the version in question.

use std::collections::BTreeMap;

use super::cluster::PravegaCluster;
use crate::version::NamingEra;
use crate::{Error, Result};

/// Component label value for controller pods
pub const CONTROLLER_COMPONENT: &str = "pravega-controller";
/// Component label value for segment store pods
pub const SEGMENT_STORE_COMPONENT: &str = "pravega-segmentstore";
/// Pod annotation recording the version a pod was rendered for
pub const VERSION_ANNOTATION: &str = "pravega.version";
/// Controller gRPC port
pub const CONTROLLER_GRPC_PORT: i32 = 9090;
/// Controller REST port
pub const CONTROLLER_REST_PORT: i32 = 10080;
/// Segment store REST port used by the health endpoints
pub const SEGMENT_STORE_REST_PORT: i32 = 6061;

impl PravegaCluster {
    /// Labels shared by every pod of the cluster
    pub fn cluster_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "pravega-cluster".to_string()),
            ("pravega_cluster".to_string(), self.cluster_name().to_string()),
        ])
    }

    fn tier_labels(
        &self,
        extra: &BTreeMap<String, String>,
        component: &str,
    ) -> BTreeMap<String, String> {
        let mut labels = self.cluster_labels();
        labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        labels.insert("component".to_string(), component.to_string());
        labels
    }

    /// Labels of controller pods and objects
    pub fn controller_labels(&self) -> BTreeMap<String, String> {
        self.tier_labels(
            &self.spec.pravega().controller_pod_labels,
            CONTROLLER_COMPONENT,
        )
    }

    /// Labels of segment store pods and objects
    pub fn segment_store_labels(&self) -> BTreeMap<String, String> {
        self.tier_labels(
            &self.spec.pravega().segment_store_pod_labels,
            SEGMENT_STORE_COMPONENT,
        )
    }

    fn tier_annotations(&self, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut annotations =
            BTreeMap::from([(VERSION_ANNOTATION.to_string(), self.spec.version.clone())]);
        annotations.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        annotations
    }

    /// Annotations of controller pods
    pub fn controller_annotations(&self) -> BTreeMap<String, String> {
        self.tier_annotations(&self.spec.pravega().controller_pod_annotations)
    }

    /// Annotations of segment store pods
    pub fn segment_store_annotations(&self) -> BTreeMap<String, String> {
        self.tier_annotations(&self.spec.pravega().segment_store_pod_annotations)
    }

    /// Controller Deployment name
    pub fn controller_deployment_name(&self) -> String {
        format!("{}-pravega-controller", self.cluster_name())
    }

    /// Controller ConfigMap name
    pub fn controller_config_map_name(&self) -> String {
        format!("{}-pravega-controller", self.cluster_name())
    }

    /// Controller PodDisruptionBudget name
    pub fn controller_pdb_name(&self) -> String {
        format!("{}-pravega-controller", self.cluster_name())
    }

    /// Controller Service name
    pub fn controller_service_name(&self) -> String {
        format!(
            "{}-{}",
            self.cluster_name(),
            self.spec.pravega().controller_svc_name_suffix()
        )
    }

    /// Address segment stores use to reach the controller
    pub fn controller_url(&self) -> String {
        format!(
            "tcp://{}.{}:{}",
            self.controller_service_name(),
            self.cluster_namespace(),
            CONTROLLER_GRPC_PORT
        )
    }

    /// Segment store ConfigMap name
    pub fn segment_store_config_map_name(&self) -> String {
        format!("{}-pravega-segmentstore", self.cluster_name())
    }

    /// Segment store PodDisruptionBudget name
    pub fn segment_store_pdb_name(&self) -> String {
        format!("{}-segmentstore", self.cluster_name())
    }

    /// Segment store headless Service name
    pub fn segment_store_headless_service_name(&self) -> String {
        format!(
            "{}-{}",
            self.cluster_name(),
            self.spec.pravega().segment_store_headless_svc_name_suffix()
        )
    }

    /// Segment store StatefulSet name in the given era
    pub fn segment_store_sts_name_for(&self, era: NamingEra) -> String {
        match era {
            NamingEra::Legacy => format!("{}-pravega-segmentstore", self.cluster_name()),
            NamingEra::Modern => format!(
                "{}-{}",
                self.cluster_name(),
                self.spec.pravega().segment_store_sts_name_suffix()
            ),
        }
    }

    /// Segment store StatefulSet name for the spec version
    pub fn segment_store_sts_name(&self) -> String {
        self.segment_store_sts_name_for(NamingEra::for_version(&self.spec.version))
    }

    /// Per-replica external Service name in the given era
    pub fn segment_store_service_name_for(&self, era: NamingEra, ordinal: i32) -> String {
        format!("{}-{}", self.segment_store_sts_name_for(era), ordinal)
    }

    /// Per-replica external Service name for the spec version
    pub fn segment_store_service_name(&self, ordinal: i32) -> String {
        self.segment_store_service_name_for(NamingEra::for_version(&self.spec.version), ordinal)
    }

    /// Image for the spec version
    pub fn image(&self) -> String {
        format!(
            "{}:{}",
            self.spec.pravega().image_repository(),
            self.spec.version
        )
    }

    /// Image for the given version
    pub fn image_for(&self, version: &str) -> String {
        format!("{}:{}", self.spec.pravega().image_repository(), version)
    }

    /// Image for the status target version
    pub fn target_image(&self, target_version: &str) -> Result<String> {
        if target_version.is_empty() {
            return Err(Error::sync("target version is not set"));
        }
        Ok(self.image_for(target_version))
    }
}
