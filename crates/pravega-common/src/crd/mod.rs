//! Custom Resource Definitions for the Pravega operator

mod cluster;
mod defaults;
mod naming;
mod status;
mod types;

pub use cluster::{
    PravegaCluster, PravegaClusterSpec, DEFAULT_BOOKKEEPER_URI, DEFAULT_PRAVEGA_VERSION,
    DEFAULT_ZOOKEEPER_URI,
};
pub use defaults::{
    default_cache_claim, default_controller_resources, default_segment_store_resources,
    pod_anti_affinity, DEFAULT_CACHE_VOLUME_SIZE,
};
pub use naming::{
    CONTROLLER_COMPONENT, CONTROLLER_GRPC_PORT, CONTROLLER_REST_PORT, SEGMENT_STORE_COMPONENT,
    SEGMENT_STORE_REST_PORT, VERSION_ANNOTATION,
};
pub use status::{
    ClusterCondition, ConditionStatus, ConditionType, MembersStatus, PravegaClusterStatus,
    ROLLBACK_FAILED_REASON, UPDATING_CONTROLLER_REASON, UPDATING_SEGMENT_STORE_REASON,
    UPGRADE_FAILED_REASON,
};
pub use types::*;
