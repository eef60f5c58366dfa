//! Common types for the Pravega operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod quantity;
pub mod telemetry;
pub mod version;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "pravega-operator";

/// Finalizer guarding ZooKeeper metadata cleanup
pub const ZOOKEEPER_FINALIZER: &str = "cleanUpZookeeper";

/// Name of the PravegaCluster CRD
pub const CRD_NAME: &str = "pravegaclusters.pravega.pravega.io";
