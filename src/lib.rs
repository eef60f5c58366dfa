//! Pravega operator - Kubernetes lifecycle management for Pravega clusters
//!
//! A `PravegaCluster` describes a Pravega controller tier (Deployment) and a
//! segment store tier (StatefulSet). The operator keeps the child resources
//! in line with the resource spec, rolls version upgrades pod by pod, rolls back a
//! failed upgrade when asked to, and clears the cluster's ZooKeeper metadata
//! when the cluster is deleted.
//!
//! # Modules
//!
//! - [`controller`] - Reconciliation of PravegaCluster and its children
//! - [`webhook`] - Validating admission webhook
//! - [`zookeeper`] - Removal of cluster metadata from ZooKeeper
//!
//! Shared types (CRD, errors, version and quantity parsing) live in the
//! `pravega-common` crate.

#![deny(missing_docs)]

pub mod controller;
pub mod webhook;
pub mod zookeeper;

pub use pravega_common::{Error, Result};

/// Default listen address of the admission webhook
pub const DEFAULT_WEBHOOK_ADDR: &str = "0.0.0.0:9443";
