//! PravegaCluster controller
//!
//! A reconcile pass runs the stages in this module in a fixed order:
//! configuration, budgets and Services, workloads, sizes, version sync,
//! rollback, and finally pod status. Each stage is idempotent.

pub mod client;
mod cluster;
pub mod deploy;
pub mod finalizer;
pub mod resources;
pub mod restart;
pub mod size;
pub mod status;
pub mod upgrade;

#[cfg(test)]
pub(crate) mod testing;

pub use cluster::{
    error_policy, reconcile, Context, ContextBuilder, OperatorConfig, Timeouts, CONFLICT_REQUEUE,
    CONTROLLER_NAME, ERROR_REQUEUE, RECONCILE_INTERVAL,
};
