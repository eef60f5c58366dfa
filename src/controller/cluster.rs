//! PravegaCluster controller implementation
//!
//! One pass observes the cluster, converges its children on the spec, drives
//! any running upgrade or rollback one step, and writes the status once.
//! Every stage is idempotent; the pass is requeued after
//! [`RECONCILE_INTERVAL`] even when nothing changed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use pravega_common::crd::{PravegaCluster, PravegaClusterStatus};
use pravega_common::events::{EventPublisher, KubeEventPublisher};
use pravega_common::{Error, Result};

use super::client::{ClusterClient, KubeClusterClient};
use super::{deploy, finalizer, size, status, upgrade};
use crate::zookeeper::{MetadataStore, ZkMetadataStore};

/// Requeue interval of a successful pass
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
/// Requeue interval after a status write lost a race
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);
/// Requeue interval after any other failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Reporting component of published events
pub const CONTROLLER_NAME: &str = "pravega-operator";

/// Bounds of the waits a pass may block on
#[derive(Clone, Debug)]
pub struct Timeouts {
    /// How long a restarted pod may take to go away and to come back ready
    pub restart: Duration,
    /// Poll interval while restarting pods
    pub restart_poll: Duration,
    /// How long a deleted cluster's pods may take to terminate
    pub drain: Duration,
    /// Poll interval while waiting for pods to terminate
    pub drain_poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            restart: Duration::from_secs(10 * 60),
            restart_poll: Duration::from_secs(2),
            drain: Duration::from_secs(2 * 60),
            drain_poll: Duration::from_secs(5),
        }
    }
}

/// Operator-wide settings
#[derive(Clone, Debug, Default)]
pub struct OperatorConfig {
    /// Do not add the ZooKeeper cleanup finalizer to clusters
    pub disable_finalizer: bool,
    /// Wait bounds
    pub timeouts: Timeouts,
}

/// Controller context shared by every reconcile pass
///
/// # Example
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(OperatorConfig { disable_finalizer: true, ..Default::default() })
///     .build();
/// ```
pub struct Context {
    /// Access to the cluster's children (trait object for testability)
    pub client: Arc<dyn ClusterClient>,
    /// Sink for Kubernetes events
    pub events: Arc<dyn EventPublisher>,
    /// Store holding Pravega metadata, cleared on deletion
    pub metadata: Arc<dyn MetadataStore>,
    /// Operator settings
    pub config: OperatorConfig,
    /// Cancelled on shutdown; interrupts long waits
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a new controller context with the given Kubernetes client
    ///
    /// This is a convenience method equivalent to `Context::builder(client).build()`.
    pub fn new(client: Client) -> Self {
        Self::builder(client).build()
    }

    /// Create a context for testing without a Kubernetes client
    #[cfg(test)]
    pub fn for_testing(
        client: Arc<dyn ClusterClient>,
        events: Arc<dyn EventPublisher>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            client,
            events,
            metadata,
            config: OperatorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    cluster_client: Option<Arc<dyn ClusterClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    metadata: Option<Arc<dyn MetadataStore>>,
    config: OperatorConfig,
    cancel: CancellationToken,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            cluster_client: None,
            events: None,
            metadata: None,
            config: OperatorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the operator settings
    pub fn config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a token cancelled by the caller on shutdown
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Override the cluster client (primarily for testing)
    pub fn cluster_client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.cluster_client = Some(client);
        self
    }

    /// Override the event publisher (primarily for testing)
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the metadata store (primarily for testing)
    pub fn metadata_store(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            client: self
                .cluster_client
                .unwrap_or_else(|| Arc::new(KubeClusterClient::new(self.client.clone()))),
            events: self.events.unwrap_or_else(|| {
                Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))
            }),
            metadata: self
                .metadata
                .unwrap_or_else(|| Arc::new(ZkMetadataStore::new())),
            config: self.config,
            cancel: self.cancel,
        }
    }
}

/// Reconcile a PravegaCluster
///
/// # Returns
///
/// The requeue action, or the error that stopped the pass. Upgrade and
/// rollback failures are written to the status before they are returned.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<PravegaCluster>, ctx: Arc<Context>) -> Result<Action> {
    info!("reconciling cluster");

    let mut cluster = (*cluster).clone();
    if cluster.with_defaults() {
        info!("applying default settings");
        ctx.client.replace_cluster(&cluster).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    if cluster.is_being_deleted() {
        if finalizer::has_finalizer(&cluster) {
            finalizer::cleanup(&cluster, &ctx).await?;
        }
        return Ok(Action::await_change());
    }

    if !ctx.config.disable_finalizer && !finalizer::has_finalizer(&cluster) {
        cluster = finalizer::add_finalizer(&cluster, &ctx).await?;
    }

    let mut status = cluster.status_or_default();

    deploy::reconcile_config_maps(&cluster, &status, &ctx).await?;
    deploy::reconcile_disruption_budgets(&cluster, &ctx).await?;
    deploy::reconcile_services(&cluster, &ctx).await?;
    deploy::deploy_cluster(&cluster, &status, &ctx).await?;
    size::sync_cluster_size(&cluster, &status, &ctx).await?;

    let now = Utc::now();
    if let Err(e) = upgrade::sync_cluster_version(&cluster, &mut status, &ctx, now).await {
        write_status(&cluster, &status, &ctx).await?;
        return Err(e);
    }

    match upgrade::rollback_failed_upgrade(&cluster, &mut status, &ctx, now).await {
        Ok(true) => {
            write_status(&cluster, &status, &ctx).await?;
            return Ok(Action::requeue(Duration::ZERO));
        }
        Ok(false) => {}
        Err(e) => {
            write_status(&cluster, &status, &ctx).await?;
            return Err(e);
        }
    }

    status::reconcile_cluster_status(&cluster, &mut status, &ctx, now).await?;
    write_status(&cluster, &status, &ctx).await?;

    Ok(Action::requeue(RECONCILE_INTERVAL))
}

/// Handle a failed pass
///
/// A lost status race is retried almost immediately; everything else waits
/// for the regular interval.
pub fn error_policy(cluster: Arc<PravegaCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        "reconciliation failed"
    );

    if error.is_conflict() {
        Action::requeue(CONFLICT_REQUEUE)
    } else {
        Action::requeue(ERROR_REQUEUE)
    }
}

async fn write_status(
    cluster: &PravegaCluster,
    status: &PravegaClusterStatus,
    ctx: &Context,
) -> Result<()> {
    if cluster.status.as_ref() == Some(status) {
        debug!("status unchanged");
        return Ok(());
    }

    ctx.client
        .patch_cluster_status(
            cluster.cluster_namespace(),
            cluster.cluster_name(),
            cluster.resource_version(),
            status,
        )
        .await
}
