//! Removal of a cluster's metadata from ZooKeeper
//!
//! Pravega keeps its cluster metadata under `/pravega/<cluster>`. When a
//! PravegaCluster is deleted the operator removes everything below that node
//! except the bookkeeper subtree, which belongs to the BookKeeper cluster.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use zookeeper::{WatchedEvent, Watcher, ZooKeeper};

#[cfg(test)]
use mockall::automock;

use pravega_common::{Error, Result};

/// Parent znode of every cluster's metadata
pub const PRAVEGA_ZNODE_ROOT: &str = "/pravega";

/// Child name that is never descended into
const SKIPPED_CHILD: &str = "bookkeeper";

const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Znode holding a cluster's metadata
pub fn cluster_znode(cluster_name: &str) -> String {
    format!("{PRAVEGA_ZNODE_ROOT}/{cluster_name}")
}

/// Store holding Pravega cluster metadata
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Delete every node below `root`
    ///
    /// `root` itself is kept. A missing `root` is not an error.
    ///
    /// # Arguments
    ///
    /// * `connect` - ZooKeeper connect string (`host:port[,host:port]`)
    /// * `root` - Absolute path of the subtree to clear
    async fn delete_tree(&self, connect: &str, root: &str) -> Result<()>;
}

/// Paths below `root` in deletion order
///
/// The tree is walked breadth-first starting at `root`; children named
/// `bookkeeper` are skipped with their whole subtree. The result lists the
/// last discovered (deepest) node first so every node is deleted after its
/// children. `root` is not part of the result.
pub fn deletion_order<F, E>(root: &str, mut children: F) -> std::result::Result<Vec<String>, E>
where
    F: FnMut(&str) -> std::result::Result<Vec<String>, E>,
{
    let mut queue = VecDeque::from([root.to_string()]);
    let mut tree = Vec::new();

    while let Some(node) = queue.pop_front() {
        for child in children(&node)? {
            if child == SKIPPED_CHILD {
                continue;
            }
            let path = format!("{node}/{child}");
            queue.push_back(path.clone());
            tree.push(path);
        }
    }

    tree.reverse();
    Ok(tree)
}

struct LoggingWatcher;

impl Watcher for LoggingWatcher {
    fn handle(&self, e: WatchedEvent) {
        debug!(event = ?e, "zookeeper event");
    }
}

/// [`MetadataStore`] backed by a ZooKeeper ensemble
///
/// The `zookeeper` client is blocking, so each cleanup runs on the blocking
/// thread pool with its own short-lived session.
#[derive(Default)]
pub struct ZkMetadataStore;

impl ZkMetadataStore {
    /// Create a new ZkMetadataStore
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataStore for ZkMetadataStore {
    async fn delete_tree(&self, connect: &str, root: &str) -> Result<()> {
        let connect = connect.to_string();
        let root = root.to_string();
        tokio::task::spawn_blocking(move || delete_tree_blocking(&connect, &root))
            .await
            .map_err(|e| {
                Error::internal_with_context("zookeeper", format!("cleanup task failed: {e}"))
            })?
    }
}

fn delete_tree_blocking(connect: &str, root: &str) -> Result<()> {
    let zk = ZooKeeper::connect(connect, SESSION_TIMEOUT, LoggingWatcher)
        .map_err(|e| Error::zookeeper(format!("failed to connect to zookeeper: {e}")))?;

    let result = delete_below(&zk, root);

    if let Err(e) = zk.close() {
        debug!(error = %e, "failed to close zookeeper session");
    }
    result
}

fn delete_below(zk: &ZooKeeper, root: &str) -> Result<()> {
    let exists = zk.exists(root, false).map_err(|e| {
        Error::zookeeper(format!("failed to check if zookeeper path exists: {e}"))
    })?;
    if exists.is_none() {
        info!(root, "no zookeeper metadata to delete");
        return Ok(());
    }

    let order = deletion_order(root, |path| zk.get_children(path, false))
        .map_err(|e| Error::zookeeper(format!("failed to construct BFS tree: {e}")))?;

    for path in &order {
        zk.delete(path, None)
            .map_err(|e| Error::zookeeper(format!("failed to delete znode ({path}): {e}")))?;
    }

    info!(root, deleted = order.len(), "zookeeper metadata deleted");
    Ok(())
}
