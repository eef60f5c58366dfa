//! Kubernetes Event recording for the Pravega operator
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "UpgradeError")
    /// * `action` - What action was taken (e.g. "Upgrade")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher; `controller_name` becomes the reporting component.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// An upgrade step failed and the cluster entered UpgradeFailed
    pub const UPGRADE_ERROR: &str = "UpgradeError";
    /// A rollback failed and the cluster entered RollbackFailed
    pub const ROLLBACK_ERROR: &str = "RollbackError";
    /// ZooKeeper metadata could not be removed during deletion
    pub const ZK_META_CLEANUP_FAILED: &str = "ZKMetaCleanupFailed";
    /// An upgrade to a new version was started
    pub const UPGRADE_STARTED: &str = "UpgradeStarted";
    /// An upgrade finished and the cluster runs the new version
    pub const UPGRADE_COMPLETE: &str = "UpgradeComplete";
    /// A rollback to the previous version was started
    pub const ROLLBACK_STARTED: &str = "RollbackStarted";
    /// A rollback finished
    pub const ROLLBACK_COMPLETE: &str = "RollbackComplete";
}

/// Well-known event action strings.
pub mod actions {
    /// Rolling a new version out
    pub const UPGRADE: &str = "Upgrade";
    /// Rolling back to the previous version
    pub const ROLLBACK: &str = "Rollback";
    /// Cleaning up on deletion
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn reason_constants_match_kubectl_output() {
        assert_eq!(reasons::UPGRADE_ERROR, "UpgradeError");
        assert_eq!(reasons::ROLLBACK_ERROR, "RollbackError");
        assert_eq!(reasons::ZK_META_CLEANUP_FAILED, "ZKMetaCleanupFailed");
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::UPGRADE_ERROR,
                actions::UPGRADE,
                Some("test".to_string()),
            )
            .await;
    }
}
