//! Observed state of a PravegaCluster
//!
//! The status is owned by the control loop. Every setter takes the current
//! time explicitly so that condition timestamps are deterministic in tests
//! and a single reconcile pass uses one clock reading throughout.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Condition reason recorded when an upgrade fails
pub const UPGRADE_FAILED_REASON: &str = "UpgradeFailed";
/// Condition reason recorded when a rollback fails
pub const ROLLBACK_FAILED_REASON: &str = "RollbackFailed";
/// Progress reason while the controller tier is being updated
pub const UPDATING_CONTROLLER_REASON: &str = "UpdatingController";
/// Progress reason while the segment store tier is being updated
pub const UPDATING_SEGMENT_STORE_REASON: &str = "UpdatingSegmentstore";

/// Kind of cluster condition
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionType {
    /// All expected pods are ready
    PodsReady,
    /// A version upgrade is in progress
    Upgrading,
    /// A rollback to the previous version is in progress
    RollbackInProgress,
    /// The last transition failed
    Error,
}

impl ConditionType {
    /// All condition types, in the order `init` seeds them
    pub const ALL: [ConditionType; 4] = [
        ConditionType::PodsReady,
        ConditionType::Upgrading,
        ConditionType::RollbackInProgress,
        ConditionType::Error,
    ];
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PodsReady => write!(f, "PodsReady"),
            Self::Upgrading => write!(f, "Upgrading"),
            Self::RollbackInProgress => write!(f, "RollbackInProgress"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Status of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A single cluster condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: ConditionType,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time status, reason or message changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    /// Last time the status flipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl ClusterCondition {
    /// Whether the condition status is `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Ready and unready pod names
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct MembersStatus {
    /// Names of ready pods
    #[serde(default)]
    pub ready: Vec<String>,
    /// Names of pods that are not ready
    #[serde(default)]
    pub unready: Vec<String>,
}

/// Status of a PravegaCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PravegaClusterStatus {
    /// Cluster conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,

    /// Version the cluster is running
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,

    /// Version being upgraded or rolled back to; empty otherwise
    ///
    /// Always serialized so a merge patch can clear it.
    #[serde(default)]
    pub target_version: String,

    /// Versions the cluster has successfully run, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version_history: Vec<String>,

    /// Expected number of pods
    #[serde(default)]
    pub replicas: i32,

    /// Number of pods observed
    #[serde(default)]
    pub current_replicas: i32,

    /// Number of ready pods
    #[serde(default)]
    pub ready_replicas: i32,

    /// Ready and unready pod names
    #[serde(default)]
    pub members: MembersStatus,
}

impl PravegaClusterStatus {
    /// Seed every condition to False and record the current version as the
    /// first history entry
    pub fn init(&mut self, now: DateTime<Utc>) {
        for type_ in ConditionType::ALL {
            if self.condition(type_).is_none() {
                self.set_condition(type_, ConditionStatus::False, "", "", now);
            }
        }

        if self.version_history.is_empty() && !self.current_version.is_empty() {
            self.version_history = vec![self.current_version.clone()];
        }
    }

    /// Look up the condition of the given type
    pub fn condition(&self, type_: ConditionType) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or update a condition
    ///
    /// A status flip moves both timestamps; a reason or message change moves
    /// only `last_update_time`. Writing identical values changes nothing.
    pub fn set_condition(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) {
        let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) else {
            self.conditions.push(ClusterCondition {
                type_,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_update_time: Some(now),
                last_transition_time: Some(now),
            });
            return;
        };

        if existing.status != status {
            existing.status = status;
            existing.last_transition_time = Some(now);
            existing.last_update_time = Some(now);
        }

        if existing.reason != reason || existing.message != message {
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.last_update_time = Some(now);
        }
    }

    fn is_true(&self, type_: ConditionType) -> bool {
        self.condition(type_).is_some_and(ClusterCondition::is_true)
    }

    fn has_error_reason(&self, reason: &str) -> bool {
        self.condition(ConditionType::Error)
            .is_some_and(|c| c.is_true() && c.reason == reason)
    }

    /// Mark all expected pods ready
    pub fn set_pods_ready_true(&mut self, now: DateTime<Utc>) {
        self.set_condition(ConditionType::PodsReady, ConditionStatus::True, "", "", now);
    }

    /// Mark the cluster as having unready pods
    pub fn set_pods_ready_false(&mut self, now: DateTime<Utc>) {
        self.set_condition(ConditionType::PodsReady, ConditionStatus::False, "", "", now);
    }

    /// Enter the Upgrading state with a progress reason and message
    pub fn set_upgrading_true(&mut self, reason: &str, message: &str, now: DateTime<Utc>) {
        self.set_condition(ConditionType::Upgrading, ConditionStatus::True, reason, message, now);
    }

    /// Leave the Upgrading state
    pub fn set_upgrading_false(&mut self, now: DateTime<Utc>) {
        self.set_condition(ConditionType::Upgrading, ConditionStatus::False, "", "", now);
    }

    /// Enter the RollbackInProgress state
    pub fn set_rollback_true(&mut self, reason: &str, message: &str, now: DateTime<Utc>) {
        self.set_condition(
            ConditionType::RollbackInProgress,
            ConditionStatus::True,
            reason,
            message,
            now,
        );
    }

    /// Leave the RollbackInProgress state
    pub fn set_rollback_false(&mut self, now: DateTime<Utc>) {
        self.set_condition(
            ConditionType::RollbackInProgress,
            ConditionStatus::False,
            "",
            "",
            now,
        );
    }

    /// Record a failed transition
    pub fn set_error_true(&mut self, reason: &str, message: &str, now: DateTime<Utc>) {
        self.set_condition(ConditionType::Error, ConditionStatus::True, reason, message, now);
    }

    /// Clear the error condition
    pub fn set_error_false(&mut self, now: DateTime<Utc>) {
        self.set_condition(ConditionType::Error, ConditionStatus::False, "", "", now);
    }

    /// Record per-tier progress on whichever transition is running
    ///
    /// `updated` is the number of updated replicas rendered as a string; the
    /// `(reason, updated)` pair is the fingerprint the stall timer watches.
    pub fn update_progress(&mut self, reason: &str, updated: &str, now: DateTime<Utc>) {
        if self.is_upgrading() {
            self.set_upgrading_true(reason, updated, now);
        } else {
            self.set_rollback_true(reason, updated, now);
        }
    }

    /// Condition carrying the progress fingerprint of the running transition
    pub fn progress_condition(&self) -> Option<&ClusterCondition> {
        if self.is_upgrading() {
            self.condition(ConditionType::Upgrading)
        } else if self.is_rolling_back() {
            self.condition(ConditionType::RollbackInProgress)
        } else {
            None
        }
    }

    /// True while an upgrade is in progress
    pub fn is_upgrading(&self) -> bool {
        self.is_true(ConditionType::Upgrading)
    }

    /// True while a rollback is in progress
    pub fn is_rolling_back(&self) -> bool {
        self.is_true(ConditionType::RollbackInProgress)
    }

    /// True if the Error condition is set for any reason
    pub fn is_in_error(&self) -> bool {
        self.is_true(ConditionType::Error)
    }

    /// True if the last upgrade failed and no rollback has run yet
    pub fn is_upgrade_failed(&self) -> bool {
        self.has_error_reason(UPGRADE_FAILED_REASON)
    }

    /// True if the last rollback failed
    pub fn is_rollback_failed(&self) -> bool {
        self.has_error_reason(ROLLBACK_FAILED_REASON)
    }

    /// True if every expected pod was ready on the last pass
    pub fn is_pods_ready(&self) -> bool {
        self.is_true(ConditionType::PodsReady)
    }

    /// Append a version unless it repeats the last entry
    pub fn add_to_version_history(&mut self, version: &str) {
        if version.is_empty() {
            return;
        }
        if self.version_history.last().map(String::as_str) != Some(version) {
            self.version_history.push(version.to_string());
        }
    }

    /// Most recent version in the history
    pub fn last_version(&self) -> Result<&str> {
        self.version_history
            .last()
            .map(String::as_str)
            .ok_or_else(|| Error::history("no previous cluster version found"))
    }
}
