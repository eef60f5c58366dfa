//! Error types for the Pravega operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Upgrade failures carry the component that failed so the message written
//! to the cluster's Error condition reads the same way an operator would
//! describe it.

use thiserror::Error;

/// Main error type for Pravega operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed version, quantity or JVM size
    #[error("{message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// A single tier failed to converge on its target image
    ///
    /// The message is shown verbatim; it becomes the cause part of an
    /// [`Error::Upgrade`].
    #[error("{message}")]
    Sync {
        /// Description of what failed
        message: String,
    },

    /// Upgrade or rollback of a component failed
    #[error("failed to sync {component} version. {message}")]
    Upgrade {
        /// Component being synced (controller, segmentstore)
        component: String,
        /// Underlying cause
        message: String,
    },

    /// Version history could not supply a rollback target
    #[error("{message}")]
    History {
        /// Description of what's missing
        message: String,
    },

    /// A bounded wait ran out of time
    #[error("{message}")]
    Timeout {
        /// Operation that was waiting (e.g. "restart", "drain")
        operation: String,
        /// Description of what did not happen in time
        message: String,
    },

    /// A wait was interrupted by shutdown
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was waiting
        operation: String,
    },

    /// ZooKeeper metadata error
    #[error("{message}")]
    Zookeeper {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a tier sync failure
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync {
            message: msg.into(),
        }
    }

    /// Wrap a tier failure with the component it happened in
    pub fn upgrade(component: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Upgrade {
            component: component.into(),
            message: cause.to_string(),
        }
    }

    /// Create a version history error
    pub fn history(msg: impl Into<String>) -> Self {
        Self::History {
            message: msg.into(),
        }
    }

    /// Create a timeout error for the given operation
    pub fn timeout(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a cancellation error for the given operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a ZooKeeper error
    pub fn zookeeper(msg: impl Into<String>) -> Self {
        Self::Zookeeper {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True if the API server rejected a write because the object changed
    ///
    /// Creation races (409 `AlreadyExists`) are reported by
    /// [`Error::is_already_exists`] instead.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Kube { source: kube::Error::Api(ae) }
                if ae.code == 409 && ae.reason != "AlreadyExists"
        )
    }

    /// True if a create raced with another writer
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Error::Kube { source: kube::Error::Api(ae) }
                if ae.code == 409 && ae.reason == "AlreadyExists"
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    // ==========================================================================
    // Story Tests: How failures surface during reconciliation
    // ==========================================================================

    /// Story: a failed tier update reads like a sentence in the Error condition
    ///
    /// The segment store tier reports what went wrong with a pod; the engine
    /// wraps it with the component name before it lands in the status.
    #[test]
    fn story_upgrade_failure_names_component_and_cause() {
        let tier = Error::sync("pod foo-pravega-segment-store-0 update failed because of CrashLoopBackOff");
        let err = Error::upgrade("segmentstore", &tier);

        assert_eq!(
            err.to_string(),
            "failed to sync segmentstore version. pod foo-pravega-segment-store-0 update failed because of CrashLoopBackOff"
        );
    }

    /// Story: the API server's answers are classified without string matching
    #[test]
    fn story_api_errors_are_classified_by_code_and_reason() {
        let missing = api_error(404, "NotFound");
        assert!(!missing.is_conflict());
        assert!(!missing.is_already_exists());

        let stale = api_error(409, "Conflict");
        assert!(stale.is_conflict());
        assert!(!stale.is_already_exists());

        let raced = api_error(409, "AlreadyExists");
        assert!(raced.is_already_exists());
        assert!(!raced.is_conflict());
    }

    #[test]
    fn history_and_validation_errors_read_verbatim() {
        let err = Error::history("no previous cluster version found");
        assert_eq!(err.to_string(), "no previous cluster version found");

        let err = Error::validation("invalid JVM memory size: 1x");
        assert_eq!(err.to_string(), "invalid JVM memory size: 1x");
    }

    #[test]
    fn waits_report_timeout_and_cancellation() {
        let err = Error::timeout("restart", "failed to get Segmentstore pod (p-0) as ready for 10 mins");
        assert_eq!(
            err.to_string(),
            "failed to get Segmentstore pod (p-0) as ready for 10 mins"
        );

        let err = Error::cancelled("drain");
        assert_eq!(err.to_string(), "drain cancelled");
    }
}
