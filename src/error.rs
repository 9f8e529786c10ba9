//! Error types for the Silo operator

use thiserror::Error;

/// Main error type for Silo operations
///
/// Every category here is retryable: reconciliation failures surface to the
/// controller runtime, which requeues the record, and a future invocation
/// re-derives the required action from a fresh read.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// AWS/S3 call failure (network, throttling, auth)
    #[error("aws error: {0}")]
    Aws(String),

    /// Metadata write rejected due to concurrent modification
    #[error("conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an AWS error with the given message
    pub fn aws(msg: impl Into<String>) -> Self {
        Self::Aws(msg.into())
    }

    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: transient S3 failures carry enough context to diagnose them
    /// from controller logs alone
    #[test]
    fn story_aws_errors_surface_operation_context() {
        // Scenario: throttled while converging bucket configuration
        let err = Error::aws("PutBucketVersioning failed: SlowDown: please reduce request rate");
        assert!(err.to_string().contains("aws error"));
        assert!(err.to_string().contains("PutBucketVersioning"));

        // Scenario: credentials expired mid-reconcile
        let err = Error::aws("CreateBucket failed: ExpiredToken: the security token has expired");
        assert!(err.to_string().contains("ExpiredToken"));

        match Error::aws("any message") {
            Error::Aws(msg) => assert_eq!(msg, "any message"),
            _ => panic!("Expected Aws variant"),
        }
    }

    /// Story: a rejected metadata write means the record moved under us
    ///
    /// Conflicts are not failures to fix in place - the next invocation
    /// re-reads the record and re-derives the required action.
    #[test]
    fn story_conflicts_force_a_fresh_read() {
        let err = Error::conflict(
            "the object has been modified; please apply your changes to the latest version",
        );
        assert!(err.to_string().contains("conflict"));

        match Error::conflict("stale resourceVersion") {
            Error::Conflict(msg) => assert_eq!(msg, "stale resourceVersion"),
            _ => panic!("Expected Conflict variant"),
        }
    }

    /// Story: error helper functions accept both String and &str
    #[test]
    fn story_error_construction_ergonomics() {
        let dynamic_msg = format!("bucket {} rejected", "orders-prod");
        let err = Error::aws(dynamic_msg);
        assert!(err.to_string().contains("orders-prod"));

        let err = Error::serialization("static message");
        assert!(err.to_string().contains("static message"));
    }
}
