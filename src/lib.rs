//! Silo - Kubernetes operator for declarative S3 bucket management
//!
//! Silo watches `Bucket` custom resources and drives the corresponding AWS
//! S3 buckets toward their declared configuration. It follows the Kubernetes
//! controller pattern: observe the record, determine the required action,
//! apply it, and report status back through the status subresource.
//!
//! # Architecture
//!
//! Each reconciliation invocation performs exactly one state-machine step:
//! - a record marked for deletion has its external bucket deleted before the
//!   deletion finalizer is released, so the record can never be erased while
//!   the bucket still exists
//! - a live record first gains the finalizer, is then created externally
//!   exactly once, and from then on converges via repeatable updates
//!
//! All state lives in the record itself; the controller holds no per-bucket
//! state between invocations.
//!
//! # Modules
//!
//! - [`crd`] - The Bucket Custom Resource Definition
//! - [`controller`] - Reconciliation logic and its trait seams
//! - [`aws`] - AWS session acquisition and the S3 bucket client
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod aws;
pub mod controller;
pub mod crd;
pub mod error;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
