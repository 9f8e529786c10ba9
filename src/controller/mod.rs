//! Controller implementation for the Bucket CRD
//!
//! This module contains the reconciliation logic for Bucket resources.
//! The controller follows the Kubernetes pattern with an observe-diff-act loop.

mod bucket;

pub use bucket::{
    error_policy, reconcile, BucketClient, BucketHandle, Context, ContextBuilder, KubeClient,
    KubeClientImpl, NonEmptyBucketPolicy, SessionProvider, BUCKET_FINALIZER,
};
