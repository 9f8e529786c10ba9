//! Custom Resource Definitions for Silo
//!
//! This module contains the CRD definitions used by the Silo operator.

mod bucket;

pub use bucket::{Bucket, BucketSpec, BucketStatus, CannedAcl};
