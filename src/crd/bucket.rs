//! Bucket Custom Resource Definition
//!
//! A Bucket record declares the desired configuration of one S3 bucket. The
//! external bucket name derives deterministically from the record identity,
//! so the record is the single source of truth for which bucket it manages.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Canned ACL applied to the external bucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum CannedAcl {
    /// Owner-only access (default)
    #[default]
    Private,
    /// Anyone can read objects
    PublicRead,
    /// Anyone can read and write objects
    PublicReadWrite,
    /// Authenticated AWS users can read objects
    AuthenticatedRead,
}

impl std::fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Private => write!(f, "private"),
            Self::PublicRead => write!(f, "public-read"),
            Self::PublicReadWrite => write!(f, "public-read-write"),
            Self::AuthenticatedRead => write!(f, "authenticated-read"),
        }
    }
}

/// Specification for a Bucket
///
/// Fields map one-to-one onto S3 bucket configuration. Everything except
/// `objectLock` converges on every reconciliation; object lock can only be
/// set when the bucket is created.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "silo.dev",
    version = "v1alpha1",
    kind = "Bucket",
    plural = "buckets",
    shortname = "bkt",
    status = "BucketStatus",
    namespaced,
    printcolumn = r#"{"name":"Initialized","type":"boolean","jsonPath":".status.initialized"}"#,
    printcolumn = r#"{"name":"Versioning","type":"boolean","jsonPath":".spec.versioning"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Canned ACL for the bucket (private when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acl: Option<CannedAcl>,

    /// Enable object versioning
    #[serde(default)]
    pub versioning: bool,

    /// Enable object lock (applied at creation only)
    #[serde(default)]
    pub object_lock: bool,

    /// Enable transfer acceleration
    #[serde(default)]
    pub transfer_acceleration: bool,

    /// Block new public ACLs on the bucket and its objects
    #[serde(default, rename = "blockPublicACLs")]
    pub block_public_acls: bool,

    /// Ignore public ACLs already present on the bucket and its objects
    #[serde(default, rename = "ignorePublicACLs")]
    pub ignore_public_acls: bool,

    /// Reject public bucket policies
    #[serde(default)]
    pub block_public_policy: bool,

    /// Restrict access to this bucket to AWS principals only
    #[serde(default)]
    pub restrict_public_buckets: bool,
}

impl Bucket {
    /// Deterministic external bucket name derived from the record identity
    ///
    /// S3 bucket names are globally unique; suffixing the namespace keeps
    /// same-named records in different namespaces from colliding.
    pub fn external_name(&self) -> String {
        format!(
            "{}-{}",
            self.name_any(),
            self.namespace().unwrap_or_default()
        )
    }
}

/// Status for a Bucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    /// True once the external bucket has been successfully created.
    /// Gates the create-vs-update decision and never reverts to false.
    #[serde(default)]
    pub initialized: bool,
}

impl BucketStatus {
    /// Status recording that the external bucket exists
    pub fn initialized() -> Self {
        Self { initialized: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn sample_bucket(name: &str, namespace: &str) -> Bucket {
        Bucket {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: BucketSpec::default(),
            status: None,
        }
    }

    // =========================================================================
    // External Naming
    // =========================================================================

    /// Story: the external bucket name is a pure function of the record
    /// identity, so every invocation targets the same S3 bucket
    #[test]
    fn story_external_name_derives_from_identity() {
        let bucket = sample_bucket("assets", "media");
        assert_eq!(bucket.external_name(), "assets-media");
    }

    /// Story: same record name in different namespaces never collides on S3
    #[test]
    fn story_namespaces_disambiguate_external_names() {
        let staging = sample_bucket("uploads", "staging");
        let prod = sample_bucket("uploads", "prod");
        assert_ne!(staging.external_name(), prod.external_name());
    }

    // =========================================================================
    // Wire Format
    // =========================================================================

    /// Story: an empty spec is valid and defaults everything off
    ///
    /// Users declaring only `{}` get a private, unversioned bucket - the
    /// most restrictive configuration.
    #[test]
    fn story_empty_spec_defaults_to_locked_down_bucket() {
        let spec: BucketSpec = serde_json::from_str("{}").expect("empty spec should parse");
        assert_eq!(spec.acl, None);
        assert!(!spec.versioning);
        assert!(!spec.object_lock);
        assert!(!spec.transfer_acceleration);
        assert!(!spec.block_public_acls);
    }

    /// Story: spec fields use the documented camelCase wire names
    #[test]
    fn story_spec_uses_camel_case_wire_names() {
        let spec: BucketSpec = serde_json::from_value(serde_json::json!({
            "acl": "public-read",
            "versioning": true,
            "objectLock": true,
            "transferAcceleration": true,
            "blockPublicACLs": true,
            "ignorePublicACLs": true,
            "blockPublicPolicy": true,
            "restrictPublicBuckets": true,
        }))
        .expect("spec should parse");

        assert_eq!(spec.acl, Some(CannedAcl::PublicRead));
        assert!(spec.versioning);
        assert!(spec.object_lock);
        assert!(spec.transfer_acceleration);
        assert!(spec.block_public_acls);
        assert!(spec.ignore_public_acls);
        assert!(spec.block_public_policy);
        assert!(spec.restrict_public_buckets);
    }

    #[test]
    fn test_canned_acl_display_matches_s3_names() {
        assert_eq!(CannedAcl::Private.to_string(), "private");
        assert_eq!(CannedAcl::PublicRead.to_string(), "public-read");
        assert_eq!(CannedAcl::PublicReadWrite.to_string(), "public-read-write");
        assert_eq!(
            CannedAcl::AuthenticatedRead.to_string(),
            "authenticated-read"
        );
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Story: a record with no status has never been created externally
    #[test]
    fn story_missing_status_means_uninitialized() {
        let status = BucketStatus::default();
        assert!(!status.initialized);

        let status = BucketStatus::initialized();
        assert!(status.initialized);
    }

    #[test]
    fn test_status_round_trips_through_json() {
        let status = BucketStatus::initialized();
        let json = serde_json::to_value(&status).expect("status should serialize");
        assert_eq!(json, serde_json::json!({ "initialized": true }));
    }
}
