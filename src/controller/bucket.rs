//! Bucket controller implementation
//!
//! This module implements the reconciliation logic for Bucket resources.
//! It follows the Kubernetes controller pattern: observe current state,
//! determine desired state, calculate diff, and apply changes.
//!
//! Each invocation performs one state-machine step and persists its result
//! before returning; the resulting watch event drives the next step. The
//! deletion finalizer is released only after the external delete succeeds,
//! so record erasure can never race ahead of bucket deletion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::aws::{AwsSessions, S3BucketClient, Session};
use crate::crd::{Bucket, BucketSpec, BucketStatus};
use crate::Error;

/// Finalizer blocking Bucket record erasure until the external bucket is deleted
pub const BUCKET_FINALIZER: &str = "silo.dev/delete-bucket";

/// Opaque reference to the external bucket returned by create/update
///
/// The reconciler never inspects the contents; a handle coming back means
/// the call succeeded, and that is all it propagates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketHandle {
    /// Provider-assigned ARN
    pub arn: String,
}

/// Policy for deleting an external bucket that still contains objects
///
/// S3 refuses to delete a non-empty bucket. Which way to resolve that is
/// deployment configuration, not controller logic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NonEmptyBucketPolicy {
    /// Surface the provider's BucketNotEmpty error and retry later (default)
    #[default]
    Fail,
    /// Empty the bucket before deleting it
    ForceDelete,
}

/// Trait abstracting Kubernetes client operations for Bucket records
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production. Every write carries the record's
/// resourceVersion as an optimistic-concurrency token; a rejected write
/// surfaces as [`Error::Conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a Bucket fresh from the API, or None if it no longer exists
    async fn get_bucket(&self, name: &str, namespace: &str) -> Result<Option<Bucket>, Error>;

    /// Add a finalizer to a Bucket record
    async fn add_bucket_finalizer(&self, bucket: &Bucket, finalizer: &str) -> Result<(), Error>;

    /// Remove a finalizer from a Bucket record
    async fn remove_bucket_finalizer(&self, bucket: &Bucket, finalizer: &str) -> Result<(), Error>;

    /// Patch the status subresource of a Bucket record
    async fn patch_status(&self, bucket: &Bucket, status: &BucketStatus) -> Result<(), Error>;
}

/// Trait abstracting AWS session acquisition
///
/// Acquired once per invocation, before any external-resource call.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Resolve credentials and configuration for the given region
    async fn acquire<'a>(&self, region: Option<&'a str>) -> Result<Session, Error>;
}

/// Trait abstracting the external bucket client
///
/// All operations are scoped to one bucket identified by `name`. The
/// provider API is not idempotent, so implementations must compensate:
/// `create` tolerates a bucket this account already owns and `delete`
/// tolerates a bucket that is already gone, because the reconciler cannot
/// distinguish "never attempted" from "attempted but not recorded".
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BucketClient: Send + Sync {
    /// Create the bucket and apply the spec configuration
    async fn create(
        &self,
        session: &Session,
        name: &str,
        spec: &BucketSpec,
    ) -> Result<BucketHandle, Error>;

    /// Converge an existing bucket onto the spec configuration
    async fn update(
        &self,
        session: &Session,
        name: &str,
        spec: &BucketSpec,
    ) -> Result<BucketHandle, Error>;

    /// Delete the bucket, emptying it first when `force` is set
    async fn delete(&self, session: &Session, name: &str, force: bool) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn buckets(&self, namespace: &str) -> Api<Bucket> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a metadata write rejection to the conflict category
///
/// A 409 means the record moved under us since it was read; the caller
/// retries the whole invocation from a fresh read.
fn map_write_err(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(ae.message),
        other => Error::Kube(other),
    }
}

/// Merge-patch metadata carrying the record's resourceVersion
///
/// Including the resourceVersion makes the write conditional: the API server
/// rejects it with a 409 if the record changed since our read.
fn guarded_metadata(bucket: &Bucket, finalizers: Option<Vec<String>>) -> serde_json::Value {
    let mut metadata = serde_json::Map::new();
    if let Some(rv) = bucket.resource_version() {
        metadata.insert("resourceVersion".to_string(), serde_json::Value::String(rv));
    }
    if let Some(finalizers) = finalizers {
        metadata.insert(
            "finalizers".to_string(),
            serde_json::Value::from(finalizers),
        );
    }
    serde_json::Value::Object(metadata)
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_bucket(&self, name: &str, namespace: &str) -> Result<Option<Bucket>, Error> {
        match self.buckets(namespace).get(name).await {
            Ok(bucket) => Ok(Some(bucket)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn add_bucket_finalizer(&self, bucket: &Bucket, finalizer: &str) -> Result<(), Error> {
        let mut finalizers = bucket.metadata.finalizers.clone().unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({ "metadata": guarded_metadata(bucket, Some(finalizers)) });
        self.buckets(&bucket.namespace().unwrap_or_default())
            .patch(
                &bucket.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(map_write_err)?;
        Ok(())
    }

    async fn remove_bucket_finalizer(&self, bucket: &Bucket, finalizer: &str) -> Result<(), Error> {
        let finalizers: Vec<String> = bucket
            .metadata
            .finalizers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        let patch = serde_json::json!({ "metadata": guarded_metadata(bucket, Some(finalizers)) });
        self.buckets(&bucket.namespace().unwrap_or_default())
            .patch(
                &bucket.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(map_write_err)?;
        Ok(())
    }

    async fn patch_status(&self, bucket: &Bucket, status: &BucketStatus) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": guarded_metadata(bucket, None),
            "status": status,
        });
        self.buckets(&bucket.namespace().unwrap_or_default())
            .patch_status(
                &bucket.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(map_write_err)?;
        Ok(())
    }
}

/// Controller context containing shared clients and configuration
///
/// The context is shared across all reconciliation invocations and holds
/// only immutable configuration and client handles - never per-record
/// state, which lives entirely in the records themselves.
///
/// Use [`Context::builder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .region("eu-central-1")
///     .non_empty_policy(NonEmptyBucketPolicy::ForceDelete)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for record operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// AWS session/credential provider
    pub sessions: Arc<dyn SessionProvider>,
    /// External bucket client
    pub buckets: Arc<dyn BucketClient>,
    /// AWS region for session acquisition
    pub region: Option<String>,
    /// Policy for deleting non-empty buckets
    pub non_empty_policy: NonEmptyBucketPolicy,
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

    /// Create a context for testing with custom mock clients
    ///
    /// This method is primarily for unit tests where real Kubernetes and
    /// AWS clients are not available. For production code, use
    /// [`Context::builder`].
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        sessions: Arc<dyn SessionProvider>,
        buckets: Arc<dyn BucketClient>,
    ) -> Self {
        Self {
            kube,
            sessions,
            buckets,
            region: None,
            non_empty_policy: NonEmptyBucketPolicy::default(),
        }
    }

    /// Create a testing context with an explicit non-empty-bucket policy
    #[cfg(test)]
    pub fn for_testing_with_policy(
        kube: Arc<dyn KubeClient>,
        sessions: Arc<dyn SessionProvider>,
        buckets: Arc<dyn BucketClient>,
        non_empty_policy: NonEmptyBucketPolicy,
    ) -> Self {
        Self {
            kube,
            sessions,
            buckets,
            region: None,
            non_empty_policy,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    sessions: Option<Arc<dyn SessionProvider>>,
    buckets: Option<Arc<dyn BucketClient>>,
    region: Option<String>,
    non_empty_policy: NonEmptyBucketPolicy,
}

impl ContextBuilder {
    /// Create a new builder with the given Kubernetes client
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            sessions: None,
            buckets: None,
            region: None,
            non_empty_policy: NonEmptyBucketPolicy::default(),
        }
    }

    /// Set the AWS region used when acquiring sessions
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the policy for deleting non-empty buckets
    pub fn non_empty_policy(mut self, policy: NonEmptyBucketPolicy) -> Self {
        self.non_empty_policy = policy;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the session provider (primarily for testing)
    pub fn session_provider(mut self, sessions: Arc<dyn SessionProvider>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Override the bucket client (primarily for testing)
    pub fn bucket_client(mut self, buckets: Arc<dyn BucketClient>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            sessions: self
                .sessions
                .unwrap_or_else(|| Arc::new(AwsSessions::new())),
            buckets: self
                .buckets
                .unwrap_or_else(|| Arc::new(S3BucketClient::new())),
            region: self.region,
            non_empty_policy: self.non_empty_policy,
        }
    }
}

/// Reconcile a Bucket resource
///
/// One invocation performs one state-machine step:
/// - record gone: nothing to do
/// - deletion requested with the finalizer present: delete the external
///   bucket, then release the finalizer
/// - deletion requested without the finalizer: already converged
/// - live record without the finalizer: persist the finalizer first, before
///   any external call
/// - live record, not yet initialized: create the bucket, then record
///   `initialized` in status
/// - live record, initialized: converge via update, which is safe to repeat
///
/// The record is re-read fresh at the top of every invocation; the
/// watch-delivered copy contributes only its identity. Every failure aborts
/// the invocation without advancing state and surfaces to [`error_policy`].
#[instrument(skip(bucket, ctx), fields(bucket = %bucket.name_any()))]
pub async fn reconcile(bucket: Arc<Bucket>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = bucket.name_any();
    let namespace = bucket.namespace().unwrap_or_default();
    info!("reconciling bucket");

    let Some(bucket) = ctx.kube.get_bucket(&name, &namespace).await? else {
        // Record vanished between trigger and load
        debug!("bucket record no longer exists, nothing to do");
        return Ok(Action::await_change());
    };

    // Credentials resolve once per invocation, before any external call
    let session = ctx.sessions.acquire(ctx.region.as_deref()).await?;

    let external_name = bucket.external_name();

    if bucket.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&bucket, &external_name, &session, &ctx).await;
    }

    // The finalizer must be persisted before the external bucket can exist,
    // otherwise record erasure could race ahead of bucket deletion
    if !has_finalizer(&bucket) {
        info!("adding deletion finalizer");
        ctx.kube
            .add_bucket_finalizer(&bucket, BUCKET_FINALIZER)
            .await?;
        return Ok(Action::await_change());
    }

    let initialized = bucket.status.as_ref().is_some_and(|s| s.initialized);

    if initialized {
        // Steady state: update is defined to be safe on a converged bucket,
        // so repeated triggers are idempotent
        debug!(s3_bucket = %external_name, "converging existing bucket");
        ctx.buckets
            .update(&session, &external_name, &bucket.spec)
            .await?;
    } else {
        // First creation. The status write lands before anything else
        // happens, so once `initialized` persists a duplicate create is
        // never issued again.
        info!(s3_bucket = %external_name, "creating external bucket");
        ctx.buckets
            .create(&session, &external_name, &bucket.spec)
            .await?;
        ctx.kube
            .patch_status(&bucket, &BucketStatus::initialized())
            .await?;
    }

    Ok(Action::await_change())
}

/// Handle record deletion
///
/// The finalizer is removed only after the external delete succeeds, so the
/// control plane's garbage collector can never erase the record while the
/// bucket still exists. A failed delete leaves the finalizer in place and
/// the next invocation retries.
async fn handle_deletion(
    bucket: &Bucket,
    external_name: &str,
    session: &Session,
    ctx: &Context,
) -> Result<Action, Error> {
    if !has_finalizer(bucket) {
        debug!("no finalizer present, deletion already converged");
        return Ok(Action::await_change());
    }

    let force = ctx.non_empty_policy == NonEmptyBucketPolicy::ForceDelete;
    info!(s3_bucket = %external_name, force, "deleting external bucket");
    ctx.buckets.delete(session, external_name, force).await?;

    info!("external bucket deleted, removing finalizer");
    ctx.kube
        .remove_bucket_finalizer(bucket, BUCKET_FINALIZER)
        .await?;
    Ok(Action::await_change())
}

/// Check whether the record carries the deletion finalizer
fn has_finalizer(bucket: &Bucket) -> bool {
    bucket
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.contains(&BUCKET_FINALIZER.to_string()))
}

/// Error policy for the controller
///
/// Called when reconciliation fails. Every error category is retryable -
/// the next invocation re-derives state from a fresh read - so the policy
/// is a uniform requeue with backoff.
pub fn error_policy(bucket: Arc<Bucket>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        bucket = %bucket.name_any(),
        "reconciliation failed"
    );

    Action::requeue(Duration::from_secs(5))
}
