//! S3-backed external bucket client
//!
//! Operations are scoped to one bucket whose name the controller derives
//! from the record identity. The S3 API is not idempotent, so this layer
//! compensates: create tolerates a bucket this account already owns, delete
//! tolerates a bucket that is already gone. The reconciler cannot
//! distinguish "never attempted" from "attempted but not recorded", so both
//! must be safe to repeat.

use async_trait::async_trait;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    AccelerateConfiguration, BucketAccelerateStatus, BucketCannedAcl, BucketLocationConstraint,
    BucketVersioningStatus, CreateBucketConfiguration, Delete, ObjectIdentifier,
    PublicAccessBlockConfiguration, VersioningConfiguration,
};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::aws::Session;
use crate::controller::{BucketClient, BucketHandle};
use crate::crd::{BucketSpec, CannedAcl};
use crate::Error;

/// External bucket client backed by the AWS S3 API
#[derive(Clone, Copy, Debug, Default)]
pub struct S3BucketClient;

impl S3BucketClient {
    /// Create a new client
    pub fn new() -> Self {
        Self
    }

    /// Converge ACL, versioning, acceleration, and public-access-block onto
    /// the bucket
    ///
    /// Every call here is safe to repeat on a bucket already in the desired
    /// configuration, which is what makes `update` the steady-state path.
    async fn apply_configuration(
        &self,
        client: &Client,
        name: &str,
        spec: &BucketSpec,
    ) -> Result<(), Error> {
        client
            .put_bucket_acl()
            .bucket(name)
            .acl(canned_acl(spec.acl.as_ref()))
            .send()
            .await
            .map_err(|e| aws_err("PutBucketAcl", &e))?;

        let versioning = if spec.versioning {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };
        client
            .put_bucket_versioning()
            .bucket(name)
            .versioning_configuration(
                VersioningConfiguration::builder().status(versioning).build(),
            )
            .send()
            .await
            .map_err(|e| aws_err("PutBucketVersioning", &e))?;

        let acceleration = if spec.transfer_acceleration {
            BucketAccelerateStatus::Enabled
        } else {
            BucketAccelerateStatus::Suspended
        };
        client
            .put_bucket_accelerate_configuration()
            .bucket(name)
            .accelerate_configuration(
                AccelerateConfiguration::builder().status(acceleration).build(),
            )
            .send()
            .await
            .map_err(|e| aws_err("PutBucketAccelerateConfiguration", &e))?;

        client
            .put_public_access_block()
            .bucket(name)
            .public_access_block_configuration(
                PublicAccessBlockConfiguration::builder()
                    .block_public_acls(spec.block_public_acls)
                    .ignore_public_acls(spec.ignore_public_acls)
                    .block_public_policy(spec.block_public_policy)
                    .restrict_public_buckets(spec.restrict_public_buckets)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| aws_err("PutPublicAccessBlock", &e))?;

        Ok(())
    }

    /// Delete every object so the bucket itself can be removed
    async fn empty_bucket(&self, client: &Client, name: &str) -> Result<(), Error> {
        let mut continuation: Option<String> = None;

        loop {
            let listing = client
                .list_objects_v2()
                .bucket(name)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| aws_err("ListObjectsV2", &e))?;

            let keys = listing
                .contents()
                .iter()
                .filter_map(|object| object.key())
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| Error::serialization(format!("invalid object key: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;

            if !keys.is_empty() {
                debug!(bucket = %name, count = keys.len(), "deleting objects");
                let delete = Delete::builder()
                    .set_objects(Some(keys))
                    .build()
                    .map_err(|e| Error::serialization(format!("invalid delete request: {e}")))?;
                client
                    .delete_objects()
                    .bucket(name)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| aws_err("DeleteObjects", &e))?;
            }

            match listing.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BucketClient for S3BucketClient {
    async fn create(
        &self,
        session: &Session,
        name: &str,
        spec: &BucketSpec,
    ) -> Result<BucketHandle, Error> {
        let client = Client::new(session.config());

        let mut request = client
            .create_bucket()
            .bucket(name)
            .object_lock_enabled_for_bucket(spec.object_lock);
        if let Some(constraint) = location_constraint(session) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => info!(bucket = %name, "bucket created"),
            // A bucket we already own means a prior invocation created it
            // without recording the fact; converge instead of failing
            Err(e)
                if e.as_service_error()
                    .is_some_and(|err| err.is_bucket_already_owned_by_you()) =>
            {
                debug!(bucket = %name, "bucket already owned, converging configuration");
            }
            Err(e) => return Err(aws_err("CreateBucket", &e)),
        }

        self.apply_configuration(&client, name, spec).await?;

        Ok(BucketHandle {
            arn: bucket_arn(name),
        })
    }

    async fn update(
        &self,
        session: &Session,
        name: &str,
        spec: &BucketSpec,
    ) -> Result<BucketHandle, Error> {
        let client = Client::new(session.config());

        client
            .head_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|e| aws_err("HeadBucket", &e))?;

        self.apply_configuration(&client, name, spec).await?;

        Ok(BucketHandle {
            arn: bucket_arn(name),
        })
    }

    async fn delete(&self, session: &Session, name: &str, force: bool) -> Result<(), Error> {
        let client = Client::new(session.config());

        match client.head_bucket().bucket(name).send().await {
            Ok(_) => {}
            // Already gone means a prior invocation deleted it without
            // recording the fact
            Err(e) if e.as_service_error().is_some_and(|err| err.is_not_found()) => {
                debug!(bucket = %name, "bucket already deleted");
                return Ok(());
            }
            Err(e) => return Err(aws_err("HeadBucket", &e)),
        }

        if force {
            self.empty_bucket(&client, name).await?;
        }

        client
            .delete_bucket()
            .bucket(name)
            .send()
            .await
            .map_err(|e| aws_err("DeleteBucket", &e))?;

        info!(bucket = %name, "bucket deleted");
        Ok(())
    }
}

/// Collapse an SDK error into the transient external category
fn aws_err<E>(operation: &str, err: &SdkError<E>) -> Error
where
    E: ProvideErrorMetadata,
{
    let code = err.code().unwrap_or("unknown");
    let message = err.message().unwrap_or("no further detail");
    Error::aws(format!("{operation} failed: {code}: {message}"))
}

/// Map the record's canned ACL onto the S3 type, defaulting to private
fn canned_acl(acl: Option<&CannedAcl>) -> BucketCannedAcl {
    match acl.unwrap_or(&CannedAcl::Private) {
        CannedAcl::Private => BucketCannedAcl::Private,
        CannedAcl::PublicRead => BucketCannedAcl::PublicRead,
        CannedAcl::PublicReadWrite => BucketCannedAcl::PublicReadWrite,
        CannedAcl::AuthenticatedRead => BucketCannedAcl::AuthenticatedRead,
    }
}

/// S3 requires a location constraint everywhere except us-east-1
fn location_constraint(session: &Session) -> Option<BucketLocationConstraint> {
    let region = session.config().region()?;
    if region.as_ref() == "us-east-1" {
        return None;
    }
    Some(BucketLocationConstraint::from(region.as_ref()))
}

/// ARN for a bucket name; S3 bucket ARNs carry no account or region
fn bucket_arn(name: &str) -> String {
    format!("arn:aws:s3:::{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canned_acl_defaults_to_private() {
        assert_eq!(canned_acl(None), BucketCannedAcl::Private);
        assert_eq!(
            canned_acl(Some(&CannedAcl::PublicRead)),
            BucketCannedAcl::PublicRead
        );
    }

    /// Story: us-east-1 is the one region S3 rejects a location constraint
    /// for; everywhere else must send one
    #[test]
    fn story_location_constraint_skips_us_east_1() {
        let virginia = Session::for_testing_in("us-east-1");
        assert_eq!(location_constraint(&virginia), None);

        let frankfurt = Session::for_testing_in("eu-central-1");
        assert_eq!(
            location_constraint(&frankfurt),
            Some(BucketLocationConstraint::from("eu-central-1"))
        );

        let regionless = Session::for_testing();
        assert_eq!(location_constraint(&regionless), None);
    }

    #[test]
    fn test_bucket_arn_format() {
        assert_eq!(bucket_arn("assets-media"), "arn:aws:s3:::assets-media");
    }
}
