//! AWS collaborators for the Bucket controller
//!
//! Production implementations of the controller's external seams: session
//! acquisition through the standard AWS credential chain, and the S3-backed
//! bucket client performing the actual create/update/delete calls.

mod bucket;
mod session;

pub use bucket::S3BucketClient;
pub use session::{AwsSessions, Session};
