#[cfg(feature = "aws")]
pub mod ecr;
pub mod memory;

#[cfg(feature = "aws")]
pub use ecr::{EcrRegistry, EcrSession};
pub use memory::InMemoryRegistry;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::arn::RepositoryArn;

/// An image as returned by a batch-get lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryImage {
    /// Content digest (e.g., "sha256:...")
    pub digest: String,
    /// Raw image manifest
    pub manifest: String,
    /// Manifest media type, if the registry reported one
    pub media_type: Option<String>,
}

/// Image metadata as returned by a describe lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetail {
    pub digest: String,
    /// Tags in the order the registry returned them
    pub tags: Vec<String>,
}

/// The remote registry calls issued by the tagger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOperation {
    BatchGetImage,
    PutImage,
    BatchDeleteImage,
    DescribeImages,
}

impl RegistryOperation {
    /// Short name used in failure counter names
    pub fn metric_key(&self) -> &'static str {
        match self {
            RegistryOperation::BatchGetImage => "batchget",
            RegistryOperation::PutImage => "putimage",
            RegistryOperation::BatchDeleteImage => "batchdelete",
            RegistryOperation::DescribeImages => "descimg",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryOperation::BatchGetImage => "BatchGetImage",
            RegistryOperation::PutImage => "PutImage",
            RegistryOperation::BatchDeleteImage => "BatchDeleteImage",
            RegistryOperation::DescribeImages => "DescribeImages",
        }
    }
}

impl fmt::Display for RegistryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The API call itself failed (transport, auth, throttling, service error)
    #[error("{0}")]
    Api(String),

    /// The call succeeded but the registry reported a per-image failure
    #[error("registry rejected the request ({code}): {reason}")]
    Rejected { code: String, reason: String },

    #[error("call did not complete within {0:?}")]
    Timeout(Duration),
}

/// Region-scoped image registry client
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Fetch the images (with manifests) currently carrying `tag`
    ///
    /// A tag that names no image yields an empty list, not an error.
    async fn batch_get_image(
        &self,
        repo: &RepositoryArn,
        tag: &str,
    ) -> Result<Vec<RegistryImage>, RegistryError>;

    /// Attach `tag` to the image described by `image`
    ///
    /// Attaching a tag the image already carries succeeds without change.
    async fn put_image(
        &self,
        repo: &RepositoryArn,
        image: &RegistryImage,
        tag: &str,
    ) -> Result<(), RegistryError>;

    /// Detach `tag` from the image with `digest`
    async fn batch_delete_image(
        &self,
        repo: &RepositoryArn,
        tag: &str,
        digest: &str,
    ) -> Result<(), RegistryError>;

    /// Describe the images currently carrying `tag`
    ///
    /// A tag that names no image yields an empty list, not an error.
    async fn describe_images(
        &self,
        repo: &RepositoryArn,
        tag: &str,
    ) -> Result<Vec<ImageDetail>, RegistryError>;
}

/// Session/credentials provider handing out region-scoped registry clients
pub trait RegistryProvider: Send + Sync {
    fn registry_for(&self, region: &str) -> Arc<dyn ImageRegistry>;

    /// Get the provider type identifier
    fn provider_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_metric_keys() {
        assert_eq!(RegistryOperation::BatchGetImage.metric_key(), "batchget");
        assert_eq!(RegistryOperation::PutImage.metric_key(), "putimage");
        assert_eq!(RegistryOperation::BatchDeleteImage.metric_key(), "batchdelete");
        assert_eq!(RegistryOperation::DescribeImages.metric_key(), "descimg");
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(RegistryOperation::PutImage.to_string(), "PutImage");
    }

    #[test]
    fn test_rejected_error_message() {
        let err = RegistryError::Rejected {
            code: "InvalidImageTag".to_string(),
            reason: "bad tag".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "registry rejected the request (InvalidImageTag): bad tag"
        );
    }
}
