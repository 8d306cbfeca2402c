use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::arn::RepositoryArn;
use crate::error::TaggerError;
use crate::registry::{RegistryError, RegistryOperation, RegistryProvider};
use crate::stats::{failure_counter, Stats};

/// Adds and removes environment tags on ECR images
///
/// Images are expected to be uniquely identified by a version tag (e.g. a git
/// SHA). Environment tags such as "staging" or "prod" are attached to, or
/// detached from, the image a version tag points at.
///
/// Tags are processed strictly in order and the first failing remote call
/// ends the operation. Tags handled before the failure stay applied (or
/// removed); see [`TaggerError::RemoteCall`].
pub struct Tagger {
    registries: Arc<dyn RegistryProvider>,
    stats: Arc<dyn Stats>,
    call_timeout: Option<Duration>,
}

impl Tagger {
    pub fn new(registries: Arc<dyn RegistryProvider>, stats: Arc<dyn Stats>) -> Self {
        Self {
            registries,
            stats,
            call_timeout: None,
        }
    }

    /// Bound every remote call by `timeout` (None waits indefinitely)
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Add `tags` to the image identified by `version`
    ///
    /// A version that names no image is not an error; nothing is tagged.
    pub async fn add<S: AsRef<str>>(
        &self,
        reference: &str,
        version: &str,
        tags: &[S],
    ) -> Result<(), TaggerError> {
        let repo = RepositoryArn::parse(reference)?;
        let registry = self.registries.registry_for(repo.region());
        let tags: Vec<&str> = tags.iter().map(|t| t.as_ref()).collect();

        info!(
            repository = %repo.repository(),
            version = %version,
            tags = ?tags,
            "Adding tags"
        );

        for (completed, &tag) in tags.iter().enumerate() {
            let images = self
                .call(
                    RegistryOperation::BatchGetImage,
                    &repo,
                    registry.batch_get_image(&repo, version),
                )
                .await
                .map_err(|source| {
                    remote_error(
                        RegistryOperation::BatchGetImage,
                        &repo,
                        tag,
                        None,
                        completed,
                        source,
                    )
                })?;

            if images.is_empty() {
                debug!(
                    repository = %repo.repository(),
                    version = %version,
                    tag = %tag,
                    "No image carries the version tag, skipping"
                );
            }

            for image in &images {
                debug!(
                    repository = %repo.repository(),
                    tag = %tag,
                    digest = %image.digest,
                    "Putting image with tag"
                );
                self.call(
                    RegistryOperation::PutImage,
                    &repo,
                    registry.put_image(&repo, image, tag),
                )
                .await
                .map_err(|source| {
                    remote_error(
                        RegistryOperation::PutImage,
                        &repo,
                        tag,
                        Some(&image.digest),
                        completed,
                        source,
                    )
                })?;
            }
        }

        info!(repository = %repo.repository(), version = %version, "Added tags");
        Ok(())
    }

    /// Remove `tags` from every image in the repository that carries them
    pub async fn remove<S: AsRef<str>>(
        &self,
        reference: &str,
        tags: &[S],
    ) -> Result<(), TaggerError> {
        let repo = RepositoryArn::parse(reference)?;
        let registry = self.registries.registry_for(repo.region());
        let tags: Vec<&str> = tags.iter().map(|t| t.as_ref()).collect();

        info!(repository = %repo.repository(), tags = ?tags, "Removing tags");

        for (completed, &tag) in tags.iter().enumerate() {
            let images = self
                .call(
                    RegistryOperation::BatchGetImage,
                    &repo,
                    registry.batch_get_image(&repo, tag),
                )
                .await
                .map_err(|source| {
                    remote_error(
                        RegistryOperation::BatchGetImage,
                        &repo,
                        tag,
                        None,
                        completed,
                        source,
                    )
                })?;

            for image in &images {
                debug!(
                    repository = %repo.repository(),
                    tag = %tag,
                    digest = %image.digest,
                    "Deleting tag from image"
                );
                self.call(
                    RegistryOperation::BatchDeleteImage,
                    &repo,
                    registry.batch_delete_image(&repo, tag, &image.digest),
                )
                .await
                .map_err(|source| {
                    remote_error(
                        RegistryOperation::BatchDeleteImage,
                        &repo,
                        tag,
                        Some(&image.digest),
                        completed,
                        source,
                    )
                })?;
            }
        }

        info!(repository = %repo.repository(), "Removed tags");
        Ok(())
    }

    /// Get all tags of the image identified by `version`
    pub async fn get(&self, reference: &str, version: &str) -> Result<Vec<String>, TaggerError> {
        let repo = RepositoryArn::parse(reference)?;
        let registry = self.registries.registry_for(repo.region());

        let mut details = self
            .call(
                RegistryOperation::DescribeImages,
                &repo,
                registry.describe_images(&repo, version),
            )
            .await
            .map_err(|source| {
                remote_error(
                    RegistryOperation::DescribeImages,
                    &repo,
                    version,
                    None,
                    0,
                    source,
                )
            })?;

        match details.len() {
            0 => Err(TaggerError::NotFound {
                repository: repo.repository().to_string(),
                version: version.to_string(),
            }),
            1 => Ok(details.remove(0).tags),
            count => Err(TaggerError::InvariantViolation {
                repository: repo.repository().to_string(),
                version: version.to_string(),
                count,
            }),
        }
    }

    /// Run one remote call under the call timeout, counting failures
    async fn call<T, F>(
        &self,
        operation: RegistryOperation,
        repo: &RepositoryArn,
        call: F,
    ) -> Result<T, RegistryError>
    where
        F: Future<Output = Result<T, RegistryError>>,
    {
        let result = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(RegistryError::Timeout(limit))),
            None => call.await,
        };

        if result.is_err() {
            self.stats.inc_count(&failure_counter(operation, repo.repository()));
        }
        result
    }
}

fn remote_error(
    operation: RegistryOperation,
    repo: &RepositoryArn,
    tag: &str,
    digest: Option<&str>,
    completed: usize,
    source: RegistryError,
) -> TaggerError {
    TaggerError::RemoteCall {
        operation,
        repository: repo.repository().to_string(),
        tag: tag.to_string(),
        digest: digest.map(String::from),
        completed,
        source,
    }
}

impl std::fmt::Debug for Tagger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tagger")
            .field("provider", &self.registries.provider_name())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
