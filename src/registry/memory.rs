use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    ImageDetail, ImageRegistry, RegistryError, RegistryImage, RegistryOperation, RegistryProvider,
};
use crate::arn::RepositoryArn;

#[derive(Debug, Clone)]
struct StoredImage {
    digest: String,
    manifest: String,
    media_type: Option<String>,
    tags: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    /// Keyed by canonical repository ARN; images kept in push order
    repositories: HashMap<String, Vec<StoredImage>>,
    faults: Vec<(RegistryOperation, String)>,
    calls: Vec<(RegistryOperation, String)>,
}

impl State {
    fn images_mut(&mut self, repo: &RepositoryArn) -> &mut Vec<StoredImage> {
        self.repositories.entry(repo.to_string()).or_default()
    }

    fn images(&self, repo: &RepositoryArn) -> &[StoredImage] {
        self.repositories
            .get(&repo.to_string())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Record the call and fail it if a fault is registered for it
    fn enter(&mut self, operation: RegistryOperation, tag: &str) -> Result<(), RegistryError> {
        self.calls.push((operation, tag.to_string()));
        if self
            .faults
            .iter()
            .any(|(op, t)| *op == operation && t == tag)
        {
            return Err(RegistryError::Api(format!(
                "injected {} failure for tag {}",
                operation, tag
            )));
        }
        Ok(())
    }
}

/// In-memory registry with ECR tag semantics
///
/// A tag names at most one image per repository: attaching a tag moves it
/// from whichever image carried it before. Removing the last tag of an image
/// deletes the image. Clones share state, so a handle kept by a test observes
/// every change made through a [`crate::Tagger`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Compute the content digest of a manifest
    pub fn digest_of(manifest: &str) -> String {
        format!("sha256:{:x}", Sha256::digest(manifest.as_bytes()))
    }

    /// Push an image and attach `tags` to it, moving them off other images
    ///
    /// Returns the image digest.
    pub fn push_image(&self, repo: &RepositoryArn, manifest: &str, tags: &[&str]) -> String {
        let digest = Self::digest_of(manifest);
        let mut state = self.lock();
        let images = state.images_mut(repo);
        for tag in tags {
            attach_tag(images, &digest, manifest, None, tag);
        }
        if tags.is_empty() && !images.iter().any(|i| i.digest == digest) {
            images.push(StoredImage {
                digest: digest.clone(),
                manifest: manifest.to_string(),
                media_type: None,
                tags: Vec::new(),
            });
        }
        digest
    }

    /// Insert an image without enforcing tag uniqueness
    ///
    /// Lets tests model a repository where one tag names several images.
    pub fn insert_image_unchecked(
        &self,
        repo: &RepositoryArn,
        manifest: &str,
        tags: &[&str],
    ) -> String {
        let digest = Self::digest_of(manifest);
        let mut state = self.lock();
        state.images_mut(repo).push(StoredImage {
            digest: digest.clone(),
            manifest: manifest.to_string(),
            media_type: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
        digest
    }

    /// Tags of the image with `digest`, or None if there is no such image
    pub fn tags_of(&self, repo: &RepositoryArn, digest: &str) -> Option<Vec<String>> {
        self.lock()
            .images(repo)
            .iter()
            .find(|i| i.digest == digest)
            .map(|i| i.tags.clone())
    }

    /// Digests of all images carrying `tag`
    pub fn digests_for_tag(&self, repo: &RepositoryArn, tag: &str) -> Vec<String> {
        self.lock()
            .images(repo)
            .iter()
            .filter(|i| i.tags.iter().any(|t| t == tag))
            .map(|i| i.digest.clone())
            .collect()
    }

    pub fn image_count(&self, repo: &RepositoryArn) -> usize {
        self.lock().images(repo).len()
    }

    /// Make every `operation` call for `tag` fail until [`Self::clear_faults`]
    pub fn fail_on(&self, operation: RegistryOperation, tag: &str) {
        self.lock().faults.push((operation, tag.to_string()));
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Every call received so far, as (operation, tag) pairs
    pub fn calls(&self) -> Vec<(RegistryOperation, String)> {
        self.lock().calls.clone()
    }
}

fn attach_tag(
    images: &mut Vec<StoredImage>,
    digest: &str,
    manifest: &str,
    media_type: Option<&str>,
    tag: &str,
) {
    for image in images.iter_mut().filter(|i| i.digest != digest) {
        image.tags.retain(|t| t != tag);
    }

    match images.iter_mut().find(|i| i.digest == digest) {
        Some(image) => {
            if !image.tags.iter().any(|t| t == tag) {
                image.tags.push(tag.to_string());
            }
        }
        None => images.push(StoredImage {
            digest: digest.to_string(),
            manifest: manifest.to_string(),
            media_type: media_type.map(String::from),
            tags: vec![tag.to_string()],
        }),
    }
}

#[async_trait]
impl ImageRegistry for InMemoryRegistry {
    async fn batch_get_image(
        &self,
        repo: &RepositoryArn,
        tag: &str,
    ) -> Result<Vec<RegistryImage>, RegistryError> {
        let mut state = self.lock();
        state.enter(RegistryOperation::BatchGetImage, tag)?;

        Ok(state
            .images(repo)
            .iter()
            .filter(|i| i.tags.iter().any(|t| t == tag))
            .map(|i| RegistryImage {
                digest: i.digest.clone(),
                manifest: i.manifest.clone(),
                media_type: i.media_type.clone(),
            })
            .collect())
    }

    async fn put_image(
        &self,
        repo: &RepositoryArn,
        image: &RegistryImage,
        tag: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        state.enter(RegistryOperation::PutImage, tag)?;

        let digest = Self::digest_of(&image.manifest);
        if digest != image.digest {
            return Err(RegistryError::Rejected {
                code: "ImageDigestDoesNotMatch".to_string(),
                reason: format!(
                    "manifest digest {} does not match {}",
                    digest, image.digest
                ),
            });
        }

        attach_tag(
            state.images_mut(repo),
            &digest,
            &image.manifest,
            image.media_type.as_deref(),
            tag,
        );
        Ok(())
    }

    async fn batch_delete_image(
        &self,
        repo: &RepositoryArn,
        tag: &str,
        digest: &str,
    ) -> Result<(), RegistryError> {
        let mut state = self.lock();
        state.enter(RegistryOperation::BatchDeleteImage, tag)?;

        let images = state.images_mut(repo);
        if let Some(image) = images.iter_mut().find(|i| i.digest == digest) {
            image.tags.retain(|t| t != tag);
        }
        images.retain(|i| i.digest != digest || !i.tags.is_empty());
        Ok(())
    }

    async fn describe_images(
        &self,
        repo: &RepositoryArn,
        tag: &str,
    ) -> Result<Vec<ImageDetail>, RegistryError> {
        let mut state = self.lock();
        state.enter(RegistryOperation::DescribeImages, tag)?;

        Ok(state
            .images(repo)
            .iter()
            .filter(|i| i.tags.iter().any(|t| t == tag))
            .map(|i| ImageDetail {
                digest: i.digest.clone(),
                tags: i.tags.clone(),
            })
            .collect())
    }
}

impl RegistryProvider for InMemoryRegistry {
    fn registry_for(&self, _region: &str) -> Arc<dyn ImageRegistry> {
        Arc::new(self.clone())
    }

    fn provider_name(&self) -> &str {
        "in-memory"
    }
}
