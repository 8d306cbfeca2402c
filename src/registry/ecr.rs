use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ecr::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_ecr::operation::describe_images::DescribeImagesError;
use aws_sdk_ecr::operation::put_image::PutImageError;
use aws_sdk_ecr::types::{Image, ImageFailure, ImageFailureCode, ImageIdentifier};
use aws_sdk_ecr::Client as EcrClient;
use std::sync::Arc;

use super::{ImageDetail, ImageRegistry, RegistryError, RegistryImage, RegistryProvider};
use crate::arn::RepositoryArn;
use crate::settings::AwsSettings;

/// Manifest types requested from BatchGetImage so that OCI images and
/// multi-arch indexes are returned unconverted
const ACCEPTED_MEDIA_TYPES: [&str; 5] = [
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.docker.distribution.manifest.v1+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.oci.image.index.v1+json",
];

/// Extract a clean error message from an AWS SDK error
///
/// Prefers the service error code and message; falls back to the full error
/// chain for transport and dispatch failures, which carry no metadata.
fn format_sdk_error<E>(err: &E) -> String
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match (err.code(), err.message()) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => code.to_string(),
        (None, Some(message)) => message.to_string(),
        (None, None) => DisplayErrorContext(err).to_string(),
    }
}

/// Per-image failures that mean "there is nothing at this tag"
fn is_missing_image(failure: &ImageFailure) -> bool {
    matches!(
        failure.failure_code(),
        Some(ImageFailureCode::ImageNotFound) | Some(ImageFailureCode::ImageTagDoesNotMatchDigest)
    )
}

fn rejected(failure: &ImageFailure) -> RegistryError {
    RegistryError::Rejected {
        code: failure
            .failure_code()
            .map(|c| c.as_str().to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        reason: failure.failure_reason().unwrap_or_default().to_string(),
    }
}

/// Fail on the first per-image failure that is not a missing image
fn check_failures(failures: &[ImageFailure]) -> Result<(), RegistryError> {
    match failures.iter().find(|f| !is_missing_image(f)) {
        Some(failure) => Err(rejected(failure)),
        None => Ok(()),
    }
}

/// PutImage refuses a tag the manifest already carries
fn is_already_tagged(err: &PutImageError) -> bool {
    err.is_image_already_exists_exception()
}

/// DescribeImages raises instead of returning an empty list for unknown tags
fn is_unknown_tag(err: &DescribeImagesError) -> bool {
    err.is_image_not_found_exception()
}

/// Convert BatchGetImage results, rejecting images that cannot be re-put
fn to_registry_images(images: &[Image]) -> Result<Vec<RegistryImage>, RegistryError> {
    images
        .iter()
        .map(|image| {
            let digest = image.image_id().and_then(|id| id.image_digest());
            match (digest, image.image_manifest()) {
                (Some(digest), Some(manifest)) => Ok(RegistryImage {
                    digest: digest.to_string(),
                    manifest: manifest.to_string(),
                    media_type: image.image_manifest_media_type().map(String::from),
                }),
                (digest, manifest) => Err(RegistryError::Rejected {
                    code: "IncompleteImage".to_string(),
                    reason: format!(
                        "image {} returned without {}",
                        digest.unwrap_or("<unknown digest>"),
                        if manifest.is_none() { "a manifest" } else { "a digest" }
                    ),
                }),
            }
        })
        .collect()
}

/// Shared AWS session handing out region-scoped ECR clients
///
/// The AWS config (credentials, retry policy, endpoint) is loaded once; each
/// call to [`RegistryProvider::registry_for`] builds a client bound to the
/// region of the repository being tagged.
pub struct EcrSession {
    sdk_config: SdkConfig,
}

impl EcrSession {
    /// Load the AWS config
    ///
    /// Uses static credentials when both keys are configured, otherwise the
    /// default credential chain (env vars, profile, IAM role, ...). The SDK is
    /// limited to a single attempt; the tagger does not retry.
    pub async fn new(settings: &AwsSettings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::standard().with_max_attempts(1));

        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            let creds = aws_sdk_ecr::config::Credentials::new(
                access_key,
                secret_key,
                settings.session_token.clone(),
                None,
                "static",
            );
            loader = loader.credentials_provider(creds);
        } else if let Some(profile) = &settings.profile {
            loader = loader.profile_name(profile);
        }

        if let Some(endpoint_url) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        Self {
            sdk_config: loader.load().await,
        }
    }

    pub fn from_sdk_config(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }
}

impl RegistryProvider for EcrSession {
    fn registry_for(&self, region: &str) -> Arc<dyn ImageRegistry> {
        let config = aws_sdk_ecr::config::Builder::from(&self.sdk_config)
            .region(Region::new(region.to_string()))
            .build();

        Arc::new(EcrRegistry {
            client: EcrClient::from_conf(config),
        })
    }

    fn provider_name(&self) -> &str {
        "ecr"
    }
}

/// ECR client for one region
pub struct EcrRegistry {
    client: EcrClient,
}

impl EcrRegistry {
    pub fn new(client: EcrClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageRegistry for EcrRegistry {
    async fn batch_get_image(
        &self,
        repo: &RepositoryArn,
        tag: &str,
    ) -> Result<Vec<RegistryImage>, RegistryError> {
        let mut request = self
            .client
            .batch_get_image()
            .registry_id(repo.account_id())
            .repository_name(repo.repository())
            .image_ids(ImageIdentifier::builder().image_tag(tag).build());
        for media_type in ACCEPTED_MEDIA_TYPES {
            request = request.accepted_media_types(media_type);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::Api(format_sdk_error(&e)))?;

        check_failures(response.failures())?;
        let images = to_registry_images(response.images())?;
        if images.is_empty() {
            tracing::debug!(
                repository = %repo.repository(),
                tag = %tag,
                "No image found for tag"
            );
        }

        Ok(images)
    }

    async fn put_image(
        &self,
        repo: &RepositoryArn,
        image: &RegistryImage,
        tag: &str,
    ) -> Result<(), RegistryError> {
        let mut request = self
            .client
            .put_image()
            .registry_id(repo.account_id())
            .repository_name(repo.repository())
            .image_manifest(&image.manifest)
            .image_digest(&image.digest)
            .image_tag(tag);
        if let Some(media_type) = &image.media_type {
            request = request.image_manifest_media_type(media_type);
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) if err.as_service_error().is_some_and(is_already_tagged) => {
                tracing::debug!(
                    repository = %repo.repository(),
                    tag = %tag,
                    digest = %image.digest,
                    "Image already carries tag"
                );
                Ok(())
            }
            Err(err) => Err(RegistryError::Api(format_sdk_error(&err))),
        }
    }

    async fn batch_delete_image(
        &self,
        repo: &RepositoryArn,
        tag: &str,
        digest: &str,
    ) -> Result<(), RegistryError> {
        let response = self
            .client
            .batch_delete_image()
            .registry_id(repo.account_id())
            .repository_name(repo.repository())
            .image_ids(
                ImageIdentifier::builder()
                    .image_tag(tag)
                    .image_digest(digest)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| RegistryError::Api(format_sdk_error(&e)))?;

        check_failures(response.failures())
    }

    async fn describe_images(
        &self,
        repo: &RepositoryArn,
        tag: &str,
    ) -> Result<Vec<ImageDetail>, RegistryError> {
        let response = match self
            .client
            .describe_images()
            .registry_id(repo.account_id())
            .repository_name(repo.repository())
            .image_ids(ImageIdentifier::builder().image_tag(tag).build())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.as_service_error().is_some_and(is_unknown_tag) => {
                return Ok(Vec::new());
            }
            Err(err) => return Err(RegistryError::Api(format_sdk_error(&err))),
        };

        Ok(response
            .image_details()
            .iter()
            .map(|detail| ImageDetail {
                digest: detail.image_digest().unwrap_or_default().to_string(),
                tags: detail.image_tags().to_vec(),
            })
            .collect())
    }
}
