use thiserror::Error;

use crate::arn::ParseError;
use crate::registry::{RegistryError, RegistryOperation};

/// Errors returned by [`crate::Tagger`] operations
#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("failed to read ECR repository reference: {0}")]
    Parse(#[from] ParseError),

    /// A remote call failed; nothing after it was attempted
    ///
    /// `completed` counts the input tags fully processed before the failure,
    /// so `tags[completed..]` is what remains to be done. Work already done is
    /// not rolled back.
    #[error(
        "{operation} failed for {} in repository '{repository}' ({completed} tag(s) completed): {source}",
        subject(.tag, .digest)
    )]
    RemoteCall {
        operation: RegistryOperation,
        repository: String,
        tag: String,
        digest: Option<String>,
        completed: usize,
        #[source]
        source: RegistryError,
    },

    #[error(
        "more than one image with version tag '{version}' found in repository '{repository}' ({count} images)"
    )]
    InvariantViolation {
        repository: String,
        version: String,
        count: usize,
    },

    #[error("no image with version tag '{version}' found in repository '{repository}'")]
    NotFound { repository: String, version: String },
}

fn subject(tag: &str, digest: &Option<String>) -> String {
    match digest {
        Some(digest) => format!("tag '{}' and image {}", tag, digest),
        None => format!("tag '{}'", tag),
    }
}

impl TaggerError {
    /// Number of tags completed before a remote failure, if this is one
    pub fn completed(&self) -> Option<usize> {
        match self {
            TaggerError::RemoteCall { completed, .. } => Some(*completed),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TaggerError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_call_message_with_digest() {
        let err = TaggerError::RemoteCall {
            operation: RegistryOperation::PutImage,
            repository: "web".to_string(),
            tag: "prod".to_string(),
            digest: Some("sha256:abc".to_string()),
            completed: 2,
            source: RegistryError::Api("AccessDenied".to_string()),
        };

        assert_eq!(
            err.to_string(),
            "PutImage failed for tag 'prod' and image sha256:abc in repository 'web' (2 tag(s) completed): AccessDenied"
        );
        assert_eq!(err.completed(), Some(2));
    }

    #[test]
    fn test_remote_call_message_without_digest() {
        let err = TaggerError::RemoteCall {
            operation: RegistryOperation::BatchGetImage,
            repository: "web".to_string(),
            tag: "prod".to_string(),
            digest: None,
            completed: 0,
            source: RegistryError::Api("throttled".to_string()),
        };

        assert!(err.to_string().starts_with("BatchGetImage failed for tag 'prod' in"));
    }

    #[test]
    fn test_not_found() {
        let err = TaggerError::NotFound {
            repository: "web".to_string(),
            version: "abc123".to_string(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.completed(), None);
    }
}
