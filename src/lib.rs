//! Environment tag management for AWS ECR images.
//!
//! Images are identified by a unique version tag (typically a git SHA);
//! [`Tagger`] attaches environment tags such as "staging" or "prod" to the
//! image a version tag points at, removes them again, and lists the tags of a
//! version.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ecr_tagger::{registry::EcrSession, settings::AwsSettings, stats::LogStats, Tagger};
//!
//! let session = EcrSession::new(&AwsSettings::default()).await;
//! let tagger = Tagger::new(Arc::new(session), Arc::new(LogStats));
//! let repo = "arn:aws:ecr:eu-west-1:123456789012:repository/web";
//!
//! tagger.add(repo, "3f2c1ab", &["staging"]).await?;
//! let tags = tagger.get(repo, "3f2c1ab").await?;
//! ```

pub mod arn;
pub mod error;
pub mod registry;
pub mod settings;
pub mod stats;
pub mod tagger;

pub use arn::{ParseError, RepositoryArn};
pub use error::TaggerError;
pub use tagger::Tagger;
