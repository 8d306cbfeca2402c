use anyhow::{Context, Result};
use std::sync::Arc;

use ecr_tagger::registry::{EcrSession, InMemoryRegistry, RegistryProvider};
use ecr_tagger::settings::Settings;
use ecr_tagger::{Tagger, TaggerError};

#[derive(Debug, Clone, clap::Subcommand)]
pub enum TagCommands {
    /// Add tags to the image identified by a version tag
    Add {
        /// Repository ARN or registry URI
        reference: String,
        /// Version tag identifying the image (e.g., a git SHA)
        version: String,
        /// Tags to add
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Remove tags from every image in the repository
    #[command(visible_alias = "rm")]
    Remove {
        /// Repository ARN or registry URI
        reference: String,
        /// Tags to remove
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Print the tags of the image identified by a version tag
    Get {
        /// Repository ARN or registry URI
        reference: String,
        /// Version tag identifying the image
        version: String,
    },
}

/// Build a tagger from settings
///
/// With `dry_run` the tagger works against an empty in-memory registry, so
/// references are validated and calls logged without touching ECR.
pub async fn build_tagger(settings: &Settings, dry_run: bool) -> Tagger {
    let registries: Arc<dyn RegistryProvider> = if dry_run {
        tracing::info!("Dry run: using in-memory registry");
        Arc::new(InMemoryRegistry::new())
    } else {
        Arc::new(EcrSession::new(&settings.aws).await)
    };

    Tagger::new(registries, settings.stats.build())
        .with_call_timeout(settings.tagger.call_timeout())
}

pub async fn handle_tag_command(tagger: &Tagger, cmd: TagCommands) -> Result<()> {
    match cmd {
        TagCommands::Add {
            reference,
            version,
            tags,
        } => tagger
            .add(&reference, &version, &tags)
            .await
            .map_err(|e| with_resume_hint(e, &tags))
            .with_context(|| format!("Failed to add tags to version '{}'", version)),
        TagCommands::Remove { reference, tags } => tagger
            .remove(&reference, &tags)
            .await
            .map_err(|e| with_resume_hint(e, &tags))
            .context("Failed to remove tags"),
        TagCommands::Get { reference, version } => {
            let tags = tagger
                .get(&reference, &version)
                .await
                .with_context(|| format!("Failed to get tags of version '{}'", version))?;
            for tag in tags {
                println!("{}", tag);
            }
            Ok(())
        }
    }
}

/// Name the tags left unprocessed after a partial failure
fn with_resume_hint(err: TaggerError, tags: &[String]) -> anyhow::Error {
    match err.completed() {
        Some(completed) if completed < tags.len() => {
            let remaining = tags[completed..].join(" ");
            anyhow::Error::new(err).context(format!("Tags not processed: {}", remaining))
        }
        _ => err.into(),
    }
}
