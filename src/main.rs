use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ecr_tagger::settings::Settings;

mod cli;

use cli::*;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run against an empty in-memory registry instead of ECR
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Tag(TagCommands),
    /// Check configuration for errors and unused options
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for all commands
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig => {
            println!("Checking configuration...");
            match Settings::new() {
                Ok(_) => {
                    println!("✓ Configuration is valid");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("✗ Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Tag(tag_cmd) => {
            let settings = Settings::new()?;
            let tagger = build_tagger(&settings, cli.dry_run).await;
            handle_tag_command(&tagger, tag_cmd).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add() {
        let cli = Cli::parse_from([
            "ecr-tagger",
            "add",
            "arn:aws:ecr:eu-west-1:123456789012:repository/web",
            "abc123",
            "staging",
            "prod",
        ]);
        match cli.command {
            Commands::Tag(TagCommands::Add { version, tags, .. }) => {
                assert_eq!(version, "abc123");
                assert_eq!(tags, vec!["staging", "prod"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_remove_requires_tags() {
        let result = Cli::try_parse_from([
            "ecr-tagger",
            "remove",
            "arn:aws:ecr:eu-west-1:123456789012:repository/web",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_dry_run_is_global() {
        let cli = Cli::parse_from([
            "ecr-tagger",
            "get",
            "arn:aws:ecr:eu-west-1:123456789012:repository/web",
            "abc123",
            "--dry-run",
        ]);
        assert!(cli.dry_run);
    }
}
