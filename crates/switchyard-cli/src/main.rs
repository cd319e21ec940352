//! Switchyard CLI tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use switchyard_config::{LogFormat, LoggingConfig, load_system_config};
use switchyard_core::BuildId;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Switchyard build scheduler", long_about = None)]
struct Cli {
    /// System configuration file
    #[arg(long, default_value = "switchyard.kdl")]
    config: String,

    /// PostgreSQL connection string, overriding the config file
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Create or update a pipeline from a JSON config file
    SetPipeline {
        /// Pipeline name
        name: String,
        /// Path to the pipeline config
        path: String,
    },
    /// Stream a build's events as JSON lines
    Events {
        /// Build ID
        build: BuildId,
        /// First event id to print
        #[arg(long, default_value = "0")]
        from: u64,
    },
    /// Show why a pending build has not started
    Preparation {
        /// Build ID
        build: BuildId,
    },
    /// Show a build's inputs and outputs
    Resources {
        /// Build ID
        build: BuildId,
    },
    /// Abort a build
    Abort {
        /// Build ID
        build: BuildId,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_system_config(&cli.config)
        .with_context(|| format!("Failed to load config file: {}", cli.config))?;
    init_tracing(&config.logging);

    let database_url = cli
        .database_url
        .or_else(|| config.database.url.clone())
        .context("No database URL: pass --database-url or set DATABASE_URL")?;

    let connect = || commands::connect(&database_url, &config);
    match cli.command {
        Commands::Migrate => {
            commands::migrate(&database_url, &config).await?;
        }
        Commands::SetPipeline { name, path } => {
            commands::pipelines::set(&connect().await?, &name, &path).await?;
        }
        Commands::Events { build, from } => {
            commands::builds::events(&connect().await?, build, from).await?;
        }
        Commands::Preparation { build } => {
            commands::builds::preparation(&connect().await?, build).await?;
        }
        Commands::Resources { build } => {
            commands::builds::resources(&connect().await?, build).await?;
        }
        Commands::Abort { build } => {
            commands::builds::abort(&connect().await?, build).await?;
        }
    }

    Ok(())
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
    fn test_parse_commands() {
        let cli = Cli::try_parse_from(["switchyard", "migrate"]).unwrap();
        assert!(matches!(cli.command, Commands::Migrate));
        assert_eq!(cli.config, "switchyard.kdl");

        let build = BuildId::new();
        let id = build.to_string();
        let cli = Cli::try_parse_from(["switchyard", "events", id.as_str(), "--from", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Events { build: b, from: 3 } if b == build));

        assert!(Cli::try_parse_from(["switchyard", "abort", "not-a-uuid"]).is_err());
    }
}
