//! ledgersync CLI - Command-line interface for ledgersync
//!
//! Provides commands for:
//! - Listing and creating ledgers on the remote store
//! - Queueing local operations and running sync cycles
//! - Inspecting the change log and the local sync state
//! - Releasing locks, resetting ledgers and managing backups and attachments

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ledgersync_core::config::Config;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    attachment::AttachmentCommand, backup::BackupCommand, completions::CompletionsCommand,
    config::ConfigCommand, create::CreateCommand, enqueue::EnqueueCommand,
    ledgers::LedgersCommand, pull::PullCommand, reset::ResetCommand, status::StatusCommand,
    sync::SyncCommand, unlock::UnlockCommand,
};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "ledgersync",
    version,
    about = "Replicates expense ledgers through a shared remote folder"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List ledgers on the remote store
    Ledgers(LedgersCommand),
    /// Create a ledger on the remote store and follow it
    Create(CreateCommand),
    /// Queue a local operation for the next sync
    Enqueue(EnqueueCommand),
    /// Run one sync cycle for a ledger
    Sync(SyncCommand),
    /// Show remote change sets without applying them
    Pull(PullCommand),
    /// Show local sync state
    Status(StatusCommand),
    /// Release the remote lock of a ledger
    Unlock(UnlockCommand),
    /// Delete a ledger's remote folder
    Reset(ResetCommand),
    /// Store and fetch files kept in a ledger folder
    #[command(subcommand)]
    Attachment(AttachmentCommand),
    /// Store, list and fetch backups
    #[command(subcommand)]
    Backup(BackupCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Generate shell completions
    Completions(CompletionsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    // -v wins over the configured level, RUST_LOG over both
    let filter = match cli.verbose {
        0 => Config::load_or_default(&config_path).logging.level,
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    };

    match cli.command {
        Commands::Ledgers(cmd) => cmd.execute(format, &config_path).await,
        Commands::Create(cmd) => cmd.execute(format, &config_path).await,
        Commands::Enqueue(cmd) => cmd.execute(format, &config_path).await,
        Commands::Sync(cmd) => cmd.execute(format, &config_path).await,
        Commands::Pull(cmd) => cmd.execute(format, &config_path).await,
        Commands::Status(cmd) => cmd.execute(format, &config_path).await,
        Commands::Unlock(cmd) => cmd.execute(format, &config_path).await,
        Commands::Reset(cmd) => cmd.execute(format, &config_path).await,
        Commands::Attachment(cmd) => cmd.execute(format, &config_path).await,
        Commands::Backup(cmd) => cmd.execute(format, &config_path).await,
        Commands::Config(cmd) => cmd.execute(format, &config_path).await,
        Commands::Completions(cmd) => cmd.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_with_globals() {
        let cli = Cli::try_parse_from([
            "ledgersync",
            "--json",
            "-vv",
            "sync",
            "3f2504e0-4f89-41d3-9a0c-0305e82c3301",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Sync(_)));
    }

    #[test]
    fn test_parse_rejects_bad_ledger_id() {
        assert!(Cli::try_parse_from(["ledgersync", "sync", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_parse_pull_since() {
        let cli = Cli::try_parse_from([
            "ledgersync",
            "pull",
            "3f2504e0-4f89-41d3-9a0c-0305e82c3301",
            "--since",
            "1:7",
        ])
        .unwrap();
        match cli.command {
            Commands::Pull(cmd) => {
                assert_eq!(cmd.since, Some(ledgersync_core::domain::SequenceNumber::new(1, 7)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_attachment_store() {
        let cli = Cli::try_parse_from([
            "ledgersync",
            "attachment",
            "store",
            "3f2504e0-4f89-41d3-9a0c-0305e82c3301",
            "receipt.jpg",
            "--name",
            "tx-1.jpg",
        ])
        .unwrap();
        match cli.command {
            Commands::Attachment(AttachmentCommand::Store { name, .. }) => {
                assert_eq!(name.as_deref(), Some("tx-1.jpg"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_enqueue_fields() {
        let cli = Cli::try_parse_from([
            "ledgersync",
            "enqueue",
            "3f2504e0-4f89-41d3-9a0c-0305e82c3301",
            "created",
            "tx-1",
            "-f",
            "amount=-500",
            "-f",
            "payee=Bakery",
        ])
        .unwrap();
        match cli.command {
            Commands::Enqueue(cmd) => assert_eq!(cmd.fields.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
