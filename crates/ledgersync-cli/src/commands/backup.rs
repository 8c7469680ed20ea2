//! Backup commands - Store, list and fetch opaque backup files
//!
//! Backups live in the `BACKUPS` folder of the remote store and are kept
//! byte for byte; the engine never encrypts them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use ledgersync_sync::{BackupEntry, SyncError};
use tracing::info;

use super::AppContext;
use crate::output::{get_formatter, report_sync_error, OutputFormat, OutputFormatter};

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Upload a local file as a backup
    Store {
        /// File to upload
        file: PathBuf,
        /// Name on the remote store (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// List stored backups
    List,
    /// Download a backup
    Fetch {
        /// Backup name
        name: String,
        /// Where to write it (defaults to the backup name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl BackupCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let mut ctx = AppContext::open(config_path).await?;

        let result = match ctx.provider.set_up().await {
            Ok(()) => match self {
                BackupCommand::Store { file, name } => {
                    Self::store(&ctx, format, &*formatter, file, name.as_deref()).await
                }
                BackupCommand::List => Self::list(&ctx, format, &*formatter).await,
                BackupCommand::Fetch { name, output } => {
                    Self::fetch(&ctx, format, &*formatter, name, output.as_deref()).await
                }
            },
            Err(e) => Ok(Err(e)),
        };

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => report_sync_error(format, &*formatter, &e),
            Err(e) => {
                ctx.close().await;
                return Err(e);
            }
        }
        ctx.close().await;
        Ok(())
    }

    async fn store(
        ctx: &AppContext,
        format: OutputFormat,
        formatter: &dyn OutputFormatter,
        file: &Path,
        name: Option<&str>,
    ) -> Result<Result<(), SyncError>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => file
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .with_context(|| format!("Cannot derive a backup name from {}", file.display()))?,
        };
        let content = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;

        if let Err(e) = ctx.provider.store_backup(&name, &content).await {
            return Ok(Err(e));
        }
        info!(name = %name, size = content.len(), "Backup stored");

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "name": name,
                "size": content.len(),
            }));
        } else {
            formatter.success(&format!("Stored backup '{}' ({} bytes)", name, content.len()));
        }
        Ok(Ok(()))
    }

    async fn list(
        ctx: &AppContext,
        format: OutputFormat,
        formatter: &dyn OutputFormatter,
    ) -> Result<Result<(), SyncError>> {
        let backups: Vec<BackupEntry> = match ctx.provider.list_backups().await {
            Ok(backups) => backups,
            Err(e) => return Ok(Err(e)),
        };

        if format == OutputFormat::Json {
            let items: Vec<serde_json::Value> = backups
                .iter()
                .map(|b| serde_json::json!({ "name": b.name, "size": b.size }))
                .collect();
            formatter.print_json(&serde_json::json!({ "backups": items }));
        } else if backups.is_empty() {
            formatter.info("No backups stored");
        } else {
            formatter.success(&format!("{} backup(s)", backups.len()));
            for b in &backups {
                let size = b.size.map_or_else(|| "?".to_string(), |s| format!("{s} bytes"));
                formatter.info(&format!("{:<40} {}", b.name, size));
            }
        }
        Ok(Ok(()))
    }

    async fn fetch(
        ctx: &AppContext,
        format: OutputFormat,
        formatter: &dyn OutputFormatter,
        name: &str,
        output: Option<&Path>,
    ) -> Result<Result<(), SyncError>> {
        let content = match ctx.provider.fetch_backup(name).await {
            Ok(content) => content,
            Err(e) => return Ok(Err(e)),
        };
        let target = output.map_or_else(|| PathBuf::from(name), Path::to_path_buf);
        tokio::fs::write(&target, &content)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "name": name,
                "path": target.display().to_string(),
                "size": content.len(),
            }));
        } else {
            formatter.success(&format!(
                "Fetched backup '{}' to {} ({} bytes)",
                name,
                target.display(),
                content.len()
            ));
        }
        Ok(Ok(()))
    }
}
