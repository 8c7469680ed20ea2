//! Attachment commands - Store and fetch files kept in a ledger folder
//!
//! Attachments (transaction pictures and the like) sit next to the change
//! log in the ledger's folder and are encrypted like change files when a
//! cipher is configured.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use ledgersync_core::domain::LedgerId;
use ledgersync_sync::SyncError;

use super::AppContext;
use crate::output::{get_formatter, report_sync_error, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum AttachmentCommand {
    /// Upload a local file into a ledger folder
    Store {
        /// Ledger UUID
        ledger: LedgerId,
        /// File to upload
        file: PathBuf,
        /// Name on the remote store (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download an attachment of a ledger
    Fetch {
        /// Ledger UUID
        ledger: LedgerId,
        /// Attachment name
        name: String,
        /// Where to write it (defaults to the name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl AttachmentCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let mut ctx = AppContext::open(config_path).await?;

        let outcome = match self {
            AttachmentCommand::Store { ledger, file, name } => {
                Self::store(&mut ctx, ledger, file, name.as_deref()).await
            }
            AttachmentCommand::Fetch {
                ledger,
                name,
                output,
            } => Self::fetch(&mut ctx, ledger, name, output.as_deref()).await,
        };

        match outcome {
            Ok(Ok(report)) => {
                if format == OutputFormat::Json {
                    formatter.print_json(&report);
                } else {
                    let name = report["name"].as_str().unwrap_or_default();
                    let size = report["size"].as_u64().unwrap_or_default();
                    match report["path"].as_str() {
                        Some(path) => formatter.success(&format!(
                            "Fetched attachment '{name}' to {path} ({size} bytes)"
                        )),
                        None => formatter.success(&format!(
                            "Stored attachment '{name}' ({size} bytes)"
                        )),
                    }
                }
            }
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
        ctx: &mut AppContext,
        ledger: &LedgerId,
        file: &Path,
        name: Option<&str>,
    ) -> Result<Result<serde_json::Value, SyncError>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => file
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .with_context(|| format!("Cannot derive a name from {}", file.display()))?,
        };
        let content = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;

        let stored: Result<(), SyncError> = async {
            ctx.provider.set_up().await?;
            ctx.provider.open_ledger(ledger).await?;
            ctx.provider.store_attachment(&name, &content).await
        }
        .await;
        Ok(stored.map(|()| {
            serde_json::json!({
                "success": true,
                "ledger": ledger.to_string(),
                "name": name,
                "size": content.len(),
            })
        }))
    }

    async fn fetch(
        ctx: &mut AppContext,
        ledger: &LedgerId,
        name: &str,
        output: Option<&Path>,
    ) -> Result<Result<serde_json::Value, SyncError>> {
        let fetched: Result<Vec<u8>, SyncError> = async {
            ctx.provider.set_up().await?;
            ctx.provider.open_ledger(ledger).await?;
            ctx.provider.fetch_attachment(name).await
        }
        .await;
        let content = match fetched {
            Ok(content) => content,
            Err(e) => return Ok(Err(e)),
        };

        let target = output.map_or_else(|| PathBuf::from(name), Path::to_path_buf);
        tokio::fs::write(&target, &content)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;
        Ok(Ok(serde_json::json!({
            "success": true,
            "ledger": ledger.to_string(),
            "name": name,
            "path": target.display().to_string(),
            "size": content.len(),
        })))
    }
}
