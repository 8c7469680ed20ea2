//! Reset command - Wipe a ledger from the remote store
//!
//! Trashes the ledger folder (and with it the whole change log) and forgets
//! the local cursor. Local operations not pushed yet stay in the outbox and
//! go out with the next sync, which starts a fresh folder.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use ledgersync_core::domain::LedgerId;
use ledgersync_sync::SyncError;
use tracing::info;

use super::AppContext;
use crate::output::{get_formatter, report_sync_error, OutputFormat};

/// Remove a ledger's remote folder
#[derive(Debug, Args)]
pub struct ResetCommand {
    /// Ledger UUID
    pub ledger: LedgerId,

    /// Confirm the reset
    #[arg(long)]
    pub yes: bool,
}

impl ResetCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        if !self.yes {
            formatter.error("Resetting deletes the remote change log of this ledger for every device.");
            formatter.info("Run again with --yes to proceed.");
            return Ok(());
        }

        let mut ctx = AppContext::open(config_path).await?;
        let result: Result<(), SyncError> = async {
            ctx.provider.set_up().await?;
            ctx.provider.reset_ledger(&self.ledger).await
        }
        .await;

        match result {
            Ok(()) => {
                ctx.journal
                    .forget_remote_state(&self.ledger)
                    .await
                    .context("Failed to clear local sync state")?;
                info!(ledger = %self.ledger, "Ledger reset");
                if format == OutputFormat::Json {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "uuid": self.ledger.to_string(),
                    }));
                } else {
                    formatter.success(&format!("Ledger {} reset", self.ledger));
                }
            }
            Err(e) => report_sync_error(format, &*formatter, &e),
        }

        ctx.close().await;
        Ok(())
    }
}
