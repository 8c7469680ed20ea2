//! Unlock command - Release (or break) the remote lock of a ledger

use std::path::Path;

use anyhow::Result;
use clap::Args;
use ledgersync_core::domain::LedgerId;
use ledgersync_sync::SyncError;
use tracing::warn;

use super::AppContext;
use crate::output::{get_formatter, report_sync_error, OutputFormat};

/// Release the ledger lock held by this device
#[derive(Debug, Args)]
pub struct UnlockCommand {
    /// Ledger UUID
    pub ledger: LedgerId,

    /// Remove the lock whoever holds it (only when its holder is known to be gone)
    #[arg(long)]
    pub force: bool,
}

impl UnlockCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let mut ctx = AppContext::open(config_path).await?;

        let result: Result<Option<String>, SyncError> = async {
            ctx.provider.set_up().await?;
            ctx.provider.open_ledger(&self.ledger).await?;
            if self.force {
                let broken = ctx.provider.break_lock().await?;
                if let Some(record) = &broken {
                    warn!(ledger = %self.ledger, token = %record.token, "Lock broken by hand");
                }
                Ok(broken.map(|r| r.token.to_string()))
            } else {
                let token = ctx.provider.lock_state().owned().map(|r| r.token.to_string());
                ctx.provider.unlock().await?;
                Ok(token)
            }
        }
        .await;

        match result {
            Ok(token) => {
                if format == OutputFormat::Json {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "forced": self.force,
                        "token": token,
                    }));
                } else if self.force && token.is_none() {
                    formatter.success("Ledger was not locked");
                } else {
                    formatter.success("Lock released");
                }
            }
            Err(e) => {
                report_sync_error(format, &*formatter, &e);
                if matches!(e, SyncError::LockNotHeld { .. }) && format == OutputFormat::Human {
                    formatter.info("Use --force to remove a lock left behind by another device.");
                }
            }
        }

        ctx.close().await;
        Ok(())
    }
}
