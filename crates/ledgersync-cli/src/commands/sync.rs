//! Sync command - Run one sync cycle for a ledger
//!
//! Provides the `ledgersync sync` CLI command which:
//! 1. Opens the state database and builds the provider
//! 2. Makes sure this device follows the ledger (reading its metadata from
//!    the remote store the first time)
//! 3. Runs a [`SyncCycle`] and reports what was pulled and pushed

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use ledgersync_core::domain::LedgerId;
use ledgersync_core::ports::ILocalLedger;
use ledgersync_sync::cycle::DeferReason;
use ledgersync_sync::{CycleOutcome, SyncCycle, SyncError};
use tracing::info;

use super::AppContext;
use crate::output::{get_formatter, report_sync_error, OutputFormat};

/// Pull remote changes and push local ones
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Ledger UUID
    pub ledger: LedgerId,
}

impl SyncCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let mut ctx = AppContext::open(config_path).await?;

        let result = self.run(&mut ctx).await;
        match result {
            Ok(CycleOutcome::Completed(report)) => {
                info!(ledger = %self.ledger, "Sync finished");
                if format == OutputFormat::Json {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "outcome": "completed",
                        "applied": report.applied,
                        "skipped": report.skipped.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        "pushed": report.pushed.map(|s| s.to_string()),
                        "pushed_operations": report.pushed_operations,
                        "cursor": report.cursor.map(|s| s.to_string()),
                        "duration_ms": report.duration_ms,
                    }));
                } else {
                    formatter.success("Sync completed");
                    formatter.field("Applied", &report.applied);
                    match report.pushed {
                        Some(at) => formatter.field(
                            "Pushed",
                            &format!("{} operation(s) at {at}", report.pushed_operations),
                        ),
                        None => formatter.field("Pushed", &"nothing"),
                    }
                    if let Some(cursor) = report.cursor {
                        formatter.field("Cursor", &cursor);
                    }
                    formatter.field("Duration", &format!("{} ms", report.duration_ms));
                    for sequence in &report.skipped {
                        formatter.warn(&format!("Change file {sequence} could not be read and was skipped"));
                    }
                }
            }
            Ok(CycleOutcome::Deferred {
                reason,
                retry_after_ms,
            }) => {
                let why = match &reason {
                    DeferReason::Backoff => "backing off after earlier failures".to_string(),
                    DeferReason::Locked { holder } => format!("locked by another device ({holder})"),
                };
                if format == OutputFormat::Json {
                    formatter.print_json(&serde_json::json!({
                        "success": false,
                        "outcome": "deferred",
                        "reason": why,
                        "retry_after_ms": retry_after_ms,
                    }));
                } else {
                    formatter.warn(&format!("Sync deferred: {why}"));
                    formatter.info(&format!(
                        "Try again in {} s",
                        (retry_after_ms.max(0) + 999) / 1000
                    ));
                }
            }
            Err(e) => report_sync_error(format, &*formatter, &e),
        }

        ctx.close().await;
        Ok(())
    }

    async fn run(&self, ctx: &mut AppContext) -> Result<CycleOutcome, SyncError> {
        if ctx.journal.ledger(&self.ledger).await?.is_none() {
            ctx.provider.set_up().await?;
            let metadata = ctx.provider.open_ledger(&self.ledger).await?;
            ctx.journal
                .register_ledger(&metadata)
                .await
                .context("Failed to register ledger")?;
            info!(ledger = %self.ledger, label = %metadata.label, "Now following ledger");
        }

        let journal: Arc<dyn ILocalLedger> = ctx.journal.clone();
        SyncCycle::new(&mut ctx.provider, journal)
            .run(&self.ledger)
            .await
    }
}
