//! Ledgers command - List the ledgers found on the remote store
//!
//! Provides the `ledgersync ledgers` CLI command which:
//! 1. Connects to the configured backend
//! 2. Reads the metadata of every ledger folder in the root
//! 3. Marks the ledgers this device already follows

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use clap::Args;
use ledgersync_core::domain::LedgerMetadata;
use tracing::info;

use super::AppContext;
use crate::output::{get_formatter, report_sync_error, OutputFormat};

/// List remote ledgers
#[derive(Debug, Args)]
pub struct LedgersCommand {
    /// Only list ledgers this device follows (no remote call)
    #[arg(long)]
    pub local: bool,
}

impl LedgersCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let mut ctx = AppContext::open(config_path).await?;
        let followed: HashSet<_> = ctx
            .journal
            .ledgers()
            .await?
            .into_iter()
            .map(|l| l.uuid)
            .collect();

        let ledgers: Vec<LedgerMetadata> = if self.local {
            ctx.journal.ledgers().await?
        } else {
            if let Err(e) = ctx.provider.set_up().await {
                report_sync_error(format, &*formatter, &e);
                ctx.close().await;
                return Ok(());
            }
            match ctx.provider.list_ledgers().await {
                Ok(ledgers) => ledgers,
                Err(e) => {
                    report_sync_error(format, &*formatter, &e);
                    ctx.close().await;
                    return Ok(());
                }
            }
        };
        info!(count = ledgers.len(), local = self.local, "Listed ledgers");

        if format == OutputFormat::Json {
            let items: Vec<serde_json::Value> = ledgers
                .iter()
                .map(|l| {
                    serde_json::json!({
                        "uuid": l.uuid.to_string(),
                        "label": l.label,
                        "currency": l.currency,
                        "account_type": l.account_type.as_str(),
                        "opening_balance": l.opening_balance,
                        "followed": followed.contains(&l.uuid),
                    })
                })
                .collect();
            formatter.print_json(&serde_json::json!({ "ledgers": items }));
        } else if ledgers.is_empty() {
            formatter.info("No ledgers found");
        } else {
            formatter.success(&format!("{} ledger(s)", ledgers.len()));
            for l in &ledgers {
                let mark = if followed.contains(&l.uuid) { "*" } else { " " };
                formatter.info(&format!(
                    "{mark} {}  {:<24} {} {}",
                    l.uuid, l.label, l.currency, l.account_type
                ));
            }
            formatter.info("");
            formatter.info("* followed on this device");
        }

        ctx.close().await;
        Ok(())
    }
}
