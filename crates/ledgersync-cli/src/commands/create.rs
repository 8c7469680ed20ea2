//! Create command - Start syncing a new ledger
//!
//! Creates the ledger folder on the remote store (or adopts the existing one
//! for the same UUID) and makes this device follow the ledger.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use ledgersync_core::domain::{AccountType, LedgerId, LedgerMetadata};

use super::AppContext;
use crate::output::{get_formatter, report_sync_error, OutputFormat};

/// Create a ledger on the remote store
#[derive(Debug, Args)]
pub struct CreateCommand {
    /// Display name of the ledger
    pub label: String,

    /// ISO 4217 currency code (defaults to the configured home currency)
    #[arg(long)]
    pub currency: Option<String>,

    /// Free-text description
    #[arg(long, default_value = "")]
    pub description: String,

    /// Opening balance in minor units (cents)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub opening_balance: i64,

    /// Account type: cash, bank, ccard, asset or liability
    #[arg(long, default_value = "cash")]
    pub account_type: AccountType,

    /// Reuse a known ledger UUID instead of generating one
    #[arg(long)]
    pub uuid: Option<LedgerId>,
}

impl CreateCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let mut ctx = AppContext::open(config_path).await?;

        let currency = self
            .currency
            .clone()
            .unwrap_or_else(|| ctx.config.ledgers.home_currency.clone())
            .to_ascii_uppercase();
        let metadata = LedgerMetadata::new(self.uuid.unwrap_or_default(), &self.label, currency)
            .with_description(&self.description)
            .with_opening_balance(self.opening_balance)
            .with_account_type(self.account_type);
        metadata.validate().context("Invalid ledger")?;

        let result = match ctx.provider.set_up().await {
            Ok(()) => ctx.provider.with_ledger(&metadata).await.map(|h| h.folder.clone()),
            Err(e) => Err(e),
        };
        let folder = match result {
            Ok(folder) => folder,
            Err(e) => {
                report_sync_error(format, &*formatter, &e);
                ctx.close().await;
                return Ok(());
            }
        };
        ctx.journal
            .register_ledger(&metadata)
            .await
            .context("Failed to register ledger")?;

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "uuid": metadata.uuid.to_string(),
                "label": metadata.label,
                "folder": folder.to_string(),
            }));
        } else {
            formatter.success(&format!("Ledger '{}' ready", metadata.label));
            formatter.field("UUID", &metadata.uuid);
            formatter.field("Folder", &folder);
        }

        ctx.close().await;
        Ok(())
    }
}
