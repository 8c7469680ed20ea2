//! Enqueue command - Record a local ledger operation for the next push
//!
//! Stands in for the ledger application when driving the engine by hand:
//! the operation goes into the outbox and leaves with the next `sync`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use ledgersync_cache::DatabasePool;
use ledgersync_cache::SqliteLedgerJournal;
use ledgersync_core::clock::{Clock, SystemClock};
use ledgersync_core::domain::{LedgerId, LedgerOperation, OperationKind};
use serde_json::{Map, Value};
use tracing::info;

use super::load_config;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Created,
    Updated,
    Deleted,
    Unsplit,
    Metadata,
    Link,
}

impl From<KindArg> for OperationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Created => OperationKind::Created,
            KindArg::Updated => OperationKind::Updated,
            KindArg::Deleted => OperationKind::Deleted,
            KindArg::Unsplit => OperationKind::Unsplit,
            KindArg::Metadata => OperationKind::Metadata,
            KindArg::Link => OperationKind::Link,
        }
    }
}

/// Record an operation in the local outbox
#[derive(Debug, Args)]
pub struct EnqueueCommand {
    /// Ledger UUID
    pub ledger: LedgerId,

    /// Kind of operation
    #[arg(value_enum)]
    pub kind: KindArg,

    /// UUID of the affected transaction
    pub uuid: String,

    /// Parent transaction of a split part
    #[arg(long)]
    pub parent: Option<String>,

    /// Replicated field as key=value; values that parse as JSON are kept typed
    #[arg(long = "field", short = 'f')]
    pub fields: Vec<String>,
}

impl EnqueueCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let config = load_config(config_path)?;
        let pool = DatabasePool::from_config(&config.state)
            .await
            .context("Failed to open state database")?;
        let journal = SqliteLedgerJournal::new(pool.pool().clone());

        if journal.ledger(&self.ledger).await?.is_none() {
            formatter.error(&format!(
                "Ledger {} is not followed on this device. Run 'ledgersync create' or 'ledgersync sync' first.",
                self.ledger
            ));
            pool.close().await;
            return Ok(());
        }

        let mut operation =
            LedgerOperation::new(self.kind.into(), &self.uuid, SystemClock.now_millis());
        operation.parent_uuid = self.parent.clone();
        operation.fields = parse_fields(&self.fields)?;

        let id = journal.record(&self.ledger, &operation).await?;
        info!(ledger = %self.ledger, id, "Operation queued");

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "id": id,
                "operation": operation,
            }));
        } else {
            formatter.success(&format!("Queued operation #{id} for {}", self.uuid));
        }

        pool.close().await;
        Ok(())
    }
}

/// Parses `key=value` pairs into replicated fields
fn parse_fields(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut fields = Map::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Expected key=value, got '{pair}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Empty field name in '{pair}'");
        }
        if matches!(key, "type" | "uuid" | "timestamp" | "parentUuid") {
            bail!("'{key}' is set by the command itself");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields_keeps_json_types() {
        let fields = parse_fields(&[
            "amount=-1250".to_string(),
            "payee=Corner Shop".to_string(),
            "cleared=true".to_string(),
        ])
        .unwrap();
        assert_eq!(fields["amount"], Value::from(-1250));
        assert_eq!(fields["payee"], Value::from("Corner Shop"));
        assert_eq!(fields["cleared"], Value::from(true));
    }

    #[test]
    fn test_parse_fields_rejects_bad_pairs() {
        assert!(parse_fields(&["amount".to_string()]).is_err());
        assert!(parse_fields(&["=1".to_string()]).is_err());
        assert!(parse_fields(&["uuid=x".to_string()]).is_err());
    }
}
