//! Pull command - Show remote change sets without applying them

use std::path::Path;

use anyhow::Result;
use clap::Args;
use ledgersync_core::domain::{ChangeSet, LedgerId, SequenceNumber};
use ledgersync_sync::SyncError;

use super::AppContext;
use crate::output::{get_formatter, report_sync_error, OutputFormat};

/// Print the operations written after a position of the change log
#[derive(Debug, Args)]
pub struct PullCommand {
    /// Ledger UUID
    pub ledger: LedgerId,

    /// Start after this position (shard:number); the whole log when omitted
    #[arg(long)]
    pub since: Option<SequenceNumber>,

    /// Start after the cursor this device has stored
    #[arg(long, conflicts_with = "since")]
    pub from_cursor: bool,
}

impl PullCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        use ledgersync_core::ports::ILocalLedger;

        let formatter = get_formatter(format);
        let mut ctx = AppContext::open(config_path).await?;

        let since = if self.from_cursor {
            ctx.journal.load_cursor(&self.ledger).await?
        } else {
            self.since
        };

        let pulled: Result<ChangeSet, SyncError> = async {
            ctx.provider.set_up().await?;
            ctx.provider.open_ledger(&self.ledger).await?;
            ctx.provider.pull_changes_since(since).await
        }
        .await;

        match pulled {
            Ok(change_set) => print_change_set(format, &*formatter, since, &change_set),
            Err(e) => report_sync_error(format, &*formatter, &e),
        }

        ctx.close().await;
        Ok(())
    }
}

fn print_change_set(
    format: OutputFormat,
    formatter: &dyn crate::output::OutputFormatter,
    since: Option<SequenceNumber>,
    change_set: &ChangeSet,
) {
    if format == OutputFormat::Json {
        formatter.print_json(&serde_json::json!({
            "since": since.map(|s| s.to_string()),
            "sequence": change_set.sequence().map(|s| s.to_string()),
            "skipped": change_set.skipped().iter().map(ToString::to_string).collect::<Vec<_>>(),
            "operations": change_set.operations(),
        }));
        return;
    }

    if change_set.is_empty() {
        formatter.success("No new change sets");
    } else {
        formatter.success(&format!(
            "{} operation(s) up to {}",
            change_set.operations().len(),
            change_set
                .sequence()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string())
        ));
        for op in change_set.operations() {
            let fields = serde_json::Value::Object(op.fields.clone());
            formatter.info(&format!("{:?} {} {}", op.kind, op.uuid, fields));
        }
    }
    for sequence in change_set.skipped() {
        formatter.warn(&format!("Change file {sequence} could not be read"));
    }
}
