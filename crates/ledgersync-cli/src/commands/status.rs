//! Status command - Display local synchronization state
//!
//! Provides the `ledgersync status` CLI command which shows, without any
//! remote call:
//! 1. The backoff state of the configured backend
//! 2. For every followed ledger: cursor, outbox size, applied operations and
//!    the cached lock hint

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use ledgersync_cache::SqliteStateStore;
use ledgersync_core::clock::{Clock, SystemClock};
use ledgersync_core::domain::LedgerId;
use ledgersync_core::ports::{ILocalLedger, IProviderStateStore};

use super::AppContext;
use crate::output::{get_formatter, OutputFormat};

/// Show sync state of followed ledgers
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Limit the output to one ledger
    pub ledger: Option<LedgerId>,
}

impl StatusCommand {
    pub async fn execute(&self, format: OutputFormat, config_path: &Path) -> Result<()> {
        let formatter = get_formatter(format);
        let ctx = AppContext::open(config_path).await?;
        let store = SqliteStateStore::new(ctx.pool.pool().clone());
        let scope = ctx.provider.settings().scope.clone();
        let now = SystemClock.now_millis();

        let backoff = ctx
            .provider
            .backoff()
            .state()
            .await
            .context("Failed to read backoff state")?;
        let waiting_ms = ctx.provider.backoff().policy().remaining_ms(&backoff, now);

        let mut ledgers = ctx.journal.ledgers().await?;
        if let Some(only) = &self.ledger {
            ledgers.retain(|l| &l.uuid == only);
        }

        let mut rows = Vec::with_capacity(ledgers.len());
        for ledger in &ledgers {
            let stats = ctx.journal.stats(&ledger.uuid).await?;
            let cursor = ctx.journal.load_cursor(&ledger.uuid).await?;
            let hint = store.load_lock_hint(&scope, &ledger.uuid).await?;
            rows.push((ledger, stats, cursor, hint));
        }

        if format == OutputFormat::Json {
            let items: Vec<serde_json::Value> = rows
                .iter()
                .map(|(ledger, stats, cursor, hint)| {
                    serde_json::json!({
                        "uuid": ledger.uuid.to_string(),
                        "label": ledger.label,
                        "cursor": cursor.map(|c| c.to_string()),
                        "pending": stats.pending,
                        "applied": stats.applied,
                        "pushed_change_sets": stats.pushed_change_sets,
                        "lock": hint.as_ref().map(|h| serde_json::json!({
                            "token": h.token.to_string(),
                            "owned": h.owned,
                            "observed_at": format_millis(h.observed_at),
                        })),
                    })
                })
                .collect();
            formatter.print_json(&serde_json::json!({
                "backend": ctx.config.storage.backend,
                "root": ctx.config.storage.root.display().to_string(),
                "scope": scope,
                "backoff": {
                    "active": waiting_ms > 0,
                    "current_delay_ms": backoff.current_delay_ms,
                    "retry_in_ms": waiting_ms,
                },
                "ledgers": items,
            }));
            ctx.close().await;
            return Ok(());
        }

        formatter.success(&format!(
            "ledgersync - {} backend at {}",
            ctx.config.storage.backend,
            ctx.config.storage.root.display()
        ));
        if waiting_ms > 0 {
            formatter.warn(&format!(
                "Backing off after remote failures: next attempt in {} s (delay {} ms)",
                (waiting_ms + 999) / 1000,
                backoff.current_delay_ms
            ));
        } else {
            formatter.field("Backoff", &"clear");
        }
        formatter.info("");

        if rows.is_empty() {
            formatter.info("No followed ledgers. Run 'ledgersync create' or 'ledgersync sync <uuid>'.");
        }
        for (ledger, stats, cursor, hint) in &rows {
            formatter.info(&format!("{} ({})", ledger.label, ledger.uuid));
            formatter.field(
                "Cursor",
                &cursor.map_or_else(|| "nothing pulled yet".to_string(), |c| c.to_string()),
            );
            formatter.field("Pending", &stats.pending);
            formatter.field("Applied", &stats.applied);
            formatter.field("Pushed", &format!("{} change set(s)", stats.pushed_change_sets));
            if let Some(hint) = hint {
                let holder = if hint.owned { "this device" } else { "another device" };
                formatter.field(
                    "Lock",
                    &format!("held by {holder} since {}", format_millis(hint.observed_at)),
                );
            }
            formatter.info("");
        }

        ctx.close().await;
        Ok(())
    }
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_millis(1_760_000_000_000), "2025-10-09 08:53:20 UTC");
    }
}
