//! SQLite implementation of IProviderStateStore
//!
//! ## Type Mapping
//!
//! | Domain Type    | SQL Type | Strategy                        |
//! |----------------|----------|---------------------------------|
//! | LedgerId       | TEXT     | UUID string via `Display` / `FromStr` |
//! | LockToken      | TEXT     | String via `.as_str()` / `LockToken::new()` |
//! | bool           | INTEGER  | 0 / 1                           |
//! | epoch millis   | INTEGER  | as is                           |

use sqlx::{Row, SqlitePool};

use ledgersync_core::domain::{
    backoff::BackoffState,
    lock::LockHint,
    newtypes::{LedgerId, LockToken},
};
use ledgersync_core::ports::IProviderStateStore;

use crate::CacheError;

/// SQLite-backed lock hints and backoff state
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Creates a store on the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl IProviderStateStore for SqliteStateStore {
    async fn load_lock_hint(
        &self,
        scope: &str,
        ledger: &LedgerId,
    ) -> anyhow::Result<Option<LockHint>> {
        let row = sqlx::query(
            "SELECT token, observed_at, owned FROM lock_hints WHERE scope = ? AND ledger_id = ?",
        )
        .bind(scope)
        .bind(ledger.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let token: String = row.try_get("token")?;
        let token = LockToken::new(token)
            .map_err(|e| CacheError::SerializationError(format!("stored lock token: {e}")))?;
        Ok(Some(LockHint {
            token,
            observed_at: row.try_get("observed_at")?,
            owned: row.try_get::<i64, _>("owned")? != 0,
        }))
    }

    async fn save_lock_hint(
        &self,
        scope: &str,
        ledger: &LedgerId,
        hint: &LockHint,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO lock_hints (scope, ledger_id, token, observed_at, owned) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(scope)
        .bind(ledger.to_string())
        .bind(hint.token.as_str())
        .bind(hint.observed_at)
        .bind(i64::from(hint.owned))
        .execute(&self.pool)
        .await?;

        tracing::trace!(scope, ledger = %ledger, owned = hint.owned, "Saved lock hint");
        Ok(())
    }

    async fn clear_lock_hint(&self, scope: &str, ledger: &LedgerId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM lock_hints WHERE scope = ? AND ledger_id = ?")
            .bind(scope)
            .bind(ledger.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_backoff(&self, scope: &str) -> anyhow::Result<BackoffState> {
        let row = sqlx::query(
            "SELECT last_failure_ms, current_delay_ms FROM backoff_state WHERE scope = ?",
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(BackoffState {
                last_failure_ms: row.try_get("last_failure_ms")?,
                current_delay_ms: row.try_get("current_delay_ms")?,
            }),
            None => Ok(BackoffState::default()),
        }
    }

    async fn save_backoff(&self, scope: &str, state: &BackoffState) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO backoff_state (scope, last_failure_ms, current_delay_ms) \
             VALUES (?, ?, ?)",
        )
        .bind(scope)
        .bind(state.last_failure_ms)
        .bind(state.current_delay_ms)
        .execute(&self.pool)
        .await?;

        tracing::trace!(scope, delay_ms = state.current_delay_ms, "Saved backoff state");
        Ok(())
    }
}
