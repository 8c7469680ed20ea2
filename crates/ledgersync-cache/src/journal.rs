//! SQLite implementation of ILocalLedger
//!
//! A minimal local ledger: it keeps the outbox of locally recorded
//! operations, the operations pulled from other devices in apply order,
//! the change log cursor and the list of ledgers this device follows.
//! Applications with their own ledger database implement the port
//! themselves; this one backs the CLI and the engine's tests.
//!
//! ## Type Mapping
//!
//! | Domain Type      | SQL Type | Strategy                    |
//! |------------------|----------|-----------------------------|
//! | LedgerId         | TEXT     | UUID string                 |
//! | LedgerOperation  | TEXT     | serde_json serialization    |
//! | LedgerMetadata   | TEXT     | serde_json serialization    |
//! | SequenceNumber   | INTEGER ×2 | `shard`, `number` columns |

use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use ledgersync_core::domain::{
    change_set::{ChangeSet, LedgerOperation},
    metadata::LedgerMetadata,
    newtypes::LedgerId,
    sequence::SequenceNumber,
};
use ledgersync_core::ports::{ILocalLedger, PendingOperation};

use crate::CacheError;

/// Counters shown by `ledgersync status`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JournalStats {
    pub pending: u64,
    pub applied: u64,
    pub pushed_change_sets: u64,
}

/// SQLite-backed local ledger
pub struct SqliteLedgerJournal {
    pool: SqlitePool,
}

impl SqliteLedgerJournal {
    /// Creates a journal on the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Starts following a ledger, replacing stored metadata if known
    pub async fn register_ledger(&self, metadata: &LedgerMetadata) -> anyhow::Result<()> {
        let json = serde_json::to_string(metadata)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        sqlx::query(
            "INSERT INTO ledgers (id, label, metadata, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET label = excluded.label, metadata = excluded.metadata",
        )
        .bind(metadata.uuid.to_string())
        .bind(&metadata.label)
        .bind(&json)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        tracing::debug!(ledger = %metadata.uuid, "Registered ledger");
        Ok(())
    }

    /// Metadata of a followed ledger
    pub async fn ledger(&self, id: &LedgerId) -> anyhow::Result<Option<LedgerMetadata>> {
        let row = sqlx::query("SELECT metadata FROM ledgers WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(decode_metadata(&row.try_get::<String, _>("metadata")?)?)),
            None => Ok(None),
        }
    }

    /// All followed ledgers, by label
    pub async fn ledgers(&self) -> anyhow::Result<Vec<LedgerMetadata>> {
        let rows = sqlx::query("SELECT metadata FROM ledgers ORDER BY label, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> anyhow::Result<LedgerMetadata> {
                decode_metadata(&row.try_get::<String, _>("metadata")?)
            })
            .collect()
    }

    /// Records a local operation for the next push; returns its outbox id
    pub async fn record(&self, ledger: &LedgerId, operation: &LedgerOperation) -> anyhow::Result<i64> {
        let json = serde_json::to_string(operation)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;
        let result = sqlx::query(
            "INSERT INTO outbox (ledger_id, operation, recorded_at) VALUES (?, ?, ?)",
        )
        .bind(ledger.to_string())
        .bind(&json)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        tracing::trace!(ledger = %ledger, outbox_id = id, "Recorded operation");
        Ok(id)
    }

    /// Operations pulled from other devices, in apply order
    pub async fn applied_operations(&self, ledger: &LedgerId) -> anyhow::Result<Vec<LedgerOperation>> {
        let rows = sqlx::query(
            "SELECT operation FROM applied_operations WHERE ledger_id = ? ORDER BY id",
        )
        .bind(ledger.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> anyhow::Result<LedgerOperation> {
                decode_operation(&row.try_get::<String, _>("operation")?)
            })
            .collect()
    }

    /// Counters for one ledger
    pub async fn stats(&self, ledger: &LedgerId) -> anyhow::Result<JournalStats> {
        Ok(JournalStats {
            pending: self
                .count("SELECT COUNT(*) FROM outbox WHERE ledger_id = ?", ledger)
                .await?,
            applied: self
                .count("SELECT COUNT(*) FROM applied_operations WHERE ledger_id = ?", ledger)
                .await?,
            pushed_change_sets: self
                .count("SELECT COUNT(*) FROM pushed_change_sets WHERE ledger_id = ?", ledger)
                .await?,
        })
    }

    async fn count(&self, sql: &str, ledger: &LedgerId) -> anyhow::Result<u64> {
        let n: i64 = sqlx::query_scalar(sql)
            .bind(ledger.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Forgets the cursor, the applied operations and the push history of a
    /// ledger whose remote folder was reset. The outbox is kept.
    pub async fn forget_remote_state(&self, ledger: &LedgerId) -> anyhow::Result<()> {
        let id = ledger.to_string();
        let mut tx = self.pool.begin().await?;
        for sql in [
            "DELETE FROM cursors WHERE ledger_id = ?",
            "DELETE FROM applied_operations WHERE ledger_id = ?",
            "DELETE FROM pushed_change_sets WHERE ledger_id = ?",
        ] {
            sqlx::query(sql).bind(&id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        tracing::debug!(ledger = %ledger, "Forgot remote state");
        Ok(())
    }
}

fn decode_operation(json: &str) -> anyhow::Result<LedgerOperation> {
    Ok(serde_json::from_str(json)
        .map_err(|e| CacheError::SerializationError(format!("stored operation: {e}")))?)
}

fn decode_metadata(json: &str) -> anyhow::Result<LedgerMetadata> {
    Ok(serde_json::from_str(json)
        .map_err(|e| CacheError::SerializationError(format!("stored ledger metadata: {e}")))?)
}

#[async_trait::async_trait]
impl ILocalLedger for SqliteLedgerJournal {
    async fn pending_operations(&self, ledger: &LedgerId) -> anyhow::Result<Vec<PendingOperation>> {
        let rows = sqlx::query("SELECT id, operation FROM outbox WHERE ledger_id = ? ORDER BY id")
            .bind(ledger.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> anyhow::Result<PendingOperation> {
                Ok(PendingOperation {
                    id: row.try_get("id")?,
                    operation: decode_operation(&row.try_get::<String, _>("operation")?)?,
                })
            })
            .collect()
    }

    async fn apply_change_set(
        &self,
        ledger: &LedgerId,
        change_set: &ChangeSet,
    ) -> anyhow::Result<usize> {
        let Some(sequence) = change_set.sequence() else {
            return Ok(0);
        };
        let id = ledger.to_string();

        let mut tx = self.pool.begin().await?;
        let stored = read_cursor(&mut *tx, &id).await?;
        if stored.is_some_and(|c| c >= sequence) {
            tracing::debug!(ledger = %ledger, %sequence, "Change set already applied");
            return Ok(0);
        }
        for operation in change_set.operations() {
            let json = serde_json::to_string(operation)
                .map_err(|e| CacheError::SerializationError(e.to_string()))?;
            let kind = serde_json::to_value(operation.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            sqlx::query(
                "INSERT INTO applied_operations (ledger_id, shard, number, uuid, kind, operation) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(i64::from(sequence.shard))
            .bind(sql_number(sequence.number)?)
            .bind(&operation.uuid)
            .bind(&kind)
            .bind(&json)
            .execute(&mut *tx)
            .await?;
        }
        write_cursor(&mut *tx, &id, sequence).await?;
        tx.commit().await?;

        let applied = change_set.operations().len();
        tracing::debug!(ledger = %ledger, %sequence, applied, "Applied change set");
        Ok(applied)
    }

    async fn acknowledge_pushed(
        &self,
        ledger: &LedgerId,
        ids: &[i64],
        sequence: SequenceNumber,
    ) -> anyhow::Result<()> {
        let id = ledger.to_string();
        let mut tx = self.pool.begin().await?;
        for outbox_id in ids {
            sqlx::query("DELETE FROM outbox WHERE id = ? AND ledger_id = ?")
                .bind(outbox_id)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
        }
        let count = i64::try_from(ids.len())
            .map_err(|e| CacheError::SerializationError(format!("operation count: {e}")))?;
        sqlx::query(
            "INSERT OR REPLACE INTO pushed_change_sets (ledger_id, shard, number, operation_count) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(i64::from(sequence.shard))
        .bind(sql_number(sequence.number)?)
        .bind(count)
        .execute(&mut *tx)
        .await?;
        if read_cursor(&mut *tx, &id).await?.map_or(true, |c| c < sequence) {
            write_cursor(&mut *tx, &id, sequence).await?;
        }
        tx.commit().await?;

        tracing::debug!(ledger = %ledger, %sequence, count = ids.len(), "Acknowledged push");
        Ok(())
    }

    async fn load_cursor(&self, ledger: &LedgerId) -> anyhow::Result<Option<SequenceNumber>> {
        let mut conn = self.pool.acquire().await?;
        Ok(read_cursor(&mut *conn, &ledger.to_string()).await?)
    }

    async fn save_cursor(&self, ledger: &LedgerId, cursor: SequenceNumber) -> anyhow::Result<()> {
        let mut conn = self.pool.acquire().await?;
        write_cursor(&mut *conn, &ledger.to_string(), cursor).await?;

        tracing::trace!(ledger = %ledger, %cursor, "Saved cursor");
        Ok(())
    }
}

/// Sequence numbers are stored as SQLite INTEGER (i64)
fn sql_number(number: u64) -> Result<i64, CacheError> {
    i64::try_from(number)
        .map_err(|e| CacheError::SerializationError(format!("sequence number {number}: {e}")))
}

async fn read_cursor(
    conn: &mut SqliteConnection,
    ledger_id: &str,
) -> Result<Option<SequenceNumber>, CacheError> {
    let row = sqlx::query("SELECT shard, number FROM cursors WHERE ledger_id = ?")
        .bind(ledger_id)
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let shard: i64 = row.try_get("shard")?;
    let number: i64 = row.try_get("number")?;
    let shard = u32::try_from(shard)
        .map_err(|e| CacheError::SerializationError(format!("stored shard: {e}")))?;
    let number = u64::try_from(number)
        .map_err(|e| CacheError::SerializationError(format!("stored number: {e}")))?;
    Ok(Some(SequenceNumber::new(shard, number)))
}

async fn write_cursor(
    conn: &mut SqliteConnection,
    ledger_id: &str,
    cursor: SequenceNumber,
) -> Result<(), CacheError> {
    sqlx::query("INSERT OR REPLACE INTO cursors (ledger_id, shard, number) VALUES (?, ?, ?)")
        .bind(ledger_id)
        .bind(i64::from(cursor.shard))
        .bind(sql_number(cursor.number)?)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
