//! Durable change-detection state.
//!
//! The [`StateStore`] maps each item identity to the fingerprint it was last
//! accepted with and to its processing status. It knows nothing about sources
//! or collaborators; the orchestrator drives it through a small contract:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | [`should_process`](StateStore::should_process) | change-detection decision |
//! | [`register_pending`](StateStore::register_pending) | accept an item for this run |
//! | [`transition`](StateStore::transition) | validated status change |
//! | [`statistics`](StateStore::statistics) | aggregate counters, computed on demand |
//! | [`reset_failed`](StateStore::reset_failed) | bulk retry of failed items |
//! | [`append_log`](StateStore::append_log) | append-only audit entry |
//!
//! The store assumes a single writer. Running two orchestrators against the
//! same database file is unsupported.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::db;
use crate::error::{Result, SyncError};
use crate::migrate;
use crate::models::{
    ItemDescriptor, ItemRecord, ItemStatus, LogEvent, ProcessingLogEntry, ResultMetrics,
    Statistics, StatusCounts,
};

/// Optional fields written alongside a status transition.
///
/// Only the fields that are `Some` overwrite the stored values.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub error_message: Option<String>,
    pub derived_id: Option<String>,
    pub metrics: Option<ResultMetrics>,
}

impl TransitionFields {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn success(derived_id: impl Into<String>, metrics: ResultMetrics) -> Self {
        Self {
            error_message: None,
            derived_id: Some(derived_id.into()),
            metrics: Some(metrics),
        }
    }
}

#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open the store at `path`, creating the file and schema when missing.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .map_err(|e| SyncError::StateStore(format!("{:#}", e)))?;
        migrate::apply_state_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Decide whether an item needs (re)processing.
    ///
    /// True when there is no record, the fingerprint differs, the source
    /// timestamp is newer than the stored one, or the stored status is
    /// anything but `success`. A differing fingerprint is sufficient on its
    /// own; so is a newer timestamp.
    pub async fn should_process(
        &self,
        identity: &str,
        fingerprint: &str,
        last_modified: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT fingerprint, last_modified_ms, status FROM items WHERE identity = ?",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(true);
        };

        let stored_fingerprint: String = row.get("fingerprint");
        if stored_fingerprint != fingerprint {
            return Ok(true);
        }

        let stored_modified: i64 = row.get("last_modified_ms");
        if last_modified.timestamp_millis() > stored_modified {
            return Ok(true);
        }

        // Failed rows are always retried; pending/processing rows were left
        // behind by an interrupted run and are re-attempted.
        let status = parse_status(row.get("status"))?;
        Ok(status != ItemStatus::Success)
    }

    /// Upsert a record as `pending` with the input that will be processed.
    ///
    /// Clears any previous error. The last successful `derived_id` is kept so
    /// that index entries of the previous content can be retired later.
    pub async fn register_pending(&self, item: &ItemDescriptor) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        sqlx::query(
            r#"
            INSERT INTO items (identity, source_locator, fingerprint, size, last_modified_ms, status, error_message, registered_at_ms)
            VALUES (?, ?, ?, ?, ?, 'pending', NULL, ?)
            ON CONFLICT(identity) DO UPDATE SET
                source_locator = excluded.source_locator,
                fingerprint = excluded.fingerprint,
                size = excluded.size,
                last_modified_ms = excluded.last_modified_ms,
                status = 'pending',
                error_message = NULL,
                registered_at_ms = excluded.registered_at_ms
            "#,
        )
        .bind(&item.identity)
        .bind(&item.source_locator)
        .bind(&item.fingerprint)
        .bind(item.size as i64)
        .bind(item.modified.timestamp_millis())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move an item to `status`, validating the transition.
    ///
    /// `success` requires `derived_id` and `metrics`; `failed` requires
    /// `error_message`. Terminal statuses stamp `processed_at`.
    pub async fn transition(
        &self,
        identity: &str,
        status: ItemStatus,
        fields: TransitionFields,
    ) -> Result<()> {
        let incomplete = match status {
            ItemStatus::Success => fields.derived_id.is_none() || fields.metrics.is_none(),
            ItemStatus::Failed => fields.error_message.is_none(),
            _ => false,
        };
        if incomplete {
            return Err(SyncError::IncompleteOutcome {
                identity: identity.to_string(),
                status,
            });
        }

        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM items WHERE identity = ?")
                .bind(identity)
                .fetch_optional(&mut *tx)
                .await?;
        let current = match current {
            Some(s) => parse_status(s)?,
            None => return Err(SyncError::UnknownItem(identity.to_string())),
        };

        if !current.can_transition_to(status) {
            return Err(SyncError::InvalidTransition {
                identity: identity.to_string(),
                from: current,
                to: status,
            });
        }

        let processed_at = status
            .is_terminal()
            .then(|| Utc::now().timestamp_millis());

        sqlx::query(
            r#"
            UPDATE items SET
                status = ?,
                error_message = CASE WHEN ? THEN NULL ELSE COALESCE(?, error_message) END,
                derived_id = COALESCE(?, derived_id),
                unit_count = COALESCE(?, unit_count),
                duration_secs = COALESCE(?, duration_secs),
                processed_at_ms = COALESCE(?, processed_at_ms)
            WHERE identity = ?
            "#,
        )
        .bind(status.as_str())
        .bind(status == ItemStatus::Success)
        .bind(&fields.error_message)
        .bind(&fields.derived_id)
        .bind(fields.metrics.map(|m| m.unit_count))
        .bind(fields.metrics.map(|m| m.duration_secs))
        .bind(processed_at)
        .bind(identity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Aggregate counters over all records. Never cached.
    pub async fn statistics(&self) -> Result<Statistics> {
        let mut counts = StatusCounts::default();
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM items GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in &rows {
            let status = parse_status(row.get("status"))?;
            counts.set(status, row.get("n"));
        }

        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(unit_count), 0) AS total_units,
                AVG(duration_secs) AS avg_duration,
                MAX(processed_at_ms) AS last_success
            FROM items
            WHERE status = 'success'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let last_success: Option<i64> = row.get("last_success");

        Ok(Statistics {
            counts_by_status: counts,
            total_units: row.get("total_units"),
            average_duration_secs: row.get("avg_duration"),
            last_success_at: last_success.and_then(DateTime::from_timestamp_millis),
        })
    }

    /// Set every `failed` record back to `pending`. Returns the affected count.
    pub async fn reset_failed(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE items SET status = 'pending', error_message = NULL WHERE status = 'failed'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn append_log(&self, identity: &str, event: LogEvent, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO processing_logs (identity, timestamp_ms, event_type, message) VALUES (?, ?, ?, ?)",
        )
        .bind(identity)
        .bind(Utc::now().timestamp_millis())
        .bind(event.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, identity: &str) -> Result<Option<ItemRecord>> {
        let row = sqlx::query("SELECT * FROM items WHERE identity = ?")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Whether an item other than `except_identity` still references `derived_id`.
    ///
    /// Items with identical content share one derived document, so a
    /// document may only be retired once its last referencing item moves on.
    pub async fn derived_id_in_use(&self, derived_id: &str, except_identity: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM items WHERE derived_id = ? AND identity != ? LIMIT 1")
            .bind(derived_id)
            .bind(except_identity)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// All records, optionally restricted to one status, ordered by locator.
    pub async fn list(&self, status: Option<ItemStatus>) -> Result<Vec<ItemRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM items WHERE status = ? ORDER BY source_locator")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM items ORDER BY source_locator")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_record).collect()
    }

    /// Most recent `limit` log entries for an item, oldest first. Diagnostics only.
    pub async fn logs_for(&self, identity: &str, limit: i64) -> Result<Vec<ProcessingLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT identity, timestamp_ms, event_type, message
            FROM processing_logs
            WHERE identity = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(identity)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entries: Vec<ProcessingLogEntry> = rows
            .iter()
            .map(|row| ProcessingLogEntry {
                identity: row.get("identity"),
                timestamp: millis_to_datetime(row.get("timestamp_ms")),
                event_type: row.get("event_type"),
                message: row.get("message"),
            })
            .collect();
        entries.reverse();
        Ok(entries)
    }
}

fn parse_status(raw: String) -> Result<ItemStatus> {
    raw.parse::<ItemStatus>().map_err(SyncError::StateStore)
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_record(row: &SqliteRow) -> Result<ItemRecord> {
    let unit_count: Option<i64> = row.get("unit_count");
    let duration_secs: Option<f64> = row.get("duration_secs");
    let processed_at: Option<i64> = row.get("processed_at_ms");

    Ok(ItemRecord {
        identity: row.get("identity"),
        source_locator: row.get("source_locator"),
        fingerprint: row.get("fingerprint"),
        size: row.get("size"),
        last_modified: millis_to_datetime(row.get("last_modified_ms")),
        status: parse_status(row.get("status"))?,
        derived_id: row.get("derived_id"),
        metrics: match (unit_count, duration_secs) {
            (Some(unit_count), Some(duration_secs)) => Some(ResultMetrics {
                unit_count,
                duration_secs,
            }),
            _ => None,
        },
        error_message: row.get("error_message"),
        processed_at: processed_at.map(millis_to_datetime),
    })
}
