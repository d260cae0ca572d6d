//! SQLite storage backend implementation
//!
//! Persists alerts and execution history in a local SQLite database file.
//! Indicator and schedule definitions stay with the configuration (see
//! [`super::memory::MemoryStore`]).
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{AlertRepository, ExecutionLog};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, ExecutionRow, timestamp_to_millis};
use crate::model::{
    Alert, AlertCandidate, AlertId, ExecutionResult, IndicatorId, NotificationOutcome,
};

const ALERT_COLUMNS: &str = "id, indicator_id, triggered_at, message, severity, current_value, \
     historical_value, deviation_percent, resolved, resolved_by, resolved_at, notes, notifications";

const EXECUTION_COLUMNS: &str = "indicator_id, success, current_value, historical_value, \
     deviation_percent, error_message, started_at, finished_at, context, alert_id";

/// SQLite-backed alert repository and execution log
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations.
    ///
    /// Missing parent directories are created.
    ///
    /// ```no_run
    /// # use indicator_monitoring::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./alerts.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        if let Some(parent) = db_path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    pub async fn close(&self) {
        debug!("closing SQLite store");
        self.pool.close().await;
    }
}

#[async_trait]
impl AlertRepository for SqliteStore {
    #[instrument(skip(self, candidate), fields(indicator_id = candidate.indicator_id))]
    async fn insert_alert(&self, candidate: AlertCandidate) -> StorageResult<Alert> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                indicator_id, triggered_at, message, severity,
                current_value, historical_value, deviation_percent
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(candidate.indicator_id)
        .bind(timestamp_to_millis(&candidate.triggered_at))
        .bind(&candidate.message)
        .bind(candidate.severity.as_str())
        .bind(candidate.current_value)
        .bind(candidate.historical_value)
        .bind(candidate.deviation_percent)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("stored alert {id}");

        Ok(Alert::from_candidate(id, candidate))
    }

    async fn get_alert(&self, id: AlertId) -> StorageResult<Option<Alert>> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?");
        let row = sqlx::query_as::<_, AlertRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Alert::try_from).transpose()
    }

    #[instrument(skip(self, notes))]
    async fn resolve_alert(
        &self,
        id: AlertId,
        resolved_by: &str,
        notes: Option<&str>,
        resolved_at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET resolved = 1, resolved_by = ?, resolved_at = ?, notes = ?
            WHERE id = ? AND resolved = 0
            "#,
        )
        .bind(resolved_by)
        .bind(timestamp_to_millis(&resolved_at))
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn last_alert_time(
        &self,
        indicator_id: IndicatorId,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let millis: Option<i64> =
            sqlx::query_scalar("SELECT MAX(triggered_at) FROM alerts WHERE indicator_id = ?")
                .bind(indicator_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(millis.map(super::schema::millis_to_timestamp))
    }

    #[instrument(skip(self, outcomes), fields(count = outcomes.len()))]
    async fn append_notifications(
        &self,
        id: AlertId,
        outcomes: &[NotificationOutcome],
    ) -> StorageResult<()> {
        if outcomes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT notifications FROM alerts WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(existing) = existing else {
            return Ok(());
        };

        let mut notifications: Vec<NotificationOutcome> = serde_json::from_str(&existing)?;
        notifications.extend_from_slice(outcomes);

        sqlx::query("UPDATE alerts SET notifications = ? WHERE id = ?")
            .bind(serde_json::to_string(&notifications)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn unresolved_alerts(
        &self,
        indicator_id: Option<IndicatorId>,
    ) -> StorageResult<Vec<Alert>> {
        let rows = match indicator_id {
            Some(indicator_id) => {
                let sql = format!(
                    "SELECT {ALERT_COLUMNS} FROM alerts \
                     WHERE resolved = 0 AND indicator_id = ? ORDER BY triggered_at ASC"
                );
                sqlx::query_as::<_, AlertRow>(&sql)
                    .bind(indicator_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {ALERT_COLUMNS} FROM alerts WHERE resolved = 0 ORDER BY triggered_at ASC"
                );
                sqlx::query_as::<_, AlertRow>(&sql)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(Alert::try_from).collect()
    }
}

#[async_trait]
impl ExecutionLog for SqliteStore {
    #[instrument(skip(self, result), fields(indicator_id = result.indicator_id))]
    async fn record_execution(&self, result: &ExecutionResult) -> StorageResult<()> {
        let row = ExecutionRow::from(result);

        let sql = format!(
            "INSERT INTO executions ({EXECUTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(row.indicator_id)
            .bind(row.success)
            .bind(row.current_value)
            .bind(row.historical_value)
            .bind(row.deviation_percent)
            .bind(row.error_message)
            .bind(row.started_at)
            .bind(row.finished_at)
            .bind(row.context)
            .bind(row.alert_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn recent_executions(
        &self,
        indicator_id: IndicatorId,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionResult>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions \
             WHERE indicator_id = ? ORDER BY started_at DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, ExecutionRow>(&sql)
            .bind(indicator_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ExecutionResult::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn cleanup_executions(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM executions WHERE started_at < ?")
            .bind(timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        debug!("deleted {deleted} execution results");
        Ok(deleted)
    }
}
