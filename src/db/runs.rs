//! Run record operations.

use crate::ledger::RunLedger;
use crate::types::RunRecord;
use crate::{Error, Result};
use async_trait::async_trait;

use super::{Database, RunRow};

impl Database {
    /// Upsert records, keeping the newer row when a key already exists
    ///
    /// All records are written in one transaction.
    pub async fn upsert_runs(&self, records: &[RunRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(Error::Sqlx)?;
        let mut changed = 0;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO run_records (
                    key, name, success, duration_ms, finished_at_us,
                    blocks, executed, valid, error_code, captured_log
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    name = excluded.name,
                    success = excluded.success,
                    duration_ms = excluded.duration_ms,
                    finished_at_us = excluded.finished_at_us,
                    blocks = excluded.blocks,
                    executed = excluded.executed,
                    valid = excluded.valid,
                    error_code = excluded.error_code,
                    captured_log = excluded.captured_log
                WHERE excluded.finished_at_us >= run_records.finished_at_us
                "#,
            )
            .bind(&record.key)
            .bind(&record.name)
            .bind(record.success as i32)
            .bind(record.duration.as_millis() as i64)
            .bind(record.timestamp.timestamp_micros())
            .bind(record.counters.blocks as i64)
            .bind(record.counters.executed as i64)
            .bind(record.counters.valid as i64)
            .bind(&record.error_code)
            .bind(&record.captured_log)
            .execute(&mut *tx)
            .await
            .map_err(Error::Sqlx)?;
            changed += result.rows_affected();
        }

        tx.commit().await.map_err(Error::Sqlx)?;
        Ok(changed)
    }

    /// All run records ordered by key
    pub async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT key, name, success, duration_ms, finished_at_us,
                   blocks, executed, valid, error_code, captured_log
            FROM run_records
            ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(RunRecord::from).collect())
    }

    /// Latest record for one key
    pub async fn get_run(&self, key: &str) -> Result<Option<RunRecord>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT key, name, success, duration_ms, finished_at_us,
                   blocks, executed, valid, error_code, captured_log
            FROM run_records
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(row.map(RunRecord::from))
    }

    /// Delete records that finished before the given time
    ///
    /// Returns the number of records deleted.
    pub async fn delete_runs_before(&self, before: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM run_records WHERE finished_at_us < ?")
            .bind(before.timestamp_micros())
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RunLedger for Database {
    async fn load(&self) -> Result<Vec<RunRecord>> {
        self.list_runs().await
    }

    async fn merge(&self, records: &[RunRecord]) -> Result<()> {
        let changed = self.upsert_runs(records).await?;
        tracing::info!(incoming = records.len(), changed, "ledger merged");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
