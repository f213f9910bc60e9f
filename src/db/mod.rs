//! SQLite persistence for copy history.
//!
//! Stores what is needed to audit and resume:
//! - Previews the user confirmed (one row per copy request)
//! - Execution batches with every per-symbol result
//! - Target ratios captured at copy time, for rebalance checks after restart
//!
//! Records are kept as JSON next to a few indexed summary columns. Decimals
//! are stored as text so amounts round-trip exactly.

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{ExecutionBatch, Preview, TargetRatio};

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Summary row for a stored batch.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredBatch {
    pub id: String,
    pub request_id: String,
    pub account: String,
    pub source_wallet: String,
    pub status: String,
    pub filled_notional: String,
    pub succeeded: i64,
    pub failed: i64,
    pub started_at: String,
    pub completed_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct JsonRow {
    body: String,
}

impl Database {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database (single connection, so every query sees the same data).
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        // Confirmed previews
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS copy_requests (
                id TEXT PRIMARY KEY,
                account TEXT NOT NULL,
                source_wallet TEXT NOT NULL,
                mode TEXT NOT NULL,
                available_balance TEXT NOT NULL,
                allocation_fraction TEXT NOT NULL,
                total_notional TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Execution batches
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_batches (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                account TEXT NOT NULL,
                source_wallet TEXT NOT NULL,
                status TEXT NOT NULL,
                filled_notional TEXT NOT NULL,
                succeeded INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                body TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Target ratios
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS target_ratios (
                account TEXT NOT NULL,
                source_wallet TEXT NOT NULL,
                allocation_fraction TEXT NOT NULL,
                body TEXT NOT NULL,
                captured_at TEXT NOT NULL,
                PRIMARY KEY (account, source_wallet)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_batches_account ON execution_batches(account, completed_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_account ON copy_requests(account)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Copy Requests ====================

    /// Save the preview a batch was executed from. Re-saving the same request replaces it.
    pub async fn save_preview(&self, preview: &Preview) -> Result<()> {
        let body = serde_json::to_string(preview).context("Failed to serialize preview")?;

        sqlx::query(
            r#"
            INSERT INTO copy_requests
                (id, account, source_wallet, mode, available_balance, allocation_fraction, total_notional, body)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                total_notional = excluded.total_notional,
                body = excluded.body
            "#,
        )
        .bind(preview.request_id.to_string())
        .bind(&preview.account)
        .bind(&preview.source_wallet)
        .bind(preview.mode.to_string())
        .bind(preview.available_balance.to_string())
        .bind(preview.allocation_fraction.to_string())
        .bind(preview.total_notional.to_string())
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_preview(&self, request_id: &str) -> Result<Option<Preview>> {
        let row = sqlx::query_as::<_, JsonRow>("SELECT body FROM copy_requests WHERE id = ?")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch copy request")?;

        row.map(|r| serde_json::from_str(&r.body).context("Corrupt copy request record"))
            .transpose()
    }

    // ==================== Batches ====================

    pub async fn save_batch(&self, batch: &ExecutionBatch) -> Result<()> {
        let body = serde_json::to_string(batch).context("Failed to serialize batch")?;

        sqlx::query(
            r#"
            INSERT INTO execution_batches
                (id, request_id, account, source_wallet, status, filled_notional, succeeded, failed, body, started_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(batch.id.to_string())
        .bind(batch.request_id.to_string())
        .bind(&batch.account)
        .bind(&batch.source_wallet)
        .bind(batch.status.as_str())
        .bind(batch.filled_notional().to_string())
        .bind(batch.succeeded().count() as i64)
        .bind(batch.failed().count() as i64)
        .bind(body)
        .bind(batch.started_at.to_rfc3339())
        .bind(batch.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_batch(&self, id: &str) -> Result<Option<ExecutionBatch>> {
        let row = sqlx::query_as::<_, JsonRow>("SELECT body FROM execution_batches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch batch")?;

        row.map(|r| serde_json::from_str(&r.body).context("Corrupt batch record"))
            .transpose()
    }

    /// Most recent batches, newest first, optionally for one account.
    pub async fn recent_batches(&self, account: Option<&str>, limit: i64) -> Result<Vec<StoredBatch>> {
        sqlx::query_as::<_, StoredBatch>(
            r#"
            SELECT id, request_id, account, source_wallet, status, filled_notional,
                   succeeded, failed, started_at, completed_at
            FROM execution_batches
            WHERE (?1 IS NULL OR account = ?1)
            ORDER BY completed_at DESC
            LIMIT ?2
            "#,
        )
        .bind(account)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch batches")
    }

    /// Batch counts by status: (total, all-succeeded, partial, aborted).
    pub async fn batch_stats(&self) -> Result<(i64, i64, i64, i64)> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(status = 'all-succeeded'), 0),
                   COALESCE(SUM(status = 'partial'), 0),
                   COALESCE(SUM(status = 'aborted'), 0)
            FROM execution_batches
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    // ==================== Target Ratios ====================

    /// Save or replace the target ratio for (account, source wallet).
    pub async fn save_target_ratio(&self, ratio: &TargetRatio) -> Result<()> {
        let body = serde_json::to_string(ratio).context("Failed to serialize target ratio")?;

        sqlx::query(
            r#"
            INSERT INTO target_ratios (account, source_wallet, allocation_fraction, body, captured_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(account, source_wallet) DO UPDATE SET
                allocation_fraction = excluded.allocation_fraction,
                body = excluded.body,
                captured_at = excluded.captured_at
            "#,
        )
        .bind(&ratio.account)
        .bind(&ratio.source_wallet)
        .bind(ratio.allocation_fraction.to_string())
        .bind(body)
        .bind(ratio.captured_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_target_ratios(&self) -> Result<Vec<TargetRatio>> {
        let rows = sqlx::query_as::<_, JsonRow>("SELECT body FROM target_ratios ORDER BY account, source_wallet")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch target ratios")?;

        rows.into_iter()
            .map(|r| serde_json::from_str(&r.body).context("Corrupt target ratio record"))
            .collect()
    }

    pub async fn remove_target_ratio(&self, account: &str, source_wallet: &str) -> Result<()> {
        sqlx::query("DELETE FROM target_ratios WHERE account = ? AND source_wallet = ?")
            .bind(account)
            .bind(source_wallet)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BatchStatus, DistributionEntry, ExecutionResult, PositionDistribution, PositionSide,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn batch(account: &str, status: BatchStatus) -> ExecutionBatch {
        ExecutionBatch {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            account: account.to_string(),
            source_wallet: "0xsrc".to_string(),
            status,
            results: vec![ExecutionResult::succeeded(
                "BTC".to_string(),
                PositionSide::Long,
                dec!(0.01),
                dec!(0.01),
                dec!(60000),
            )],
            started_at: Utc::now(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_batch_round_trip_and_summary() {
        let db = Database::in_memory().await.unwrap();
        let stored = batch("alice", BatchStatus::AllSucceeded);
        db.save_batch(&stored).await.unwrap();

        let loaded = db.get_batch(&stored.id.to_string()).await.unwrap().unwrap();
        assert_eq!(loaded, stored);

        let recent = db.recent_batches(Some("alice"), 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].filled_notional, "600.00");
        assert_eq!(recent[0].succeeded, 1);

        assert!(db.recent_batches(Some("bob"), 10).await.unwrap().is_empty());
        assert_eq!(db.recent_batches(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_stats() {
        let db = Database::in_memory().await.unwrap();
        db.save_batch(&batch("a", BatchStatus::AllSucceeded)).await.unwrap();
        db.save_batch(&batch("a", BatchStatus::Partial)).await.unwrap();
        db.save_batch(&batch("b", BatchStatus::Partial)).await.unwrap();

        assert_eq!(db.batch_stats().await.unwrap(), (3, 1, 2, 0));
    }

    #[tokio::test]
    async fn test_target_ratio_upsert() {
        let db = Database::in_memory().await.unwrap();
        let mut ratio = TargetRatio {
            account: "alice".to_string(),
            source_wallet: "0xsrc".to_string(),
            allocation_fraction: dec!(0.5),
            distribution: PositionDistribution {
                entries: vec![DistributionEntry {
                    symbol: "BTC".to_string(),
                    side: PositionSide::Long,
                    percentage_of_portfolio: dec!(1),
                    target_notional: dec!(500),
                    leverage: 2,
                }],
                allocated_capital: dec!(500),
                source_total: dec!(10000),
            },
            captured_at: Utc::now(),
        };
        db.save_target_ratio(&ratio).await.unwrap();

        ratio.allocation_fraction = dec!(0.25);
        db.save_target_ratio(&ratio).await.unwrap();

        let loaded = db.load_target_ratios().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].allocation_fraction, dec!(0.25));
        assert_eq!(loaded[0].distribution.entries[0].target_notional, dec!(500));

        db.remove_target_ratio("alice", "0xsrc").await.unwrap();
        assert!(db.load_target_ratios().await.unwrap().is_empty());
    }
}
