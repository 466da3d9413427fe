/// Database Module
///
/// This module handles all PostgreSQL database operations including:
/// - Connection pool management
/// - Schema migrations
/// - The near-head upsert, the catch-up bulk load (COPY) and the
///   set-based running-total updates used by the backfill job
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPoolCopyExt, PgPoolOptions},
    PgPool,
};

use crate::error::Result;
use crate::models::{BlockRecord, RunningTotals};

#[cfg(test)]
pub mod memory;

/// Rows sent to COPY per chunk
const COPY_CHUNK_ROWS: usize = 1000;

/// Persistence operations the ingestion pipeline and the backfill job need.
///
/// Cumulative columns are written by exactly two operations:
/// `upsert_near_head` for rows it creates and `apply_totals` for rows that
/// `bulk_load` left unresolved.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Highest stored block height
    async fn latest_block_id(&self) -> Result<Option<i64>>;

    /// Insert or replace one row, computing its running totals from the
    /// predecessor row in the same statement. A missing or unresolved
    /// predecessor counts as 0.
    async fn upsert_near_head(&self, record: &BlockRecord) -> Result<()>;

    /// Bulk-insert rows without touching the cumulative columns.
    /// Returns the number of rows written.
    async fn bulk_load(&self, records: &[BlockRecord]) -> Result<u64>;

    /// Up to `limit` unresolved rows with `id > after`, ascending by id
    async fn unresolved_batch(&self, after: i64, limit: i64) -> Result<Vec<BlockRecord>>;

    /// Running totals of row `id`, `None` if the row is missing or unresolved
    async fn resolved_totals(&self, id: i64) -> Result<Option<RunningTotals>>;

    /// Write resolved running totals for the given rows atomically
    async fn apply_totals(&self, totals: &[(i64, RunningTotals)]) -> Result<()>;
}

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    /// Test the database connection
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        Ok(())
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl BlockStore for Database {
    async fn latest_block_id(&self) -> Result<Option<i64>> {
        let id = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM blocks").fetch_one(&self.pool).await?;

        Ok(id)
    }

    async fn upsert_near_head(&self, record: &BlockRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blocks (
                id,
                block_hash,
                parent_hash,
                block_time,
                tx_count,
                ax_count,
                tx_plus_prev_count,
                ax_plus_prev_count
            )
            VALUES (
                $1, $2, $3, $4, $5, $6,
                COALESCE((SELECT tx_plus_prev_count FROM blocks WHERE id = $1 - 1), 0) + $5,
                COALESCE((SELECT ax_plus_prev_count FROM blocks WHERE id = $1 - 1), 0) + $6
            )
            ON CONFLICT (id)
            DO UPDATE SET
                block_hash = EXCLUDED.block_hash,
                parent_hash = EXCLUDED.parent_hash,
                block_time = EXCLUDED.block_time,
                tx_count = EXCLUDED.tx_count,
                ax_count = EXCLUDED.ax_count,
                tx_plus_prev_count = EXCLUDED.tx_plus_prev_count,
                ax_plus_prev_count = EXCLUDED.ax_plus_prev_count
            "#,
        )
        .bind(record.id)
        .bind(&record.block_hash)
        .bind(&record.parent_hash)
        .bind(record.block_time)
        .bind(record.tx_count)
        .bind(record.ax_count)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Upserted near-head block {}", record.id);
        Ok(())
    }

    async fn bulk_load(&self, records: &[BlockRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut copy = self
            .pool
            .copy_in_raw(
                "COPY blocks (id, block_hash, parent_hash, block_time, tx_count, ax_count) FROM STDIN WITH (FORMAT text)",
            )
            .await?;

        for chunk in records.chunks(COPY_CHUNK_ROWS) {
            let mut buf = String::with_capacity(chunk.len() * 160);
            for record in chunk {
                push_copy_row(&mut buf, record);
            }
            let sent = copy.send(buf.into_bytes()).await.map(|_| ());
            if let Err(e) = sent {
                // Leaves the connection usable; the COPY is rolled back
                let _ = copy.abort(e.to_string()).await;
                return Err(e.into());
            }
        }

        let rows = copy.finish().await?;

        tracing::info!("Bulk loaded {} blocks ({}..={})", rows, records[0].id, records[records.len() - 1].id);
        Ok(rows)
    }

    async fn unresolved_batch(&self, after: i64, limit: i64) -> Result<Vec<BlockRecord>> {
        let rows = sqlx::query_as::<_, BlockRecord>(
            r#"
            SELECT id, block_hash, parent_hash, block_time, tx_count, ax_count, tx_plus_prev_count, ax_plus_prev_count
            FROM blocks
            WHERE id > $1 AND (tx_plus_prev_count IS NULL OR ax_plus_prev_count IS NULL)
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn resolved_totals(&self, id: i64) -> Result<Option<RunningTotals>> {
        let row = sqlx::query_as::<_, (Option<i64>, Option<i64>)>(
            "SELECT tx_plus_prev_count, ax_plus_prev_count FROM blocks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some((Some(tx), Some(ax))) => Some(RunningTotals { tx, ax }),
            _ => None,
        })
    }

    async fn apply_totals(&self, totals: &[(i64, RunningTotals)]) -> Result<()> {
        if totals.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = totals.iter().map(|(id, _)| *id).collect();
        let tx_totals: Vec<i64> = totals.iter().map(|(_, t)| t.tx).collect();
        let ax_totals: Vec<i64> = totals.iter().map(|(_, t)| t.ax).collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE blocks AS b
            SET tx_plus_prev_count = u.tx_total,
                ax_plus_prev_count = u.ax_total
            FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::BIGINT[]) AS u(id, tx_total, ax_total)
            WHERE b.id = u.id
            "#,
        )
        .bind(&ids)
        .bind(&tx_totals)
        .bind(&ax_totals)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!("Resolved running totals for {} blocks", totals.len());
        Ok(())
    }
}

/// Append one row in COPY text format
fn push_copy_row(buf: &mut String, record: &BlockRecord) {
    use std::fmt::Write;

    let _ = write!(buf, "{}\t", record.id);
    push_copy_text(buf, &record.block_hash);
    buf.push('\t');
    push_copy_text(buf, &record.parent_hash);
    let _ = writeln!(buf, "\t{}\t{}\t{}", record.block_time, record.tx_count, record.ax_count);
}

/// Escape a text value for COPY text format
fn push_copy_text(buf: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => buf.push_str("\\\\"),
            '\t' => buf.push_str("\\t"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            _ => buf.push(c),
        }
    }
}
