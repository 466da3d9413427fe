/// Load Module
///
/// Handles storing block rows into PostgreSQL through one of two paths:
/// - Near-head: a synchronous upsert that computes running totals inline
/// - Catch-up: rows are buffered and bulk loaded with their running totals
///   left unresolved; the backfill job fills them in afterwards
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::db::BlockStore;
use crate::error::Result;
use crate::etl::backfill::BackfillJob;
use crate::models::BlockRecord;

/// Buffered rows are bulk loaded once this many have accumulated
pub const DEFAULT_FLUSH_THRESHOLD: usize = 10_000;

/// Heights that are a multiple of this trigger a background backfill
pub const DEFAULT_BACKFILL_INTERVAL: u32 = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub near_head_rows: u64,
    pub bulk_rows: u64,
    pub flushes: u64,
    pub backfills_started: u64,
    pub backfills_dropped: u64,
    pub rows_backfilled: u64,
}

/// Owns the pending row buffer and the background backfill handle
pub struct RowWriter {
    store: Arc<dyn BlockStore>,
    backfill: BackfillJob,
    pending: Vec<BlockRecord>,
    flush_threshold: usize,
    backfill_interval: u32,
    in_flight: Option<JoinHandle<Result<u64>>>,
    /// Set once a bulk load lands, cleared when a full pass has resolved it
    unresolved: bool,
    stats: WriterStats,
}

impl RowWriter {
    pub fn new(
        store: Arc<dyn BlockStore>,
        backfill: BackfillJob,
        flush_threshold: usize,
        backfill_interval: u32,
    ) -> Self {
        Self {
            store,
            backfill,
            pending: Vec::with_capacity(flush_threshold),
            flush_threshold: flush_threshold.max(1),
            backfill_interval: backfill_interval.max(1),
            in_flight: None,
            unresolved: false,
            stats: WriterStats::default(),
        }
    }

    /// Whether catch-up rows are waiting to be flushed
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[allow(dead_code)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Resolve rows a previous run left unresolved before anything else is
    /// written, so the first near-head upsert reads a resolved predecessor.
    pub async fn recover(&mut self) -> Result<u64> {
        let resolved = self.backfill.run_exclusive().await?;
        self.stats.rows_backfilled += resolved;
        Ok(resolved)
    }

    /// Write one row with its running totals computed from its predecessor.
    /// Returns once the store has acknowledged the write.
    ///
    /// Bulk-loaded rows that are not yet resolved are resolved first, so the
    /// predecessor is never read as an unresolved row.
    pub async fn write_near_head(&mut self, record: &BlockRecord) -> Result<()> {
        if self.unresolved {
            tracing::info!("Resolving bulk-loaded blocks before near-head write of block {}", record.id);
            self.backfill_now().await?;
        } else {
            self.reap_backfill().await?;
        }

        self.store.upsert_near_head(record).await?;
        self.stats.near_head_rows += 1;
        Ok(())
    }

    /// Buffer one row for bulk loading.
    ///
    /// `handover` marks a row that already lies inside the near-head window:
    /// the buffer is flushed right away and fully backfilled so the pipeline
    /// can switch to near-head writes on the next block.
    pub async fn write_catch_up(&mut self, record: BlockRecord, handover: bool) -> Result<()> {
        self.reap_backfill().await?;

        let height = record.id;
        self.pending.push(record);

        if height % i64::from(self.backfill_interval) == 0 {
            self.trigger_backfill();
        }

        if self.pending.len() >= self.flush_threshold || handover {
            self.flush().await?;
        }

        if handover {
            tracing::info!("Caught up to the near-head window at block {}, resolving running totals", height);
            self.backfill_now().await?;
        }

        Ok(())
    }

    /// Bulk load every buffered row and empty the buffer
    pub async fn flush(&mut self) -> Result<u64> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let rows = std::mem::take(&mut self.pending);
        let written = self.store.bulk_load(&rows).await?;

        self.stats.bulk_rows += written;
        self.stats.flushes += 1;
        self.unresolved = true;
        Ok(written)
    }

    /// Flush what is buffered and leave every row resolved. Used on shutdown.
    pub async fn finish(&mut self) -> Result<()> {
        let flushed = self.flush().await?;
        if flushed > 0 {
            tracing::info!("Flushed {} buffered blocks on shutdown", flushed);
        }
        self.backfill_now().await
    }

    fn trigger_backfill(&mut self) {
        if self.in_flight.is_some() {
            self.stats.backfills_dropped += 1;
            return;
        }

        match self.backfill.trigger() {
            Some(handle) => {
                self.in_flight = Some(handle);
                self.stats.backfills_started += 1;
            }
            None => self.stats.backfills_dropped += 1,
        }
    }

    /// Resolve once the in-flight background pass finishes, with its error if
    /// it failed. Never resolves while no pass is in flight.
    ///
    /// Cancel safe: the handle stays in place until the pass has finished.
    pub async fn wait_backfill(&mut self) -> Result<()> {
        let Some(handle) = self.in_flight.as_mut() else {
            return std::future::pending().await;
        };

        let outcome = handle.await;
        self.in_flight = None;
        self.stats.rows_backfilled += outcome??;
        Ok(())
    }

    /// Surface the result of a finished background pass
    async fn reap_backfill(&mut self) -> Result<()> {
        if self.in_flight.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = self.in_flight.take() {
                self.stats.rows_backfilled += handle.await??;
            }
        }
        Ok(())
    }

    /// Wait for any background pass, then run one to completion
    async fn backfill_now(&mut self) -> Result<()> {
        if let Some(handle) = self.in_flight.take() {
            self.stats.rows_backfilled += handle.await??;
        }
        self.stats.rows_backfilled += self.backfill.run_exclusive().await?;
        self.unresolved = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::etl::backfill::DEFAULT_BATCH_SIZE;
    use std::time::Duration;

    fn record(id: i64, tx: i64) -> BlockRecord {
        BlockRecord {
            id,
            block_hash: format!("{:08x}", id),
            parent_hash: format!("{:08x}", id - 1),
            block_time: id * 500,
            tx_count: tx,
            ax_count: tx * 2,
            tx_plus_prev_count: None,
            ax_plus_prev_count: None,
        }
    }

    fn writer(store: &Arc<MemoryStore>, threshold: usize, interval: u32) -> RowWriter {
        let backfill = BackfillJob::new(store.clone(), DEFAULT_BATCH_SIZE);
        RowWriter::new(store.clone(), backfill, threshold, interval)
    }

    #[tokio::test]
    async fn test_flushes_ten_thousand_rows_in_one_load() {
        let store = Arc::new(MemoryStore::new());
        // Backfill interval above the range so no background pass touches the rows
        let mut writer = writer(&store, DEFAULT_FLUSH_THRESHOLD, 1_000_000);

        for id in 1..10_000 {
            writer.write_catch_up(record(id, 1), false).await.unwrap();
        }
        assert_eq!(writer.pending_len(), 9_999);
        assert!(store.bulk_loads().is_empty());

        writer.write_catch_up(record(10_000, 1), false).await.unwrap();

        assert_eq!(store.bulk_loads(), vec![10_000]);
        assert!(!writer.has_pending());
        assert_eq!(store.rows().len(), 10_000);
        assert!(store.rows().iter().all(|r| !r.is_resolved()));
    }

    #[tokio::test]
    async fn test_near_head_computes_totals_inline() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(&store, DEFAULT_FLUSH_THRESHOLD, DEFAULT_BACKFILL_INTERVAL);

        writer.write_near_head(&record(1, 5)).await.unwrap();
        writer.write_near_head(&record(2, 3)).await.unwrap();

        let r2 = store.row(2).unwrap();
        assert_eq!(r2.tx_plus_prev_count, Some(8));
        assert_eq!(r2.ax_plus_prev_count, Some(16));
        assert_eq!(writer.stats().near_head_rows, 2);
    }

    #[tokio::test]
    async fn test_handover_flushes_and_resolves() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(&store, DEFAULT_FLUSH_THRESHOLD, DEFAULT_BACKFILL_INTERVAL);

        for id in 1..=5 {
            writer.write_catch_up(record(id, 2), false).await.unwrap();
        }
        writer.write_catch_up(record(6, 2), true).await.unwrap();

        assert!(!writer.has_pending());
        assert_eq!(store.bulk_loads(), vec![6]);
        assert!(store.rows().iter().all(BlockRecord::is_resolved));

        writer.write_near_head(&record(7, 1)).await.unwrap();
        assert_eq!(store.row(7).unwrap().tx_plus_prev_count, Some(13));
    }

    #[tokio::test]
    async fn test_backfill_triggered_on_interval() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(&store, 10, 10);

        for id in 1..=30 {
            writer.write_catch_up(record(id, 1), false).await.unwrap();
        }
        writer.finish().await.unwrap();

        let stats = writer.stats();
        assert_eq!(stats.flushes, 3);
        assert!(stats.backfills_started >= 1);
        assert_eq!(stats.backfills_started + stats.backfills_dropped, 3);
        assert!(store.rows().iter().all(BlockRecord::is_resolved));
        assert_eq!(store.row(30).unwrap().tx_plus_prev_count, Some(30));
    }

    #[tokio::test]
    async fn test_finish_drains_partial_buffer() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(&store, DEFAULT_FLUSH_THRESHOLD, DEFAULT_BACKFILL_INTERVAL);

        for id in 1..=3 {
            writer.write_catch_up(record(id, 4), false).await.unwrap();
        }
        writer.finish().await.unwrap();

        assert_eq!(store.bulk_loads(), vec![3]);
        assert_eq!(store.row(3).unwrap().tx_plus_prev_count, Some(12));
    }

    #[tokio::test]
    async fn test_near_head_after_threshold_flush_reads_resolved_predecessor() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(&store, 4, 1_000_000);

        for id in 1..=4 {
            writer.write_catch_up(record(id, 1), false).await.unwrap();
        }
        assert!(!writer.has_pending());
        assert!(!store.row(4).unwrap().is_resolved());

        writer.write_near_head(&record(5, 1)).await.unwrap();

        assert!(store.rows().iter().all(BlockRecord::is_resolved));
        assert_eq!(store.row(5).unwrap().tx_plus_prev_count, Some(5));
        assert_eq!(store.row(5).unwrap().ax_plus_prev_count, Some(10));
    }

    #[tokio::test]
    async fn test_near_head_waits_for_running_pass() {
        let store = Arc::new(MemoryStore::with_apply_delay(Duration::from_millis(50)));
        // Trigger and threshold flush land on the same height
        let mut writer = writer(&store, 4, 4);

        for id in 1..=4 {
            writer.write_catch_up(record(id, 2), false).await.unwrap();
        }
        writer.write_near_head(&record(5, 2)).await.unwrap();

        assert_eq!(store.row(5).unwrap().tx_plus_prev_count, Some(10));
        assert!(store.rows().iter().all(BlockRecord::is_resolved));
    }

    #[tokio::test]
    async fn test_wait_backfill_surfaces_failure() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(&store, 2, 2);
        store.fail_totals();

        writer.write_catch_up(record(1, 1), false).await.unwrap();
        writer.write_catch_up(record(2, 1), false).await.unwrap();

        let waited = tokio::time::timeout(Duration::from_secs(5), writer.wait_backfill()).await;
        assert!(waited.expect("background pass finishes").is_err());
    }

    #[tokio::test]
    async fn test_wait_backfill_pends_without_pass() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(&store, DEFAULT_FLUSH_THRESHOLD, DEFAULT_BACKFILL_INTERVAL);

        let waited = tokio::time::timeout(Duration::from_millis(20), writer.wait_backfill()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_write_failure_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = writer(&store, 2, DEFAULT_BACKFILL_INTERVAL);
        store.fail_writes();

        assert!(writer.write_near_head(&record(1, 1)).await.is_err());
        writer.write_catch_up(record(2, 1), false).await.unwrap();
        assert!(writer.write_catch_up(record(3, 1), false).await.is_err());
    }
}
