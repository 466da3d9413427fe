/// In-memory `BlockStore` mirroring the PostgreSQL semantics, for tests.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::BlockStore;
use crate::error::{Result, TrackerError};
use crate::models::{BlockRecord, RunningTotals};

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<i64, BlockRecord>>,
    bulk_loads: Mutex<Vec<usize>>,
    upserts: Mutex<Vec<i64>>,
    apply_delay: Option<Duration>,
    fail_writes: AtomicBool,
    fail_totals: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `apply_totals` call sleeps this long first
    pub fn with_apply_delay(delay: Duration) -> Self {
        Self { apply_delay: Some(delay), ..Self::default() }
    }

    pub fn insert(&self, record: BlockRecord) {
        self.rows.lock().unwrap().insert(record.id, record);
    }

    pub fn row(&self, id: i64) -> Option<BlockRecord> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn rows(&self) -> Vec<BlockRecord> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    /// Row counts of each bulk load, in call order
    pub fn bulk_loads(&self) -> Vec<usize> {
        self.bulk_loads.lock().unwrap().clone()
    }

    /// Ids written through the near-head path, in call order
    pub fn upserts(&self) -> Vec<i64> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Only `apply_totals` fails; loads and upserts keep working
    pub fn fail_totals(&self) {
        self.fail_totals.store(true, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TrackerError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn latest_block_id(&self) -> Result<Option<i64>> {
        Ok(self.rows.lock().unwrap().keys().next_back().copied())
    }

    async fn upsert_near_head(&self, record: &BlockRecord) -> Result<()> {
        self.check_writable()?;

        let mut rows = self.rows.lock().unwrap();
        let prev = rows
            .get(&(record.id - 1))
            .map(|p| RunningTotals { tx: p.tx_plus_prev_count.unwrap_or(0), ax: p.ax_plus_prev_count.unwrap_or(0) })
            .unwrap_or_default();
        let totals = prev.advance(record);

        let mut row = record.clone();
        row.tx_plus_prev_count = Some(totals.tx);
        row.ax_plus_prev_count = Some(totals.ax);
        rows.insert(row.id, row);
        self.upserts.lock().unwrap().push(record.id);
        Ok(())
    }

    async fn bulk_load(&self, records: &[BlockRecord]) -> Result<u64> {
        self.check_writable()?;

        let mut rows = self.rows.lock().unwrap();
        if let Some(dup) = records.iter().find(|r| rows.contains_key(&r.id)) {
            return Err(TrackerError::Data(format!("duplicate key {}", dup.id)));
        }
        for record in records {
            let mut row = record.clone();
            row.tx_plus_prev_count = None;
            row.ax_plus_prev_count = None;
            rows.insert(row.id, row);
        }
        self.bulk_loads.lock().unwrap().push(records.len());
        Ok(records.len() as u64)
    }

    async fn unresolved_batch(&self, after: i64, limit: i64) -> Result<Vec<BlockRecord>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .range(after + 1..)
            .map(|(_, r)| r)
            .filter(|r| !r.is_resolved())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn resolved_totals(&self, id: i64) -> Result<Option<RunningTotals>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.get(&id).and_then(|r| match (r.tx_plus_prev_count, r.ax_plus_prev_count) {
            (Some(tx), Some(ax)) => Some(RunningTotals { tx, ax }),
            _ => None,
        }))
    }

    async fn apply_totals(&self, totals: &[(i64, RunningTotals)]) -> Result<()> {
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_writable()?;
        if self.fail_totals.load(Ordering::SeqCst) {
            return Err(TrackerError::Database(sqlx::Error::PoolClosed));
        }

        let mut rows = self.rows.lock().unwrap();
        for (id, t) in totals {
            if let Some(row) = rows.get_mut(id) {
                row.tx_plus_prev_count = Some(t.tx);
                row.ax_plus_prev_count = Some(t.ax);
            }
        }
        Ok(())
    }
}
