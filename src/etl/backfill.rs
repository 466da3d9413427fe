/// Backfill Module
///
/// Resolves the running-total columns of rows written by the bulk path.
/// Rows are resolved strictly in ascending height order, each from its
/// predecessor's resolved totals, so at most one pass may run at a time.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::db::BlockStore;
use crate::error::Result;
use crate::models::RunningTotals;

/// Rows resolved per round trip
pub const DEFAULT_BATCH_SIZE: i64 = 10_000;

/// Single-flight backfill job.
///
/// The run token is a mutex acquired with a single atomic `try_lock`, so two
/// concurrent triggers can never both start a pass. Clones share the token.
#[derive(Clone)]
pub struct BackfillJob {
    store: Arc<dyn BlockStore>,
    token: Arc<Mutex<()>>,
    batch_size: i64,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
}

impl BackfillJob {
    pub fn new(store: Arc<dyn BlockStore>, batch_size: i64) -> Self {
        Self {
            store,
            token: Arc::new(Mutex::new(())),
            batch_size: batch_size.max(1),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start a pass on a background task if none is running.
    ///
    /// Returns `None` when a pass is already in flight; the trigger is dropped.
    pub fn trigger(&self) -> Option<JoinHandle<Result<u64>>> {
        let Ok(guard) = self.token.clone().try_lock_owned() else {
            tracing::debug!("Backfill already running, trigger dropped");
            return None;
        };

        let job = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            job.resolve_all().await
        }))
    }

    /// Run a pass on the current task, waiting for any in-flight pass first
    pub async fn run_exclusive(&self) -> Result<u64> {
        let _guard = self.token.clone().lock_owned().await;
        self.resolve_all().await
    }

    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.token.try_lock().is_err()
    }

    /// Highest number of passes ever observed running at once
    #[allow(dead_code)]
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    async fn resolve_all(&self) -> Result<u64> {
        let _active = ActiveRun::enter(&self.active, &self.peak_active);

        let mut after = 0i64;
        let mut carried: Option<(i64, RunningTotals)> = None;
        let mut resolved = 0u64;

        loop {
            let batch = self.store.unresolved_batch(after, self.batch_size).await?;
            let Some(last) = batch.last() else {
                break;
            };
            after = last.id;

            let mut updates = Vec::with_capacity(batch.len());
            for row in &batch {
                let prev = match carried {
                    Some((id, totals)) if id == row.id - 1 => totals,
                    _ => self.predecessor_totals(row.id).await?,
                };
                let totals = prev.advance(row);
                updates.push((row.id, totals));
                carried = Some((row.id, totals));
            }

            self.store.apply_totals(&updates).await?;
            resolved += updates.len() as u64;

            tracing::debug!("Backfill resolved blocks {}..={}", batch[0].id, after);
        }

        if resolved > 0 {
            tracing::info!("Backfill resolved running totals for {} blocks", resolved);
        }
        Ok(resolved)
    }

    async fn predecessor_totals(&self, id: i64) -> Result<RunningTotals> {
        match self.store.resolved_totals(id - 1).await? {
            Some(totals) => Ok(totals),
            None => {
                if id > 1 {
                    tracing::warn!("Block {} has no resolved predecessor, running totals restart from 0", id);
                }
                Ok(RunningTotals::default())
            }
        }
    }
}

/// Counts a running pass for the duration of its scope
struct ActiveRun<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveRun<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
