/// Pipeline Module
///
/// Drives ingestion block by block: Count → Progress → Regime → Write,
/// with periodic progress reports and a cooperative shutdown.
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::etl::{
    extract::BlockSource,
    load::{RowWriter, WriterStats},
    regime::{Regime, RegimeSelector},
    transform::count_block,
};
use crate::models::{BlockRecord, BlockResult};
use crate::progress::ProgressTracker;

/// Progress is reported every this many blocks
pub const DEFAULT_REPORT_INTERVAL: u32 = 1000;

const CURRENT_BLOCK_GAUGE: &str = "current_block";
const HEAD_BLOCK_GAUGE: &str = "head_block";
const BLOCKS_PER_SECOND_GAUGE: &str = "blocks_per_second";

/// Register gauge descriptions with the installed recorder
pub fn describe_metrics() {
    metrics::describe_gauge!(CURRENT_BLOCK_GAUGE, metrics::Unit::Count, "Height of the block just ingested.");
    metrics::describe_gauge!(HEAD_BLOCK_GAUGE, metrics::Unit::Count, "Chain head height reported with that block.");
    metrics::describe_gauge!(BLOCKS_PER_SECOND_GAUGE, "Ingestion speed over the last report interval.");
}

/// Pipeline execution statistics
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub blocks_processed: u64,
    pub transactions_counted: u64,
    pub actions_counted: u64,
    pub first_block: Option<u32>,
    pub last_block: Option<u32>,
    pub writer: WriterStats,
    pub elapsed_time: Duration,
}

impl PipelineStats {
    pub fn blocks_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.blocks_processed as f64 / secs
        }
    }
}

/// Why ingestion stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StreamEnded,
    EndBlockReached,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub end_block: Option<u32>,
    pub report_interval: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { end_block: None, report_interval: DEFAULT_REPORT_INTERVAL }
    }
}

/// Main ingestion pipeline
pub struct Pipeline<S> {
    source: S,
    writer: RowWriter,
    selector: RegimeSelector,
    progress: ProgressTracker,
    config: PipelineConfig,
    stats: PipelineStats,
    regime: Option<Regime>,
}

impl<S: BlockSource> Pipeline<S> {
    /// Create a new pipeline instance
    pub fn new(source: S, writer: RowWriter, selector: RegimeSelector, config: PipelineConfig) -> Self {
        Self {
            source,
            writer,
            selector,
            progress: ProgressTracker::new(),
            config,
            stats: PipelineStats::default(),
            regime: None,
        }
    }

    /// Ingest until the stream ends, the end block is reached, or `shutdown`
    /// is cancelled. Buffered rows are flushed and resolved before returning.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(StopReason, PipelineStats)> {
        let started = Instant::now();

        let recovered = self.writer.recover().await.context("Startup backfill failed")?;
        if recovered > 0 {
            tracing::info!("Resolved {} blocks left unresolved by a previous run", recovered);
        }

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break StopReason::Shutdown,
                done = self.writer.wait_backfill() => {
                    done.context("Background backfill failed")?;
                    continue;
                }
                next = self.source.next_block() => next.context("Failed to read next block")?,
            };

            let Some(block) = next else {
                break StopReason::StreamEnded;
            };

            let height = block.height();
            self.process_block(&block).await.with_context(|| format!("Failed to process block {}", height))?;

            if self.config.end_block.is_some_and(|end| height >= end) {
                break StopReason::EndBlockReached;
            }
        };

        tracing::info!("Stopping ingestion: {:?}", reason);

        self.source.shutdown().await.context("Failed to close block stream")?;
        self.writer.finish().await.context("Failed to drain buffered blocks")?;

        let status = self.source.status();
        if let Some(head) = status.head {
            tracing::info!(
                "Last delivered {:?}, head {} ({}), last irreversible {:?}",
                status.last_delivered,
                head.block_num,
                head.block_id,
                status.last_irreversible.map(|b| b.block_num)
            );
        }

        self.stats.writer = self.writer.stats();
        self.stats.elapsed_time = started.elapsed();
        print_final_stats(&self.stats);

        Ok((reason, self.stats))
    }

    /// Count, report, select a write path and persist one block
    async fn process_block(&mut self, block: &BlockResult) -> Result<()> {
        let height = block.height();
        let head = block.head_height();

        if let Some(last) = self.stats.last_block {
            if height <= last {
                anyhow::bail!("Block {} received after block {}; the stream must be strictly increasing", height, last);
            }
            if height != last + 1 {
                tracing::warn!("Gap in block stream: {} follows {}", height, last);
            }
        }

        metrics::gauge!(CURRENT_BLOCK_GAUGE).set(f64::from(height));
        metrics::gauge!(HEAD_BLOCK_GAUGE).set(f64::from(head));

        if height % self.config.report_interval == 0 {
            self.report_progress(height, head);
        }

        let counts = count_block(block);
        let record = BlockRecord::from_block(block, counts.tx_count, counts.ax_count)?;

        let regime = self.selector.select(height, head, self.writer.has_pending());
        if self.regime != Some(regime) {
            tracing::info!("Block {} (head {}): switching to {} writes", height, head, regime);
            self.regime = Some(regime);
        }

        match regime {
            Regime::NearHead => self.writer.write_near_head(&record).await?,
            Regime::CatchUp => {
                let handover = self.selector.is_near_head(height, head);
                self.writer.write_catch_up(record, handover).await?
            }
        }

        self.stats.blocks_processed += 1;
        self.stats.transactions_counted += counts.tx_count;
        self.stats.actions_counted += counts.ax_count;
        self.stats.first_block.get_or_insert(height);
        self.stats.last_block = Some(height);
        Ok(())
    }

    fn report_progress(&mut self, height: u32, head: u32) {
        println!("Current: {}, Head: {}", height, head);

        let behind = self.progress.time_behind(height, head).unwrap_or_default();
        println!("Blocks behind: {} ({})", head.saturating_sub(height), behind);

        self.progress.end(height);
        let bps = self.progress.blocks_per_second();
        metrics::gauge!(BLOCKS_PER_SECOND_GAUGE).set(f64::from(bps));
        println!("Blocks per second: {}", bps);
        self.progress.start(height);

        if let Some(remaining) = self.progress.remaining_time(height, head, bps) {
            println!("Estimated time to sync: {}", remaining);
        }
    }
}

/// Print final statistics
fn print_final_stats(stats: &PipelineStats) {
    println!("\nPipeline Statistics:");
    println!("   Total time: {:.2}s", stats.elapsed_time.as_secs_f64());
    match (stats.first_block, stats.last_block) {
        (Some(first), Some(last)) => println!("   Blocks: {} ({}..={})", stats.blocks_processed, first, last),
        _ => println!("   Blocks: 0"),
    }
    println!("   Transactions: {}", stats.transactions_counted);
    println!("   Actions: {}", stats.actions_counted);
    println!(
        "   Near-head rows: {} | Bulk rows: {} in {} loads",
        stats.writer.near_head_rows, stats.writer.bulk_rows, stats.writer.flushes
    );
    println!(
        "   Backfill: {} started, {} dropped, {} rows resolved",
        stats.writer.backfills_started, stats.writer.backfills_dropped, stats.writer.rows_backfilled
    );
    println!("   Speed: {:.2} blocks/sec", stats.blocks_per_second());
}
