/// CLI Module
///
/// Command-line interface configuration using clap.
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::etl::{
    backfill::DEFAULT_BATCH_SIZE,
    load::{DEFAULT_BACKFILL_INTERVAL, DEFAULT_FLUSH_THRESHOLD},
    regime::DEFAULT_NEAR_HEAD_WINDOW,
};
use crate::pipeline::DEFAULT_REPORT_INTERVAL;

/// Antelope TPS Tracker
///
/// Count transactions and top-level actions per block and keep running totals in PostgreSQL
#[derive(Parser, Debug, Clone)]
#[command(name = "tps-tracker")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// First block to ingest when the database is empty
    #[arg(short = 's', long, value_name = "BLOCK", default_value = "1")]
    pub start_block: u32,

    /// Stop after ingesting this block
    #[arg(short = 'e', long, value_name = "BLOCK")]
    pub end_block: Option<u32>,

    /// Database connection URL (overrides DATABASE_URL / PG_* env vars)
    #[arg(short = 'd', long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Chain API URL used to validate the node (overrides API_URL env var)
    #[arg(short = 'a', long, value_name = "URL")]
    pub api_url: Option<String>,

    /// Decoded block stream, one JSON document per line; `-` for stdin (overrides BLOCKS_FILE env var)
    #[arg(short = 'b', long, value_name = "PATH")]
    pub blocks: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(short = 'm', long, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Catch-up rows buffered before a bulk load
    #[arg(long, value_name = "ROWS", default_value_t = DEFAULT_FLUSH_THRESHOLD)]
    pub flush_threshold: usize,

    /// Trigger a background backfill every N blocks
    #[arg(long, value_name = "BLOCKS", default_value_t = DEFAULT_BACKFILL_INTERVAL)]
    pub backfill_interval: u32,

    /// Rows resolved per backfill round trip
    #[arg(long, value_name = "ROWS", default_value_t = DEFAULT_BATCH_SIZE)]
    pub backfill_batch_size: i64,

    /// Print progress every N blocks
    #[arg(long, value_name = "BLOCKS", default_value_t = DEFAULT_REPORT_INTERVAL)]
    pub report_interval: u32,

    /// Blocks behind head still written through the near-head path
    #[arg(long, value_name = "BLOCKS", default_value_t = DEFAULT_NEAR_HEAD_WINDOW)]
    pub near_head_window: u32,

    /// Maximum PostgreSQL connections
    #[arg(long, value_name = "COUNT", default_value = "5")]
    pub max_connections: u32,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(end) = self.end_block {
            if self.start_block > end {
                anyhow::bail!("Start block ({}) must be less than or equal to end block ({})", self.start_block, end);
            }
        }

        if self.start_block == 0 {
            anyhow::bail!("Start block must be greater than 0");
        }

        if self.flush_threshold == 0 {
            anyhow::bail!("Flush threshold must be greater than 0");
        }

        if self.backfill_interval == 0 || self.report_interval == 0 {
            anyhow::bail!("Backfill and report intervals must be greater than 0");
        }

        if self.backfill_batch_size <= 0 {
            anyhow::bail!("Backfill batch size must be greater than 0");
        }

        if self.max_connections < 2 {
            anyhow::bail!("At least 2 connections are needed (ingestion and backfill run concurrently)");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["tps-tracker"]);

        assert_eq!(cli.start_block, 1);
        assert_eq!(cli.flush_threshold, 10_000);
        assert_eq!(cli.backfill_interval, 1000);
        assert_eq!(cli.report_interval, 1000);
        assert_eq!(cli.near_head_window, 10_000);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let cli = Cli::parse_from(["tps-tracker", "--start-block", "1000", "--end-block", "900"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from(["tps-tracker", "--flush-threshold", "0"]);
        assert!(cli.validate().is_err());

        let cli = Cli::parse_from(["tps-tracker", "--backfill-interval", "0"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "tps-tracker",
            "-b",
            "-",
            "--metrics-addr",
            "0.0.0.0:9090",
            "--database-url",
            "postgres://u:p@db/tps",
        ]);

        assert_eq!(cli.blocks.as_deref(), Some(std::path::Path::new("-")));
        assert_eq!(cli.metrics_addr.unwrap().port(), 9090);
        assert_eq!(cli.database_url.as_deref(), Some("postgres://u:p@db/tps"));
    }
}
