/// Antelope TPS Tracker
///
/// Ingests decoded Antelope blocks in order and stores, per block, the number
/// of executed transactions and top-level actions together with their running
/// totals since genesis.
mod cli;
mod config;
mod db;
mod error;
mod etl;
mod models;
mod pipeline;
mod progress;
mod rpc;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

use cli::Cli;
use config::Config;
use db::{BlockStore, Database};
use etl::{backfill::BackfillJob, extract::JsonLinesSource, load::RowWriter, regime::RegimeSelector};
use pipeline::{Pipeline, PipelineConfig};
use rpc::ChainApiClient;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let code = match run(Cli::parse()).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("Fatal: {:#}", e);
            1
        }
    };

    // A pending stdin read lives on a blocking thread that would keep the runtime alive
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    cli.validate()?;
    let config = Config::resolve(&cli)?;

    tracing::info!("Starting TPS tracker");

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to start Prometheus exporter")?;
        pipeline::describe_metrics();
        tracing::info!("Serving metrics on {}", addr);
    }

    if let Some(api_url) = &config.api_url {
        let chain = ChainApiClient::new(api_url).context("Failed to create chain API client")?;
        let info = chain.get_info().await.context("Failed to get info")?;
        tracing::info!(
            "Connected to {}: server {} chain {} head {} lib {} ({})",
            chain.endpoint(),
            info.server_version_string.as_deref().unwrap_or(&info.server_version),
            info.chain_id,
            info.head_block_num,
            info.last_irreversible_block_num,
            info.head_block_time
        );
    }

    // Initialize database connection
    let database = Database::new(&config.database_url, cli.max_connections)
        .await
        .context("Failed to connect to PostgreSQL database")?;
    database.test_connection().await.context("Database connection test failed")?;
    database.migrate().await.context("Failed to run database migrations")?;

    let database = Arc::new(database);
    let store: Arc<dyn BlockStore> = database.clone();

    // Resume after the highest stored block
    let start_block = match store.latest_block_id().await.context("Failed to read latest block")? {
        Some(id) => u32::try_from(id + 1).context("Stored block height out of range")?,
        None => cli.start_block,
    };
    tracing::info!("Starting at block {}", start_block);

    let source =
        JsonLinesSource::open(config.blocks.as_deref(), start_block).await.context("Failed to open block stream")?;

    let backfill = BackfillJob::new(store.clone(), cli.backfill_batch_size);
    let writer = RowWriter::new(store, backfill, cli.flush_threshold, cli.backfill_interval);
    let pipeline = Pipeline::new(
        source,
        writer,
        RegimeSelector::new(cli.near_head_window),
        PipelineConfig { end_block: cli.end_block, report_interval: cli.report_interval },
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let (reason, _stats) = pipeline.run(shutdown).await.context("Pipeline execution failed")?;
    tracing::info!("Ingestion finished: {:?}", reason);

    database.close().await;
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C or SIGTERM
async fn watch_signals(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Interrupt, closing"),
        _ = terminate => tracing::info!("Terminated, closing"),
    }

    shutdown.cancel();
}
