/// Error Module
///
/// Failure modes of the tracker's collaborators: the block store, the block
/// source and the chain API. The pipeline driver and `main` wrap these with
/// `anyhow` context; every variant here is fatal to ingestion.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// Any PostgreSQL failure. A lost write breaks every running total after
    /// it, so these are never retried.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed at startup.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A decoded block did not have the expected shape.
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Reading from the block stream failed.
    #[error("Block source error: {0}")]
    Source(#[from] std::io::Error),

    /// Chain API request failed or returned an unexpected body.
    #[error("Chain API error: {0}")]
    ChainApi(#[from] reqwest::Error),

    /// A background backfill task panicked or was cancelled.
    #[error("Backfill task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A stored value is outside the range the tracker can represent.
    #[error("Data error: {0}")]
    Data(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
