/// Extract Module
///
/// The block source the pipeline pulls decoded blocks from. Blocks arrive in
/// strictly increasing height order, each carrying the chain head at the time
/// it was sent.
use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use crate::error::{Result, TrackerError};
use crate::models::{BlockPosition, BlockResult};

/// Latest chain positions observed by a source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStatus {
    pub head: Option<BlockPosition>,
    pub last_irreversible: Option<BlockPosition>,
    pub last_delivered: Option<u32>,
}

#[async_trait]
pub trait BlockSource: Send {
    /// Next block at or above the start height, `None` once the stream ends
    async fn next_block(&mut self) -> Result<Option<BlockResult>>;

    /// Chain state as last reported by the stream
    fn status(&self) -> SourceStatus;

    /// Close the stream. Later calls to `next_block` return `None`.
    async fn shutdown(&mut self) -> Result<()>;
}

/// Reads decoded `get_blocks_result_v0` documents, one JSON object per line,
/// as written by a state-history decoder bridge.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    start_block: u32,
    line_no: u64,
    status: SourceStatus,
    closed: bool,
}

pub type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send>;

impl JsonLinesSource<BoxedReader> {
    /// Open a file, or stdin when `path` is `None` or `-`
    pub async fn open(path: Option<&Path>, start_block: u32) -> Result<Self> {
        let reader: BoxedReader = match path {
            Some(p) if p != Path::new("-") => {
                let file = tokio::fs::File::open(p).await?;
                tracing::info!("Reading blocks from {}", p.display());
                Box::new(BufReader::new(file))
            }
            _ => {
                tracing::info!("Reading blocks from stdin");
                Box::new(BufReader::new(tokio::io::stdin()))
            }
        };

        Ok(Self::new(reader, start_block))
    }
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R, start_block: u32) -> Self {
        Self { lines: reader.lines(), start_block, line_no: 0, status: SourceStatus::default(), closed: false }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> BlockSource for JsonLinesSource<R> {
    async fn next_block(&mut self) -> Result<Option<BlockResult>> {
        while !self.closed {
            let Some(line) = self.lines.next_line().await? else {
                self.closed = true;
                break;
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let block: BlockResult = serde_json::from_str(line)
                .map_err(|e| TrackerError::Decode(format!("line {}: {}", self.line_no, e)))?;

            self.status.head = Some(block.head.clone());
            if block.last_irreversible.is_some() {
                self.status.last_irreversible = block.last_irreversible.clone();
            }

            if block.height() < self.start_block {
                continue;
            }

            self.status.last_delivered = Some(block.height());
            return Ok(Some(block));
        }

        Ok(None)
    }

    fn status(&self) -> SourceStatus {
        self.status.clone()
    }

    async fn shutdown(&mut self) -> Result<()> {
        if !self.closed {
            tracing::info!("Closing block stream after line {}", self.line_no);
        }
        self.closed = true;
        Ok(())
    }
}
