/// Data Models Module
///
/// Decoded Antelope state-history block results as delivered by the block
/// source, the canonical action shape the counter works on, and the
/// `blocks` row persisted per block.
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

/// Account that runs the per-block housekeeping action
pub const SYSTEM_ACCOUNT: &str = "eosio";

/// Housekeeping action every block carries
pub const ONBLOCK_ACTION: &str = "onblock";

/// Block timestamps are UTC with millisecond precision and no zone suffix
const BLOCK_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Height and id of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPosition {
    pub block_num: u32,
    pub block_id: String,
}

/// The part of the signed block header the tracker reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedBlockHeader {
    pub timestamp: String,
}

/// One `get_blocks_result_v0` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResult {
    pub head: BlockPosition,
    #[serde(default)]
    pub last_irreversible: Option<BlockPosition>,
    pub this_block: BlockPosition,
    #[serde(default)]
    pub prev_block: Option<BlockPosition>,
    #[serde(default)]
    pub block: Option<SignedBlockHeader>,
    #[serde(default)]
    pub traces: Option<Vec<TransactionTrace>>,
}

impl BlockResult {
    pub fn height(&self) -> u32 {
        self.this_block.block_num
    }

    pub fn head_height(&self) -> u32 {
        self.head.block_num
    }

    /// Parent block id, empty when the stream did not send one
    pub fn parent_hash(&self) -> String {
        self.prev_block.as_ref().map(|p| p.block_id.clone()).unwrap_or_default()
    }

    /// Block time in milliseconds since the Unix epoch.
    ///
    /// Results streamed without a block header carry no timestamp and map to 0.
    pub fn block_time_ms(&self) -> Result<i64> {
        let Some(header) = &self.block else {
            return Ok(0);
        };

        let parsed = NaiveDateTime::parse_from_str(header.timestamp.trim_end_matches('Z'), BLOCK_TIMESTAMP_FORMAT)
            .map_err(|e| {
                TrackerError::Decode(format!(
                    "invalid timestamp {:?} in block {}: {}",
                    header.timestamp, self.this_block.block_num, e
                ))
            })?;

        Ok(parsed.and_utc().timestamp_millis())
    }
}

/// Transaction status as reported in a trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Executed,
    SoftFail,
    HardFail,
    Delayed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionTrace {
    #[allow(dead_code)]
    pub id: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub action_traces: Vec<ActionTraceVariant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionName {
    pub account: String,
    pub name: String,
}

/// Older action trace revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTraceV0 {
    #[allow(dead_code)]
    pub action_ordinal: u32,
    pub creator_action_ordinal: u32,
    pub act: ActionName,
    #[allow(dead_code)]
    #[serde(default)]
    pub except: Option<String>,
}

/// Newer action trace revision, adds the action's return value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionTraceV1 {
    #[allow(dead_code)]
    pub action_ordinal: u32,
    pub creator_action_ordinal: u32,
    pub act: ActionName,
    #[allow(dead_code)]
    #[serde(default)]
    pub except: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    pub return_value: String,
}

/// Action trace as sent on the wire, tagged by revision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ActionTraceVariant {
    #[serde(rename = "action_trace_v0")]
    V0(ActionTraceV0),
    #[serde(rename = "action_trace_v1")]
    V1(ActionTraceV1),
}

/// Canonical action shape, independent of the wire revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub creator_ordinal: u32,
    pub account: String,
    pub name: String,
}

impl Action {
    /// `eosio::onblock`, the housekeeping action
    pub fn is_onblock(&self) -> bool {
        self.account == SYSTEM_ACCOUNT && self.name == ONBLOCK_ACTION
    }

    /// Created by the transaction itself rather than inline by another action
    pub fn is_top_level(&self) -> bool {
        self.creator_ordinal == 0
    }
}

impl From<&ActionTraceVariant> for Action {
    fn from(variant: &ActionTraceVariant) -> Self {
        match variant {
            ActionTraceVariant::V0(t) => Action {
                creator_ordinal: t.creator_action_ordinal,
                account: t.act.account.clone(),
                name: t.act.name.clone(),
            },
            ActionTraceVariant::V1(t) => Action {
                creator_ordinal: t.creator_action_ordinal,
                account: t.act.account.clone(),
                name: t.act.name.clone(),
            },
        }
    }
}

/// One row of the `blocks` table
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BlockRecord {
    pub id: i64,
    pub block_hash: String,
    pub parent_hash: String,
    pub block_time: i64,
    pub tx_count: i64,
    pub ax_count: i64,
    pub tx_plus_prev_count: Option<i64>,
    pub ax_plus_prev_count: Option<i64>,
}

impl BlockRecord {
    /// Build an unresolved row from a decoded block and its counts
    pub fn from_block(block: &BlockResult, tx_count: u64, ax_count: u64) -> Result<Self> {
        Ok(Self {
            id: i64::from(block.height()),
            block_hash: block.this_block.block_id.clone(),
            parent_hash: block.parent_hash(),
            block_time: block.block_time_ms()?,
            tx_count: to_i64(tx_count)?,
            ax_count: to_i64(ax_count)?,
            tx_plus_prev_count: None,
            ax_plus_prev_count: None,
        })
    }

    #[allow(dead_code)]
    pub fn is_resolved(&self) -> bool {
        self.tx_plus_prev_count.is_some() && self.ax_plus_prev_count.is_some()
    }
}

/// Running totals through one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningTotals {
    pub tx: i64,
    pub ax: i64,
}

impl RunningTotals {
    /// Totals through `row`, given the totals through its predecessor
    pub fn advance(self, row: &BlockRecord) -> Self {
        Self { tx: self.tx + row.tx_count, ax: self.ax + row.ax_count }
    }
}

/// Node state reported by `get_info`
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub server_version: String,
    pub chain_id: String,
    pub head_block_num: u32,
    pub last_irreversible_block_num: u32,
    pub head_block_time: String,
    #[serde(default)]
    pub server_version_string: Option<String>,
}

fn to_i64(count: u64) -> Result<i64> {
    i64::try_from(count).map_err(|_| TrackerError::Data(format!("count {} does not fit in BIGINT", count)))
}
