/// Transform Module
///
/// Turns a decoded block into its per-block counts. Pure functions, no I/O.
use crate::models::{Action, BlockResult, TransactionStatus, TransactionTrace};

/// Per-block counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounts {
    /// Executed transactions, excluding the implicit `onblock` transaction
    pub tx_count: u64,
    /// Top-level actions of executed transactions, excluding `eosio::onblock`
    pub ax_count: u64,
}

/// Count executed transactions and qualifying top-level actions in a block.
///
/// A block without traces counts as `(0, 0)`.
pub fn count_block(block: &BlockResult) -> BlockCounts {
    let Some(traces) = block.traces.as_deref() else {
        return BlockCounts::default();
    };

    let mut executed = 0u64;
    let mut actions = 0u64;

    for trace in traces.iter().filter(|t| t.status == TransactionStatus::Executed) {
        executed += 1;
        actions += count_actions(trace);
    }

    // Every block carries one implicit housekeeping transaction
    let tx_count = if traces.is_empty() { executed } else { executed.saturating_sub(1) };

    BlockCounts { tx_count, ax_count: actions }
}

/// Top-level, non-housekeeping actions of one transaction
fn count_actions(trace: &TransactionTrace) -> u64 {
    normalize_actions(trace).filter(|a| a.is_top_level() && !a.is_onblock()).count() as u64
}

/// Normalize both action trace revisions into the canonical shape
pub fn normalize_actions(trace: &TransactionTrace) -> impl Iterator<Item = Action> + '_ {
    trace.action_traces.iter().map(Action::from)
}
