/// ETL Pipeline Module
///
/// The stages a block passes through:
/// - Extract: read decoded blocks from the block stream
/// - Transform: count transactions and top-level actions
/// - Load: persist rows through the near-head or catch-up path, choosing the
///   path per block (regime) and resolving deferred running totals (backfill)
pub mod backfill;
pub mod extract;
pub mod load;
pub mod regime;
pub mod transform;
