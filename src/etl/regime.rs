/// Regime Module
///
/// Decides which write path a block takes.

/// Blocks closer than this to the head are written through the near-head path
pub const DEFAULT_NEAR_HEAD_WINDOW: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    /// Synchronous upsert with inline running totals
    NearHead,
    /// Buffered bulk load, running totals resolved later by the backfill job
    CatchUp,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::NearHead => write!(f, "near-head"),
            Regime::CatchUp => write!(f, "catch-up"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegimeSelector {
    window: u32,
}

impl Default for RegimeSelector {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_HEAD_WINDOW)
    }
}

impl RegimeSelector {
    pub fn new(window: u32) -> Self {
        Self { window }
    }

    /// Whether `height` lies inside the trailing window behind `head`
    pub fn is_near_head(&self, height: u32, head: u32) -> bool {
        height > head.saturating_sub(self.window)
    }

    /// A pending catch-up buffer keeps the pipeline in catch-up until it is
    /// flushed, so the two write paths never interleave.
    pub fn select(&self, height: u32, head: u32, buffer_pending: bool) -> Regime {
        if self.is_near_head(height, head) && !buffer_pending {
            Regime::NearHead
        } else {
            Regime::CatchUp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_far_behind_is_catch_up() {
        let selector = RegimeSelector::default();
        assert_eq!(selector.select(5_000_100, 5_010_100, false), Regime::CatchUp);
        assert_eq!(selector.select(5_000_100, 5_100_100, false), Regime::CatchUp);
    }

    #[test]
    fn test_inside_window_is_near_head() {
        let selector = RegimeSelector::default();
        assert_eq!(selector.select(5_000_101, 5_010_100, false), Regime::NearHead);
        assert_eq!(selector.select(5_010_100, 5_010_100, false), Regime::NearHead);
    }

    #[test]
    fn test_pending_buffer_forces_catch_up() {
        let selector = RegimeSelector::default();
        assert_eq!(selector.select(5_010_100, 5_010_100, true), Regime::CatchUp);
        assert!(selector.is_near_head(5_010_100, 5_010_100));
    }

    #[test]
    fn test_young_chain_saturates() {
        let selector = RegimeSelector::default();
        assert_eq!(selector.select(1, 500, false), Regime::NearHead);
    }
}
