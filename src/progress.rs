/// Progress Module
///
/// Measures ingestion speed over a window of blocks and turns it into
/// operator-facing estimates: blocks per second, time to sync, and how far
/// behind the chain head the tracker currently is.
use std::time::{Duration, Instant};

/// Nominal Antelope block interval
const BLOCK_INTERVAL: Duration = Duration::from_millis(500);

/// Estimates are rendered with at most this many non-zero units
const MAX_DURATION_UNITS: usize = 3;

/// Sliding measurement window
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    start_time: Instant,
    end_time: Instant,
    start_block: u32,
    end_block: u32,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start_time: now, end_time: now, start_block: 0, end_block: 0 }
    }

    /// Open the window at `block`
    pub fn start(&mut self, block: u32) {
        self.start_at(block, Instant::now());
    }

    /// Close the window at `block`
    pub fn end(&mut self, block: u32) {
        self.end_at(block, Instant::now());
    }

    fn start_at(&mut self, block: u32, at: Instant) {
        self.start_time = at;
        self.start_block = block;
    }

    fn end_at(&mut self, block: u32, at: Instant) {
        self.end_time = at;
        self.end_block = block;
    }

    /// Blocks processed per second over the last closed window.
    ///
    /// Returns 0 while the window is unset or empty.
    pub fn blocks_per_second(&self) -> u32 {
        if self.start_block == 0 || self.end_block <= self.start_block {
            return 0;
        }

        let seconds = self.end_time.saturating_duration_since(self.start_time).as_secs_f64();
        if seconds <= 0.0 {
            return 0;
        }

        (f64::from(self.end_block - self.start_block) / seconds) as u32
    }

    /// Estimated time to reach `head` at `bps` blocks per second
    pub fn remaining_time(&self, current: u32, head: u32, bps: u32) -> Option<String> {
        if bps == 0 || current == 0 || head <= current {
            return None;
        }

        let seconds = u64::from((head - current) / bps);
        Some(format_duration(Duration::from_secs(seconds)))
    }

    /// Chain time between `current` and `head`
    pub fn time_behind(&self, current: u32, head: u32) -> Option<String> {
        if current == 0 || head <= current {
            return None;
        }

        let behind = BLOCK_INTERVAL * (head - current);
        Some(format_duration(Duration::from_secs(behind.as_secs())))
    }
}

/// Render a duration as e.g. `2 hours 14 minutes 3 seconds`, keeping the
/// largest three non-zero units.
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(&str, &str, u64); 5] = [
        ("week", "weeks", 7 * 24 * 3600),
        ("day", "days", 24 * 3600),
        ("hour", "hours", 3600),
        ("minute", "minutes", 60),
        ("second", "seconds", 1),
    ];

    let mut remaining = duration.as_secs();
    let mut parts = Vec::with_capacity(MAX_DURATION_UNITS);

    for (singular, plural, size) in UNITS {
        let value = remaining / size;
        remaining %= size;

        if value == 0 {
            continue;
        }

        parts.push(format!("{} {}", value, if value == 1 { singular } else { plural }));
        if parts.len() == MAX_DURATION_UNITS {
            break;
        }
    }

    if parts.is_empty() {
        return "0 seconds".to_string();
    }

    parts.join(" ")
}
