use serde::{Deserialize, Serialize};

/// What happens when an item arrives while another is showing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    /// The newest item pre-empts the active one.
    #[default]
    JumpToLatest,
    /// New items wait behind the active one and play in arrival order.
    Sequential,
}

/// Timing and size of the display queue. Durations are milliseconds.
///
/// Durations are copied onto each item when it is enqueued, so changing
/// them later never affects an item already in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub display_ms: u64,
    pub fade_ms: u64,
    pub max_items: usize,
    pub policy: QueuePolicy,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            display_ms: 3_000,
            fade_ms: 500,
            max_items: 50,
            policy: QueuePolicy::default(),
        }
    }
}

impl DisplaySettings {
    /// Upper bound on queue length; never below one.
    pub fn capacity(&self) -> usize {
        self.max_items.max(1)
    }
}
