//! Process-wide resource limits.

use serde::{Deserialize, Serialize};

/// Hard cap on `max_body_size`, regardless of what configuration requests.
pub const MAX_BODY_SIZE_CAP: u64 = 100 * 1024 * 1024;

/// Immutable-between-reloads resource caps applied to every target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayLimits {
    /// Maximum number of requests a single target may have executing at once.
    pub max_inflight_per_target: usize,
    /// Maximum number of requests a single target may hold in its FIFO wait list.
    pub max_queue_per_target: usize,
    /// Per-request timeout, measured from enqueue, in milliseconds.
    pub timeout_ms: u64,
    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: u64,
}

impl Default for GatewayLimits {
    fn default() -> Self {
        Self {
            max_inflight_per_target: 1,
            max_queue_per_target: 64,
            timeout_ms: 30_000,
            max_body_bytes: 1024 * 1024,
        }
    }
}
