//! Core types used throughout the pooling coordinator.

use std::time::{SystemTime, UNIX_EPOCH};

/// Host identifier.
///
/// Opaque and unique per node. Hosts are totally ordered by their string
/// value; the lowest live host is the leader.
pub type Host = String;

/// Channel every node listens to while it takes part in the pool.
pub const ADMIN_CHANNEL: &str = "@admin";

/// Channel no message is ever published on. States that do not want any
/// traffic filter on it.
pub const UNKNOWN_CHANNEL: &str = "@unknown";

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
