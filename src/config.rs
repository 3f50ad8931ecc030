//! Per-subsystem configuration knobs, constructed in code or supplied by the
//! embedding service — the core does not read files or environment
//! variables.

use std::time::Duration;

/// Governs when `FlushWorker` drains `EventBuffer` into `EventPersister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBufferConfig {
    pub size_threshold: usize,
    pub flush_interval: Duration,
}

impl Default for EventBufferConfig {
    fn default() -> Self {
        Self { size_threshold: 500, flush_interval: Duration::from_millis(250) }
    }
}

/// Bounds `TemporalEventCache`'s ring of recently applied events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalCacheConfig {
    pub capacity: usize,
}

impl Default for TemporalCacheConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

/// Pooling, fan-out, and routing-refresh cadence for the shard client layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardClientConfig {
    pub fan_out_limit: usize,
    pub request_timeout: Duration,
    /// How often `ConfigRefresher` polls the `ShardConfigurationPersister`
    /// for a new `ShardConfigurationSet` to hot-swap into the routing table.
    pub refresh_interval: Duration,
}

impl Default for ShardClientConfig {
    fn default() -> Self {
        Self { fan_out_limit: 16, request_timeout: Duration::from_secs(5), refresh_interval: Duration::from_secs(5) }
    }
}

/// Drives `SplitOrchestrator`'s drain phase: how many times to poll the
/// source's active-operation count, and how long to wait between polls,
/// before aborting the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitConfig {
    pub max_drain_attempts: u32,
    pub drain_interval: Duration,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self { max_drain_attempts: 20, drain_interval: Duration::from_millis(50) }
    }
}

/// Governs `ReaderNode`'s polling cadence and at-least-once dedup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderNodeConfig {
    pub poll_interval: Duration,
    pub dedup_window: usize,
}

impl Default for ReaderNodeConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_millis(200), dedup_window: 256 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        assert!(EventBufferConfig::default().size_threshold > 0);
        assert!(TemporalCacheConfig::default().capacity > 0);
        assert!(ShardClientConfig::default().fan_out_limit > 0);
        assert!(ShardClientConfig::default().refresh_interval > Duration::ZERO);
        assert!(SplitConfig::default().max_drain_attempts > 0);
        assert!(ReaderNodeConfig::default().dedup_window > 0);
    }
}
