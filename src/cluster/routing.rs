//! Hash-range partitioning and the routing table (spec section 4.7).
//!
//! Each `DataElementKind` partitions the full non-negative 32-bit hash space
//! into disjoint, contiguous ranges, one per shard group. `RoutingTable`
//! holds the current assignment and supports atomic hot-swap on
//! configuration refresh: readers observe either the old or the new table,
//! never a torn state.

use crate::error::{AccessGraphError, Result};
use parking_lot::RwLock;
use std::sync::Arc;

/// The three orthogonal partitioning dimensions (spec GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataElementKind {
    User,
    Group,
    GroupToGroup,
}

impl DataElementKind {
    pub const ALL: [DataElementKind; 3] =
        [DataElementKind::User, DataElementKind::Group, DataElementKind::GroupToGroup];
}

/// An inclusive, non-negative hash sub-range `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HashRange {
    pub lo: i32,
    pub hi: i32,
}

impl HashRange {
    pub fn new(lo: i32, hi: i32) -> Self {
        assert!(lo <= hi, "hash range lo must not exceed hi");
        Self { lo, hi }
    }

    pub fn full() -> Self {
        Self { lo: 0, hi: i32::MAX }
    }

    pub fn contains(&self, code: i32) -> bool {
        code >= self.lo && code <= self.hi
    }

    /// Splits this range at `at` (exclusive upper bound of the lower half),
    /// returning `(lower, upper)`. `at` must lie strictly inside the range.
    pub fn split_at(&self, at: i32) -> Result<(HashRange, HashRange)> {
        if at <= self.lo || at > self.hi {
            return Err(AccessGraphError::Validation(format!(
                "split point {at} does not lie strictly inside [{}, {}]",
                self.lo, self.hi
            )));
        }
        Ok((HashRange::new(self.lo, at - 1), HashRange::new(at, self.hi)))
    }
}

/// Network coordinates plus credentials for a shard group's endpoint.
/// Credentials are opaque to the core — transport is an external
/// collaborator (spec section 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEndpoint {
    pub shard_id: String,
    pub url: String,
}

/// One row of a `ShardConfigurationSet`: a kind's hash range assigned to an
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardConfigurationEntry {
    pub kind: DataElementKind,
    pub range: HashRange,
    pub endpoint: ShardEndpoint,
}

/// A complete shard configuration: every kind's ranges must partition the
/// full hash space disjointly and completely (spec section 8, "hash range
/// coverage").
#[derive(Debug, Clone, Default)]
pub struct ShardConfigurationSet {
    pub entries: Vec<ShardConfigurationEntry>,
}

impl ShardConfigurationSet {
    pub fn new(entries: Vec<ShardConfigurationEntry>) -> Self {
        Self { entries }
    }

    pub fn for_kind(&self, kind: DataElementKind) -> Vec<&ShardConfigurationEntry> {
        self.entries.iter().filter(|e| e.kind == kind).collect()
    }

    /// Verifies that every kind's ranges tile `[0, i32::MAX]` with no gaps
    /// and no overlaps.
    pub fn validate_coverage(&self) -> Result<()> {
        for kind in DataElementKind::ALL {
            let mut ranges: Vec<HashRange> = self.for_kind(kind).into_iter().map(|e| e.range).collect();
            if ranges.is_empty() {
                return Err(AccessGraphError::IncompleteHashRange(format!("{kind:?}")));
            }
            ranges.sort_by_key(|r| r.lo);
            let mut expected_next = 0i32;
            for r in &ranges {
                if r.lo != expected_next {
                    return Err(AccessGraphError::IncompleteHashRange(format!("{kind:?}")));
                }
                expected_next = match r.hi.checked_add(1) {
                    Some(n) => n,
                    None => i32::MAX, // hi == i32::MAX, last range
                };
            }
            if ranges.last().unwrap().hi != i32::MAX {
                return Err(AccessGraphError::IncompleteHashRange(format!("{kind:?}")));
            }
        }
        Ok(())
    }
}

/// Durable storage for the current `ShardConfigurationSet`. An external
/// collaborator — the core only needs the trait.
#[async_trait::async_trait]
pub trait ShardConfigurationPersister: Send + Sync {
    async fn load(&self) -> Result<ShardConfigurationSet>;
    async fn save(&self, config: &ShardConfigurationSet) -> Result<()>;
}

struct RoutingTableInner {
    /// Per-kind list of (range, endpoint), sorted by range.lo for binary
    /// search.
    routes: std::collections::HashMap<DataElementKind, Vec<(HashRange, ShardEndpoint)>>,
    version: u64,
}

/// Maintains the hash-range to shard-endpoint mapping with atomic hot-swap
/// on configuration refresh.
pub struct RoutingTable {
    inner: Arc<RwLock<RoutingTableInner>>,
}

impl RoutingTable {
    pub fn new(config: ShardConfigurationSet) -> Self {
        let table = Self { inner: Arc::new(RwLock::new(RoutingTableInner { routes: Default::default(), version: 0 })) };
        table.refresh_configuration(config);
        table
    }

    pub fn empty() -> Self {
        Self { inner: Arc::new(RwLock::new(RoutingTableInner { routes: Default::default(), version: 0 })) }
    }

    /// Hash `element`, binary-search the routes for `kind`, return the
    /// endpoint owning that range.
    pub fn route_one(&self, kind: DataElementKind, element: &str) -> Result<ShardEndpoint> {
        let code = crate::hash::element_hash_code(element);
        let inner = self.inner.read();
        let routes = inner
            .routes
            .get(&kind)
            .ok_or_else(|| AccessGraphError::IncompleteHashRange(format!("{kind:?}")))?;
        let idx = routes.partition_point(|(range, _)| range.lo <= code);
        if idx == 0 {
            return Err(AccessGraphError::IncompleteHashRange(format!("{kind:?}")));
        }
        let (range, endpoint) = &routes[idx - 1];
        if range.contains(code) {
            Ok(endpoint.clone())
        } else {
            Err(AccessGraphError::IncompleteHashRange(format!("{kind:?}")))
        }
    }

    /// Every distinct endpoint in `kind`'s routing table.
    pub fn route_all(&self, kind: DataElementKind) -> Vec<ShardEndpoint> {
        let inner = self.inner.read();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        if let Some(routes) = inner.routes.get(&kind) {
            for (_, endpoint) in routes {
                if seen.insert(endpoint.shard_id.clone()) {
                    out.push(endpoint.clone());
                }
            }
        }
        out
    }

    /// Atomically swaps in a new configuration. In-flight requests that
    /// already captured a handle complete against it; new requests observe
    /// the new table.
    pub fn refresh_configuration(&self, config: ShardConfigurationSet) {
        let mut by_kind: std::collections::HashMap<DataElementKind, Vec<(HashRange, ShardEndpoint)>> = Default::default();
        for entry in config.entries {
            by_kind.entry(entry.kind).or_default().push((entry.range, entry.endpoint));
        }
        for routes in by_kind.values_mut() {
            routes.sort_by_key(|(range, _)| range.lo);
        }
        let mut inner = self.inner.write();
        inner.routes = by_kind;
        inner.version += 1;
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }
}

/// Polls a `ShardConfigurationPersister` on a loop and atomically hot-swaps
/// the result into a `RoutingTable` (spec section 3's lifecycle note for
/// `ShardConfiguration`). Grounded on the same poll/select/shutdown shape as
/// `ReaderNode::run` and `FlushWorker::run`.
pub struct ConfigRefresher {
    table: Arc<RoutingTable>,
    store: Arc<dyn ShardConfigurationPersister>,
    interval: std::time::Duration,
}

impl ConfigRefresher {
    pub fn new(table: Arc<RoutingTable>, store: Arc<dyn ShardConfigurationPersister>) -> Self {
        Self { table, store, interval: crate::config::ShardClientConfig::default().refresh_interval }
    }

    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Loads the current configuration from the store and swaps it in.
    /// Returns the table's new version number.
    pub async fn refresh_once(&self) -> Result<u64> {
        let config = self.store.load().await?;
        self.table.refresh_configuration(config);
        Ok(self.table.version())
    }

    /// Runs `refresh_once` on a loop at `interval` until `shutdown` resolves.
    /// A failed load is logged and retried on the next tick rather than
    /// aborting the loop — a transient store outage should not stop the
    /// routing table from serving its last-known-good configuration.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        loop {
            match self.refresh_once().await {
                Ok(version) => tracing::debug!(version, "routing configuration refreshed"),
                Err(e) => tracing::warn!(error = %e, "routing configuration refresh failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = &mut shutdown => return,
            }
        }
    }
}
