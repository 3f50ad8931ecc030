//! The sharding and online-split machinery (spec section 4.7-4.9):
//! hash-range routing, the shard client RPC boundary, the operation
//! coordinator, and the split orchestrator.

pub mod client;
pub mod coordinator;
pub mod routing;
pub mod split;

pub use client::{InProcessShardClientFactory, ShardClient, ShardClientFactory, ShardRequest, ShardResponse};
pub use coordinator::OperationCoordinator;
pub use routing::{
    ConfigRefresher, DataElementKind, HashRange, RoutingTable, ShardConfigurationEntry, ShardConfigurationPersister,
    ShardConfigurationSet, ShardEndpoint,
};
pub use split::{OperationRouter, SplitOrchestrator, SplitOutcome};
