//! AccessGraph: a distributed, horizontally-scalable reachability-graph
//! authorization engine.
//!
//! A shard group (`node::ShardNode`) owns a slice of the authorization model
//! behind an `access::AccessManager`, durably records every mutation through
//! the `events` pipeline, and is addressed by an `cluster::OperationCoordinator`
//! across a hash-partitioned `cluster::RoutingTable`. Shard groups split
//! online under `cluster::SplitOrchestrator` without losing in-flight writes.

pub mod access;
pub mod circuit_breaker;
pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod hash;
pub mod node;
pub mod pauser;

pub use access::{AccessManager, Command, IdempotencyMode};
pub use circuit_breaker::{TripAction, TripSwitch};
pub use error::{AccessGraphError, Result};
pub use graph::{AbsentPolicy, MutationOutcome, ReachabilityGraph};
pub use node::ShardNode;
pub use pauser::RequestPauser;
