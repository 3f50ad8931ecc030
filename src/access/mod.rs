//! The access manager: the single source of truth for one shard's slice of
//! the authorization model (spec section 4.2).

mod manager;

pub use manager::{AccessManager, Command, IdempotencyMode};
