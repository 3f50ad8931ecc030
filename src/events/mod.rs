//! The event-sourcing pipeline (spec section 4.3-4.6): buffer, flush
//! strategy, temporal cache, persister, and reader node.

pub mod buffer;
pub mod cache;
pub mod flush;
pub mod model;
pub mod persister;
pub mod reader_node;

pub use buffer::EventBuffer;
pub use cache::TemporalEventCache;
pub use flush::{FlushStrategy, FlushWorker};
pub use model::{Event, EventAction, EventKind, EventPayload};
pub use persister::{EventPersister, InMemoryEventPersister, PersistedEvent};
pub use reader_node::ReaderNode;
