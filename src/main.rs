//! AccessGraph demonstration binary.
//!
//! Wires a single in-process shard group end to end — `AccessManager`,
//! `EventBuffer`, `FlushWorker`, `InMemoryEventPersister`, `TemporalEventCache`,
//! and a `ReaderNode` replaying the log back into a second manager — and
//! applies a handful of commands through it. A production deployment
//! replaces the in-process pieces with real transport and storage; the core
//! only depends on their traits.

use accessgraph::access::IdempotencyMode;
use accessgraph::circuit_breaker::{TripAction, TripSwitch};
use accessgraph::config::{EventBufferConfig, TemporalCacheConfig};
use accessgraph::events::{EventBuffer, EventPersister, FlushStrategy, FlushWorker, InMemoryEventPersister, ReaderNode, TemporalEventCache};
use accessgraph::pauser::RequestPauser;
use accessgraph::{AccessManager, Command};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> accessgraph::Result<()> {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).with_level(true).init();

    print_banner();

    let persister: Arc<dyn EventPersister> = Arc::new(InMemoryEventPersister::new());
    let buffer = Arc::new(EventBuffer::new(EventBufferConfig::default().size_threshold));
    let breaker = TripSwitch::new(TripAction::FailFast);
    let pauser = Arc::new(RequestPauser::new());

    let mut writer = AccessManager::new(IdempotencyMode::DependencyFree);

    info!("applying demonstration commands");
    for command in demonstration_commands() {
        pauser.test_pause().await;
        breaker.check()?;
        let events = writer.apply_command(command)?;
        for event in events {
            buffer.enqueue(event);
        }
    }

    let flush_worker = FlushWorker::new(buffer.clone(), persister.clone(), FlushStrategy::SizeLimited, breaker.clone());
    flush_worker.drain_once().await?;
    let snapshot = persister.load_snapshot().await?;
    info!(persisted = snapshot.len(), "flushed buffered events");

    let cache = Arc::new(TemporalEventCache::new(TemporalCacheConfig::default().capacity));
    let reader = ReaderNode::new(AccessManager::new(IdempotencyMode::DependencyFree), cache, persister);
    let applied = reader.refresh_once().await?;
    info!(applied, "reader node replayed the event log");

    reader.with_manager(|m| {
        info!(users = m.user_count(), groups = m.group_count(), "replayed state");
    });

    tokio::time::sleep(Duration::from_millis(1)).await;
    Ok(())
}

fn demonstration_commands() -> Vec<Command> {
    vec![
        Command::AddUser("alice".into()),
        Command::AddGroup("engineering".into()),
        Command::AddUserToGroupMapping { user: "alice".into(), group: "engineering".into() },
        Command::AddGroupToComponentAccess {
            group: "engineering".into(),
            component: "deployment-console".into(),
            access_level: "write".into(),
        },
    ]
}

fn print_banner() {
    println!(
        r#"
   _                                 ____                 _
  / \   ___ ___ ___  ___ ___ _ __   / ___|_ __ __ _ _ __ | |__
 / _ \ / __/ __/ _ \/ __/ __| '_ \ | |  _| '__/ _` | '_ \| '_ \
/ ___ \ (_| (_|  __/\__ \__ \ |_) || |_| | | | (_| | |_) | | | |
/_/   \_\___\___\___||___/___/ .__/  \____|_|  \__,_| .__/|_| |_|
                              |_|                     |_|
"#
    );
}
