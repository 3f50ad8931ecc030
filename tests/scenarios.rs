//! End-to-end scenarios exercising `AccessManager` through its public
//! command/query surface, mirroring the concrete walkthroughs used to sign
//! off the authorization model.

use accessgraph::access::{Command, IdempotencyMode};
use accessgraph::error::AccessGraphError;
use accessgraph::AccessManager;

fn apply(manager: &mut AccessManager, commands: impl IntoIterator<Item = Command>) {
    for command in commands {
        manager.apply_command(command).unwrap();
    }
}

#[test]
fn direct_component_access() {
    let mut manager = AccessManager::new(IdempotencyMode::DependencyFree);
    apply(
        &mut manager,
        [
            Command::AddUser("alice".into()),
            Command::AddUserToComponentAccess { user: "alice".into(), component: "Orders".into(), access_level: "View".into() },
        ],
    );

    assert!(manager.has_access_to_component("alice", "Orders", "View").unwrap());
    assert!(!manager.has_access_to_component("alice", "Orders", "Edit").unwrap());
}

#[test]
fn indirect_access_via_group_chain() {
    let mut manager = AccessManager::new(IdempotencyMode::DependencyFree);
    apply(
        &mut manager,
        [
            Command::AddGroup("admins".into()),
            Command::AddGroup("staff".into()),
            Command::AddGroupToGroupMapping { from: "admins".into(), to: "staff".into() },
            Command::AddGroupToComponentAccess { group: "staff".into(), component: "Orders".into(), access_level: "View".into() },
            Command::AddUser("bob".into()),
            Command::AddUserToGroupMapping { user: "bob".into(), group: "admins".into() },
        ],
    );

    assert!(manager.has_access_to_component("bob", "Orders", "View").unwrap());
    let mappings = manager.get_user_to_group_mappings("bob", true).unwrap();
    assert_eq!(mappings, ["admins", "staff"].into_iter().map(String::from).collect());
}

#[test]
fn cycle_rejection_leaves_state_unchanged() {
    let mut manager = AccessManager::new(IdempotencyMode::DependencyFree);
    apply(
        &mut manager,
        [
            Command::AddGroup("a".into()),
            Command::AddGroup("b".into()),
            Command::AddGroup("c".into()),
            Command::AddGroupToGroupMapping { from: "a".into(), to: "b".into() },
            Command::AddGroupToGroupMapping { from: "b".into(), to: "c".into() },
        ],
    );

    let before = manager.get_group_to_group_mappings("a", true).unwrap();
    let err = manager.apply_command(Command::AddGroupToGroupMapping { from: "c".into(), to: "a".into() }).unwrap_err();
    assert!(matches!(err, AccessGraphError::CycleWouldBeCreated { .. }));
    assert_eq!(manager.get_group_to_group_mappings("a", true).unwrap(), before);
}

#[test]
fn cascade_remove_user() {
    let mut manager = AccessManager::new(IdempotencyMode::Strict);
    apply(
        &mut manager,
        [
            Command::AddUser("carol".into()),
            Command::AddGroup("g1".into()),
            Command::AddUserToGroupMapping { user: "carol".into(), group: "g1".into() },
            Command::AddUserToComponentAccess { user: "carol".into(), component: "Orders".into(), access_level: "View".into() },
        ],
    );

    manager.apply_command(Command::RemoveUser("carol".into())).unwrap();

    assert!(!manager.contains_user("carol"));
    let err = manager.get_user_to_group_mappings("carol", false).unwrap_err();
    assert!(matches!(err, AccessGraphError::NotFound(_)));
}

#[test]
fn cascade_remove_user_is_empty_in_dependency_free_mode() {
    let mut manager = AccessManager::new(IdempotencyMode::DependencyFree);
    apply(
        &mut manager,
        [
            Command::AddUser("carol".into()),
            Command::AddGroup("g1".into()),
            Command::AddUserToGroupMapping { user: "carol".into(), group: "g1".into() },
        ],
    );

    manager.apply_command(Command::RemoveUser("carol".into())).unwrap();
    assert_eq!(manager.get_user_to_group_mappings("carol", false).unwrap().len(), 0);
}

#[test]
fn idempotent_add_is_a_no_op_after_the_first() {
    let mut manager = AccessManager::new(IdempotencyMode::DependencyFree);
    let first = manager.apply_command(Command::AddUser("dana".into())).unwrap();
    assert_eq!(first.len(), 1);
    let second = manager.apply_command(Command::AddUser("dana".into())).unwrap();
    assert!(second.is_empty());
    assert_eq!(manager.user_count(), 1);
}

#[test]
fn add_then_remove_restores_pre_state() {
    let mut manager = AccessManager::new(IdempotencyMode::DependencyFree);
    assert!(!manager.contains_user("erin"));
    manager.apply_command(Command::AddUser("erin".into())).unwrap();
    manager.apply_command(Command::RemoveUser("erin".into())).unwrap();
    assert!(!manager.contains_user("erin"));
    assert_eq!(manager.user_count(), 0);
}

#[test]
fn replay_determinism_across_an_arbitrary_log() {
    let mut producer = AccessManager::new(IdempotencyMode::DependencyFree);
    let mut log = Vec::new();
    for command in [
        Command::AddUser("alice".into()),
        Command::AddGroup("admins".into()),
        Command::AddUserToGroupMapping { user: "alice".into(), group: "admins".into() },
        Command::AddGroupToComponentAccess { group: "admins".into(), component: "Orders".into(), access_level: "View".into() },
        Command::RemoveUserToGroupMapping { user: "alice".into(), group: "admins".into() },
    ] {
        log.extend(producer.apply_command(command).unwrap());
    }

    let mut replica = AccessManager::new(IdempotencyMode::DependencyFree);
    for event in &log {
        replica.apply_event(event).unwrap();
    }

    assert_eq!(replica.contains_user("alice"), producer.contains_user("alice"));
    assert_eq!(replica.contains_group("admins"), producer.contains_group("admins"));
    assert_eq!(
        replica.has_access_to_component("alice", "Orders", "View").unwrap(),
        producer.has_access_to_component("alice", "Orders", "View").unwrap()
    );
    assert_eq!(replica.user_count(), producer.user_count());
    assert_eq!(replica.group_count(), producer.group_count());
}
