//! Integration tests for client sessions against an in-process hub.
//!
//! Each session keeps a cache and accessible-set view; these tests check
//! that views converge as grants come and go, and that room subscriptions
//! follow the view.
//!
//! Verification command: `cargo test --test client_sync`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use taskshare::client::{ClientError, ConnectOptions, HubClient};
use taskshare::session::Session;
use taskshare_hub::auth::TokenTable;
use taskshare_hub::hub::Room;
use taskshare_hub::server::{HubState, start_server};
use taskshare_hub::store::MemoryStore;
use taskshare_proto::access::{Access, Permission};
use taskshare_proto::ids::{ListId, TaskId, UserId};
use taskshare_proto::model::{NewList, NewTask, TaskPatch};
use taskshare_proto::wire::{FailureKind, HubEvent, Operation, Payload};

// =============================================================================
// Helpers
// =============================================================================

async fn start_hub() -> (SocketAddr, Arc<HubState<MemoryStore>>) {
    let tokens: TokenTable = [("t-alice", "alice"), ("t-bob", "bob"), ("t-carol", "carol")]
        .into_iter()
        .collect();
    let (addr, state, _handle) = start_server("127.0.0.1:0", tokens)
        .await
        .expect("failed to start test hub");
    (addr, state)
}

async fn open_session(addr: SocketAddr, token: &str) -> Session {
    let client = HubClient::connect(&format!("ws://{addr}/ws"), token, ConnectOptions::default())
        .await
        .expect("connect failed");
    Session::start(client).await.expect("session start failed")
}

/// Applies events until one matches `pred`.
async fn wait_for(session: &mut Session, pred: impl Fn(&HubEvent) -> bool) -> HubEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = session.next_change().await.expect("connection lost");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

/// Asserts no event arrives within a short window.
async fn assert_quiet(session: &mut Session) {
    let result = tokio::time::timeout(Duration::from_millis(300), session.next_change()).await;
    assert!(result.is_err(), "expected no event, got {result:?}");
}

async fn create_list(session: &mut Session, name: &str) -> ListId {
    match session
        .perform(Operation::CreateList(NewList {
            name: name.to_string(),
            description: None,
        }))
        .await
        .unwrap()
    {
        Payload::List(list) => list.id,
        other => panic!("expected list, got {other:?}"),
    }
}

async fn create_task(session: &mut Session, list_id: ListId, name: &str) -> TaskId {
    match session
        .perform(Operation::CreateTask {
            list_id,
            task: NewTask {
                name: name.to_string(),
                ..NewTask::default()
            },
        })
        .await
        .unwrap()
    {
        Payload::Task(task) => task.id,
        other => panic!("expected task, got {other:?}"),
    }
}

fn failure_kind(result: Result<Payload, ClientError>) -> FailureKind {
    match result {
        Err(ClientError::Failed(failure)) => failure.kind,
        other => panic!("expected failure, got {other:?}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn start_loads_snapshot_and_joins_rooms() {
    let (addr, state) = start_hub().await;
    let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));
    let list = state
        .service
        .create_list(
            Some(&alice),
            NewList {
                name: "Shared".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    state
        .service
        .share_list(Some(&alice), list.id, &bob, Permission::Edit)
        .await
        .unwrap();

    let session = open_session(addr, "t-bob").await;
    assert_eq!(session.user_id(), &bob);
    assert!(session.view().shared_lists.contains(&list.id));
    assert_eq!(
        session.view().list_access.get(&list.id),
        Some(&Access::Shared(Permission::Edit))
    );
    assert_eq!(state.hub().members(&Room::List(list.id)).await.len(), 1);
}

#[tokio::test]
async fn grant_then_receive_task_events() {
    let (addr, _state) = start_hub().await;
    let mut alice = open_session(addr, "t-alice").await;
    let mut bob = open_session(addr, "t-bob").await;

    let list_id = create_list(&mut alice, "Groceries").await;
    assert!(alice.view().owned_lists.contains(&list_id));

    alice
        .perform(Operation::ShareList {
            list_id,
            user_id: UserId::new("bob"),
            permission: Some(Permission::View),
        })
        .await
        .unwrap();
    wait_for(&mut bob, |e| matches!(e, HubEvent::ListShared { .. })).await;
    assert!(bob.view().subscriptions().contains(&list_id));

    let task_id = create_task(&mut alice, list_id, "milk").await;
    wait_for(&mut bob, |e| matches!(e, HubEvent::TaskCreated(t) if t.id == task_id)).await;
    assert!(bob.view().can_task(task_id, Permission::View));
    assert!(!bob.view().can_task(task_id, Permission::Edit));
}

#[tokio::test]
async fn revoked_session_drops_list_and_goes_quiet() {
    let (addr, _state) = start_hub().await;
    let mut alice = open_session(addr, "t-alice").await;
    let list_id = create_list(&mut alice, "Team").await;
    alice
        .perform(Operation::ShareList {
            list_id,
            user_id: UserId::new("bob"),
            permission: Some(Permission::Edit),
        })
        .await
        .unwrap();
    let mut bob = open_session(addr, "t-bob").await;
    assert!(bob.view().accessible_lists.contains(&list_id));

    alice
        .perform(Operation::UnshareList {
            list_id,
            user_id: UserId::new("bob"),
        })
        .await
        .unwrap();
    wait_for(&mut bob, |e| matches!(e, HubEvent::ListUnshared { .. })).await;
    assert!(bob.view().accessible_lists.is_empty());
    assert!(bob.cache().list(list_id).is_none());

    create_task(&mut alice, list_id, "secret").await;
    assert_quiet(&mut bob).await;
}

#[tokio::test]
async fn direct_task_grant_is_lenient_for_edits_and_strict_for_delete() {
    let (addr, _state) = start_hub().await;
    let mut alice = open_session(addr, "t-alice").await;
    let mut carol = open_session(addr, "t-carol").await;
    let list_id = create_list(&mut alice, "L").await;
    let task_id = create_task(&mut alice, list_id, "T").await;

    alice
        .perform(Operation::ShareTask {
            task_id,
            user_id: UserId::new("carol"),
            permission: Some(Permission::Admin),
        })
        .await
        .unwrap();
    wait_for(&mut carol, |e| matches!(e, HubEvent::TaskShared(_))).await;
    assert!(carol.view().accessible_lists.is_empty());
    assert!(carol.view().can_task(task_id, Permission::Admin));

    let updated = carol
        .perform(Operation::UpdateTask {
            task_id,
            patch: TaskPatch {
                description: Some(Some("notes".to_string())),
                ..TaskPatch::default()
            },
        })
        .await
        .unwrap();
    assert!(matches!(updated, Payload::Task(t) if t.description.as_deref() == Some("notes")));
    assert_eq!(
        carol.cache().task(task_id).and_then(|t| t.description.clone()),
        Some("notes".to_string())
    );

    let denied = carol.perform(Operation::DeleteTask { task_id }).await;
    assert_eq!(failure_kind(denied), FailureKind::Forbidden);
    assert!(carol.cache().task(task_id).is_some());
}

#[tokio::test]
async fn leaving_a_list_clears_it_locally() {
    let (addr, state) = start_hub().await;
    let mut alice = open_session(addr, "t-alice").await;
    let list_id = create_list(&mut alice, "Book club").await;
    alice
        .perform(Operation::ShareList {
            list_id,
            user_id: UserId::new("bob"),
            permission: None,
        })
        .await
        .unwrap();

    let mut bob = open_session(addr, "t-bob").await;
    assert_eq!(
        bob.view().list_access.get(&list_id),
        Some(&Access::Shared(Permission::View))
    );

    let payload = bob
        .perform(Operation::UnshareList {
            list_id,
            user_id: UserId::new("bob"),
        })
        .await
        .unwrap();
    assert_eq!(payload, Payload::LeftList(list_id));
    assert!(bob.view().subscriptions().is_empty());
    assert_eq!(state.hub().members(&Room::List(list_id)).await.len(), 1);
}

#[tokio::test]
async fn failed_request_leaves_cache_untouched() {
    let (addr, _state) = start_hub().await;
    let mut alice = open_session(addr, "t-alice").await;
    let list_id = create_list(&mut alice, "Mine").await;
    let before = alice.cache().clone();

    let result = alice
        .perform(Operation::ShareList {
            list_id,
            user_id: UserId::new("alice"),
            permission: None,
        })
        .await;
    assert_eq!(failure_kind(result), FailureKind::SelfGrant);
    assert_eq!(alice.cache(), &before);
}
