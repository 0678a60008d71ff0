//! Integration tests for the grant lifecycle over the wire.
//!
//! Covers permission enforcement on requests, the grant → re-subscribe →
//! receive flow, revocation cutting off list broadcasts, self-revocation,
//! and concurrent duplicate grants.
//!
//! Verification command: `cargo test --test sharing_flow`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use taskshare_hub::auth::TokenTable;
use taskshare_hub::server::{HubState, start_server};
use taskshare_hub::store::MemoryStore;
use taskshare_proto::access::Permission;
use taskshare_proto::ids::{ListId, UserId};
use taskshare_proto::model::{NewList, NewTask, TaskPatch};
use taskshare_proto::wire::{
    self, FailureKind, HubEvent, HubMessage, Operation, Outcome, Payload,
};

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_hub() -> (std::net::SocketAddr, Arc<HubState<MemoryStore>>) {
    let tokens: TokenTable = [("t-a", "a"), ("t-b", "b"), ("t-c", "c")]
        .into_iter()
        .collect();
    let (addr, state, _handle) = start_server("127.0.0.1:0", tokens)
        .await
        .expect("failed to start test hub");
    (addr, state)
}

async fn connect_and_authenticate(addr: std::net::SocketAddr, token: &str) -> WsStream {
    let url = format!("ws://{addr}/ws");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws_send(
        &mut ws,
        &HubMessage::Authenticate {
            token: token.to_string(),
        },
    )
    .await;
    let ack = ws_recv(&mut ws).await;
    assert!(
        matches!(ack, HubMessage::Authenticated { .. }),
        "expected Authenticated, got {ack:?}"
    );
    ws
}

async fn ws_send(ws: &mut WsStream, msg: &HubMessage) {
    let bytes = wire::encode(msg).unwrap();
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .unwrap();
}

async fn ws_recv(ws: &mut WsStream) -> HubMessage {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    wire::decode(&msg.into_data()).unwrap()
}

async fn subscribe(ws: &mut WsStream, list_ids: Vec<ListId>) -> Vec<ListId> {
    ws_send(
        ws,
        &HubMessage::SubscribeLists {
            request_id: 0,
            list_ids,
        },
    )
    .await;
    loop {
        if let HubMessage::Subscribed { joined, .. } = ws_recv(ws).await {
            return joined;
        }
    }
}

async fn await_response(ws: &mut WsStream, request_id: u64) -> Outcome {
    loop {
        if let HubMessage::Response {
            request_id: id,
            outcome,
        } = ws_recv(ws).await
            && id == request_id
        {
            return outcome;
        }
    }
}

async fn request(ws: &mut WsStream, request_id: u64, op: Operation) -> Outcome {
    ws_send(ws, &HubMessage::Request { request_id, op }).await;
    await_response(ws, request_id).await
}

async fn next_event(ws: &mut WsStream) -> HubEvent {
    loop {
        if let HubMessage::Event(event) = ws_recv(ws).await {
            return event;
        }
    }
}

async fn assert_silent(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "expected silence, got {result:?}");
}

fn failure_kind(outcome: &Outcome) -> Option<FailureKind> {
    match outcome {
        Outcome::Err(failure) => Some(failure.kind),
        Outcome::Ok(_) => None,
    }
}

fn new_list(name: &str) -> NewList {
    NewList {
        name: name.to_string(),
        description: None,
    }
}

fn new_task(name: &str) -> NewTask {
    NewTask {
        name: name.to_string(),
        ..NewTask::default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn list_and_task_grants_resolve_over_the_wire() {
    let (addr, _state) = start_hub().await;
    let mut ws_a = connect_and_authenticate(addr, "t-a").await;
    let mut ws_b = connect_and_authenticate(addr, "t-b").await;
    let mut ws_c = connect_and_authenticate(addr, "t-c").await;

    let Outcome::Ok(Payload::List(list)) =
        request(&mut ws_a, 1, Operation::CreateList(new_list("L"))).await
    else {
        panic!("list creation failed");
    };
    let outcome = request(
        &mut ws_a,
        2,
        Operation::ShareList {
            list_id: list.id,
            user_id: UserId::new("b"),
            permission: Some(Permission::Edit),
        },
    )
    .await;
    assert!(matches!(outcome, Outcome::Ok(Payload::List(_))));

    let Outcome::Ok(Payload::Task(task)) = request(
        &mut ws_b,
        1,
        Operation::CreateTask {
            list_id: list.id,
            task: new_task("T"),
        },
    )
    .await
    else {
        panic!("B should be able to create a task");
    };

    let outcome = request(&mut ws_b, 2, Operation::DeleteList { list_id: list.id }).await;
    assert_eq!(failure_kind(&outcome), Some(FailureKind::Forbidden));

    let outcome = request(
        &mut ws_a,
        3,
        Operation::ShareTask {
            task_id: task.id,
            user_id: UserId::new("c"),
            permission: Some(Permission::Admin),
        },
    )
    .await;
    assert!(matches!(outcome, Outcome::Ok(Payload::Task(_))));

    let outcome = request(&mut ws_c, 1, Operation::DeleteTask { task_id: task.id }).await;
    assert_eq!(failure_kind(&outcome), Some(FailureKind::Forbidden));

    let outcome = request(
        &mut ws_c,
        2,
        Operation::UpdateTask {
            task_id: task.id,
            patch: TaskPatch {
                description: Some(Some("edited by c".to_string())),
                ..TaskPatch::default()
            },
        },
    )
    .await;
    match outcome {
        Outcome::Ok(Payload::Task(updated)) => {
            assert_eq!(updated.description.as_deref(), Some("edited by c"));
        }
        other => panic!("expected updated task, got {other:?}"),
    }
}

#[tokio::test]
async fn new_grantee_receives_list_broadcasts_after_resubscribing() {
    let (addr, state) = start_hub().await;
    let a = UserId::new("a");
    let list = state
        .service
        .create_list(Some(&a), new_list("L"))
        .await
        .unwrap();

    let mut ws_a = connect_and_authenticate(addr, "t-a").await;
    let mut ws_b = connect_and_authenticate(addr, "t-b").await;
    subscribe(&mut ws_a, vec![list.id]).await;

    let outcome = request(
        &mut ws_a,
        1,
        Operation::ShareList {
            list_id: list.id,
            user_id: UserId::new("b"),
            permission: None,
        },
    )
    .await;
    assert!(matches!(outcome, Outcome::Ok(_)));

    match next_event(&mut ws_b).await {
        HubEvent::ListShared { list: shared, .. } => {
            assert_eq!(shared.grant_for(&UserId::new("b")), Some(Permission::View));
        }
        other => panic!("expected ListShared, got {other:?}"),
    }
    assert_eq!(subscribe(&mut ws_b, vec![list.id]).await, vec![list.id]);

    state
        .service
        .create_task(Some(&a), list.id, new_task("after grant"))
        .await
        .unwrap();
    assert!(matches!(
        next_event(&mut ws_b).await,
        HubEvent::TaskCreated(_)
    ));
}

#[tokio::test]
async fn revoked_user_receives_no_further_list_broadcasts() {
    let (addr, state) = start_hub().await;
    let (a, b) = (UserId::new("a"), UserId::new("b"));
    let list = state
        .service
        .create_list(Some(&a), new_list("L"))
        .await
        .unwrap();
    state
        .service
        .share_list(Some(&a), list.id, &b, Permission::Edit)
        .await
        .unwrap();

    let mut ws_a = connect_and_authenticate(addr, "t-a").await;
    let mut ws_b = connect_and_authenticate(addr, "t-b").await;
    subscribe(&mut ws_b, vec![list.id]).await;

    let outcome = request(
        &mut ws_a,
        1,
        Operation::UnshareList {
            list_id: list.id,
            user_id: b.clone(),
        },
    )
    .await;
    assert!(matches!(outcome, Outcome::Ok(Payload::List(_))));

    assert!(matches!(
        next_event(&mut ws_b).await,
        HubEvent::ListUnshared { list_id } if list_id == list.id
    ));

    state
        .service
        .create_task(Some(&a), list.id, new_task("private again"))
        .await
        .unwrap();
    assert_silent(&mut ws_b).await;

    // A stale announcement cannot rejoin the room.
    assert!(subscribe(&mut ws_b, vec![list.id]).await.is_empty());
}

#[tokio::test]
async fn leaving_a_list_is_idempotent() {
    let (addr, state) = start_hub().await;
    let (a, b) = (UserId::new("a"), UserId::new("b"));
    let list = state
        .service
        .create_list(Some(&a), new_list("L"))
        .await
        .unwrap();
    state
        .service
        .share_list(Some(&a), list.id, &b, Permission::View)
        .await
        .unwrap();

    let mut ws_b = connect_and_authenticate(addr, "t-b").await;
    for request_id in [1, 2] {
        let outcome = request(
            &mut ws_b,
            request_id,
            Operation::UnshareList {
                list_id: list.id,
                user_id: b.clone(),
            },
        )
        .await;
        assert_eq!(outcome, Outcome::Ok(Payload::LeftList(list.id)));
    }

    let outcome = request(&mut ws_b, 3, Operation::GetList { list_id: list.id }).await;
    assert_eq!(failure_kind(&outcome), Some(FailureKind::Forbidden));
}

#[tokio::test]
async fn concurrent_identical_grants_yield_one_duplicate() {
    let (addr, state) = start_hub().await;
    let a = UserId::new("a");
    let list = state
        .service
        .create_list(Some(&a), new_list("L"))
        .await
        .unwrap();

    let mut device_one = connect_and_authenticate(addr, "t-a").await;
    let mut device_two = connect_and_authenticate(addr, "t-a").await;
    let op = Operation::ShareList {
        list_id: list.id,
        user_id: UserId::new("b"),
        permission: Some(Permission::Edit),
    };

    ws_send(
        &mut device_one,
        &HubMessage::Request {
            request_id: 1,
            op: op.clone(),
        },
    )
    .await;
    ws_send(&mut device_two, &HubMessage::Request { request_id: 1, op }).await;
    let outcomes = [
        await_response(&mut device_one, 1).await,
        await_response(&mut device_two, 1).await,
    ];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Ok(_)))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| failure_kind(o) == Some(FailureKind::DuplicateGrant))
            .count(),
        1
    );
}

#[tokio::test]
async fn unauthorized_revocation_and_missing_grants_are_typed() {
    let (addr, state) = start_hub().await;
    let (a, b) = (UserId::new("a"), UserId::new("b"));
    let list = state
        .service
        .create_list(Some(&a), new_list("L"))
        .await
        .unwrap();
    state
        .service
        .share_list(Some(&a), list.id, &b, Permission::Edit)
        .await
        .unwrap();

    let mut ws_a = connect_and_authenticate(addr, "t-a").await;
    let mut ws_b = connect_and_authenticate(addr, "t-b").await;

    let outcome = request(
        &mut ws_b,
        1,
        Operation::UnshareList {
            list_id: list.id,
            user_id: a.clone(),
        },
    )
    .await;
    assert_eq!(failure_kind(&outcome), Some(FailureKind::Forbidden));

    let outcome = request(
        &mut ws_a,
        1,
        Operation::UpdateListShare {
            list_id: list.id,
            user_id: UserId::new("c"),
            permission: Permission::Admin,
        },
    )
    .await;
    assert_eq!(failure_kind(&outcome), Some(FailureKind::GrantNotFound));

    let outcome = request(
        &mut ws_a,
        2,
        Operation::ShareList {
            list_id: list.id,
            user_id: a.clone(),
            permission: None,
        },
    )
    .await;
    assert_eq!(failure_kind(&outcome), Some(FailureKind::SelfGrant));

    let outcome = request(&mut ws_a, 3, Operation::GetList { list_id: ListId::new() }).await;
    assert_eq!(failure_kind(&outcome), Some(FailureKind::NotFound));
}
