//! Integration tests for room membership and event fan-out.
//!
//! Starts the hub in-process, connects several WebSocket clients, and checks
//! that events reach exactly the members of the relevant rooms.
//!
//! Verification command: `cargo test --test fanout`

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use taskshare_hub::auth::TokenTable;
use taskshare_hub::hub::Room;
use taskshare_hub::server::{HubState, start_server};
use taskshare_hub::store::MemoryStore;
use taskshare_proto::access::Permission;
use taskshare_proto::ids::{ListId, UserId};
use taskshare_proto::model::{NewList, NewTask};
use taskshare_proto::wire::{self, HubEvent, HubMessage, Operation, Outcome, Payload};

// =============================================================================
// Type aliases and helpers
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Starts a hub on a random port with tokens for alice, bob and carol.
async fn start_hub() -> (std::net::SocketAddr, Arc<HubState<MemoryStore>>) {
    let tokens: TokenTable = [("t-alice", "alice"), ("t-bob", "bob"), ("t-carol", "carol")]
        .into_iter()
        .collect();
    let (addr, state, _handle) = start_server("127.0.0.1:0", tokens)
        .await
        .expect("failed to start test hub");
    (addr, state)
}

/// Connects a WebSocket client and completes the handshake.
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

/// Announces subscriptions and waits for the hub's diff.
async fn subscribe(ws: &mut WsStream, list_ids: Vec<ListId>) -> (Vec<ListId>, Vec<ListId>) {
    ws_send(
        ws,
        &HubMessage::SubscribeLists {
            request_id: 0,
            list_ids,
        },
    )
    .await;
    loop {
        if let HubMessage::Subscribed { joined, left, .. } = ws_recv(ws).await {
            return (joined, left);
        }
    }
}

/// Sends a request and waits for its response, skipping interleaved events.
async fn request(ws: &mut WsStream, request_id: u64, op: Operation) -> Outcome {
    ws_send(ws, &HubMessage::Request { request_id, op }).await;
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

async fn next_event(ws: &mut WsStream) -> HubEvent {
    loop {
        if let HubMessage::Event(event) = ws_recv(ws).await {
            return event;
        }
    }
}

/// Asserts nothing arrives within a short window.
async fn assert_silent(ws: &mut WsStream) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "expected silence, got {result:?}");
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
async fn overlapping_subscribers_receive_task_created_and_outsider_nothing() {
    let (addr, state) = start_hub().await;
    let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));
    let list = state
        .service
        .create_list(Some(&alice), new_list("L"))
        .await
        .unwrap();
    state
        .service
        .share_list(Some(&alice), list.id, &bob, Permission::View)
        .await
        .unwrap();

    let mut ws_alice = connect_and_authenticate(addr, "t-alice").await;
    let mut ws_bob = connect_and_authenticate(addr, "t-bob").await;
    let mut ws_carol = connect_and_authenticate(addr, "t-carol").await;
    subscribe(&mut ws_alice, vec![list.id]).await;
    subscribe(&mut ws_bob, vec![list.id]).await;

    let outcome = request(
        &mut ws_alice,
        1,
        Operation::CreateTask {
            list_id: list.id,
            task: new_task("T2"),
        },
    )
    .await;
    let Outcome::Ok(Payload::Task(created)) = outcome else {
        panic!("expected task payload, got {outcome:?}");
    };

    match next_event(&mut ws_bob).await {
        HubEvent::TaskCreated(task) => assert_eq!(task.id, created.id),
        other => panic!("expected TaskCreated, got {other:?}"),
    }
    assert_silent(&mut ws_carol).await;
}

#[tokio::test]
async fn subscription_is_filtered_to_visible_lists() {
    let (addr, state) = start_hub().await;
    let alice = UserId::new("alice");
    let list = state
        .service
        .create_list(Some(&alice), new_list("Private"))
        .await
        .unwrap();

    let mut ws_carol = connect_and_authenticate(addr, "t-carol").await;
    let (joined, left) = subscribe(&mut ws_carol, vec![list.id]).await;
    assert!(joined.is_empty());
    assert!(left.is_empty());
    assert!(state.hub().members(&Room::List(list.id)).await.is_empty());

    state
        .service
        .create_task(Some(&alice), list.id, new_task("hidden"))
        .await
        .unwrap();
    assert_silent(&mut ws_carol).await;
}

#[tokio::test]
async fn resubscribing_reports_joined_and_left() {
    let (addr, state) = start_hub().await;
    let alice = UserId::new("alice");
    let first = state
        .service
        .create_list(Some(&alice), new_list("One"))
        .await
        .unwrap();
    let second = state
        .service
        .create_list(Some(&alice), new_list("Two"))
        .await
        .unwrap();

    let mut ws = connect_and_authenticate(addr, "t-alice").await;
    let (joined, _) = subscribe(&mut ws, vec![first.id, second.id]).await;
    assert_eq!(joined.len(), 2);

    let (joined, left) = subscribe(&mut ws, vec![second.id]).await;
    assert!(joined.is_empty());
    assert_eq!(left, vec![first.id]);

    state
        .service
        .create_task(Some(&alice), first.id, new_task("unheard"))
        .await
        .unwrap();
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn every_device_of_a_user_receives_user_room_events() {
    let (addr, state) = start_hub().await;
    let (alice, bob) = (UserId::new("alice"), UserId::new("bob"));
    let list = state
        .service
        .create_list(Some(&alice), new_list("L"))
        .await
        .unwrap();

    let mut phone = connect_and_authenticate(addr, "t-bob").await;
    let mut laptop = connect_and_authenticate(addr, "t-bob").await;

    state
        .service
        .share_list(Some(&alice), list.id, &bob, Permission::Edit)
        .await
        .unwrap();

    for ws in [&mut phone, &mut laptop] {
        assert!(matches!(
            next_event(ws).await,
            HubEvent::ListShared { list: shared, .. } if shared.id == list.id
        ));
    }
}

#[tokio::test]
async fn owner_receives_list_created_on_user_room() {
    let (addr, _state) = start_hub().await;
    let mut ws = connect_and_authenticate(addr, "t-alice").await;

    ws_send(
        &mut ws,
        &HubMessage::Request {
            request_id: 9,
            op: Operation::CreateList(new_list("Inbox")),
        },
    )
    .await;

    match ws_recv(&mut ws).await {
        HubMessage::Event(HubEvent::ListCreated(list)) => assert_eq!(list.name, "Inbox"),
        other => panic!("expected ListCreated, got {other:?}"),
    }
    assert!(matches!(
        ws_recv(&mut ws).await,
        HubMessage::Response { request_id: 9, .. }
    ));
}

#[tokio::test]
async fn disconnect_drops_memberships() {
    let (addr, state) = start_hub().await;
    let alice = UserId::new("alice");
    let list = state
        .service
        .create_list(Some(&alice), new_list("L"))
        .await
        .unwrap();

    let mut ws = connect_and_authenticate(addr, "t-alice").await;
    subscribe(&mut ws, vec![list.id]).await;
    assert_eq!(state.hub().members(&Room::List(list.id)).await.len(), 1);

    ws.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while state.hub().connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection was not dropped");
    assert!(state.hub().members(&Room::List(list.id)).await.is_empty());
    assert_eq!(state.hub().room_count().await, 0);
}
