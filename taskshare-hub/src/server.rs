//! WebSocket front end: handshake, request dispatch, and the per-connection
//! writer that drains hub events onto the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskshare_proto::ids::UserId;
use taskshare_proto::wire::{self, HubMessage, Outcome};
use tokio::sync::mpsc;

use crate::auth::Authenticator;
use crate::hub::{ConnId, Hub, Outbound, SubscriptionDiff};
use crate::service::Service;
use crate::store::{MemoryStore, Store};

/// Default maximum accepted inbound frame size in bytes (256 KB).
const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

/// Shared state behind every connection.
pub struct HubState<S: Store> {
    /// Enforcement layer; also owns the hub handle.
    pub service: Service<S>,
    auth: Arc<dyn Authenticator>,
    max_frame_size: usize,
}

impl<S: Store> HubState<S> {
    /// Creates state with the default frame size limit.
    #[must_use]
    pub fn new(service: Service<S>, auth: impl Authenticator) -> Self {
        Self {
            service,
            auth: Arc::new(auth),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Overrides the inbound frame size limit.
    #[must_use]
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// The fan-out hub.
    #[must_use]
    pub const fn hub(&self) -> &Arc<Hub> {
        self.service.hub()
    }
}

enum Handshake {
    Verified(UserId),
    Rejected(String),
    Closed,
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for `Authenticate` and verify the token.
/// 2. Register with the hub (joining the user room) and send `Authenticated`.
/// 3. Serve `SubscribeLists` and `Request` frames until the socket closes.
/// 4. Disconnect from the hub, dropping every room membership.
pub async fn handle_socket<S: Store>(socket: WebSocket, state: Arc<HubState<S>>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user_id = match wait_for_authenticate(&mut ws_receiver, state.auth.as_ref()).await {
        Handshake::Verified(user_id) => user_id,
        Handshake::Rejected(reason) => {
            tracing::warn!(reason = %reason, "handshake rejected");
            let _ = send_hub_msg(&mut ws_sender, &HubMessage::Error { reason }).await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
        Handshake::Closed => {
            tracing::debug!("connection closed before authentication");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let conn = state.hub().connect(user_id.clone(), tx.clone()).await;

    // Sent directly so it precedes anything already queued by the hub.
    let ack = HubMessage::Authenticated {
        user_id: user_id.clone(),
    };
    if let Err(e) = send_hub_msg(&mut ws_sender, &ack).await {
        tracing::error!(user = %user_id, error = %e, "failed to send Authenticated");
        state.hub().disconnect(conn).await;
        return;
    }
    tracing::info!(user = %user_id, conn = conn, "connection authenticated");

    let writer_conn = conn;
    let mut write_task = tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Frame(msg) => {
                    if let Err(e) = send_hub_msg(&mut ws_sender, &msg).await {
                        tracing::warn!(conn = writer_conn, error = %e, "WebSocket write failed");
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_user = user_id.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_frame(conn, &reader_user, &data, &reader_state, &tx).await;
                }
                Message::Close(_) => {
                    tracing::debug!(conn = conn, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.hub().disconnect(conn).await;
    tracing::info!(user = %user_id, conn = conn, "connection closed");
}

/// Waits for the first binary frame, expecting `Authenticate`.
async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    auth: &dyn Authenticator,
) -> Handshake {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match wire::decode(&data) {
                    Ok(HubMessage::Authenticate { token }) => auth
                        .verify(&token)
                        .map_or_else(
                            || Handshake::Rejected("invalid token".to_string()),
                            Handshake::Verified,
                        ),
                    Ok(_) => Handshake::Rejected("expected Authenticate".to_string()),
                    Err(e) => Handshake::Rejected(e.to_string()),
                };
            }
            Message::Close(_) => return Handshake::Closed,
            _ => {}
        }
    }
    Handshake::Closed
}

/// Handles one binary frame from an authenticated connection.
async fn handle_frame<S: Store>(
    conn: ConnId,
    user_id: &UserId,
    data: &[u8],
    state: &HubState<S>,
    tx: &mpsc::UnboundedSender<Outbound>,
) {
    if data.len() > state.max_frame_size {
        tracing::warn!(
            conn = conn,
            size = data.len(),
            max = state.max_frame_size,
            "frame exceeds size limit"
        );
        reply(
            tx,
            HubMessage::Error {
                reason: format!(
                    "frame too large: {} bytes (max {})",
                    data.len(),
                    state.max_frame_size
                ),
            },
        );
        return;
    }

    let msg = match wire::decode(data) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(conn = conn, error = %e, "failed to decode frame");
            reply(
                tx,
                HubMessage::Error {
                    reason: e.to_string(),
                },
            );
            return;
        }
    };

    match msg {
        HubMessage::SubscribeLists {
            request_id,
            list_ids,
        } => {
            let diff = match state.service.subscribe(conn, user_id, &list_ids).await {
                Ok(diff) => {
                    tracing::debug!(
                        conn = conn,
                        joined = diff.joined.len(),
                        left = diff.left.len(),
                        "subscriptions updated"
                    );
                    diff
                }
                Err(e) => {
                    tracing::error!(conn = conn, error = %e, "subscription check failed");
                    SubscriptionDiff::default()
                }
            };
            reply(
                tx,
                HubMessage::Subscribed {
                    request_id,
                    joined: diff.joined,
                    left: diff.left,
                },
            );
        }
        HubMessage::Request { request_id, op } => {
            let name = op.name();
            let outcome = match state.service.execute(Some(user_id), op).await {
                Ok(payload) => Outcome::Ok(payload),
                Err(e) => {
                    tracing::debug!(conn = conn, op = name, error = %e, "request failed");
                    Outcome::Err(e.to_failure())
                }
            };
            reply(
                tx,
                HubMessage::Response {
                    request_id,
                    outcome,
                },
            );
        }
        HubMessage::Authenticate { .. } => {
            tracing::warn!(conn = conn, "duplicate Authenticate");
            reply(
                tx,
                HubMessage::Error {
                    reason: "already authenticated".to_string(),
                },
            );
        }
        other => {
            tracing::warn!(conn = conn, msg = ?other, "unexpected message type from client");
            reply(
                tx,
                HubMessage::Error {
                    reason: "unexpected message".to_string(),
                },
            );
        }
    }
}

fn reply(tx: &mpsc::UnboundedSender<Outbound>, msg: HubMessage) {
    let _ = tx.send(Outbound::Frame(msg));
}

/// Encodes and sends a hub message directly on a WebSocket sender.
async fn send_hub_msg(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &HubMessage,
) -> Result<(), String> {
    let bytes = wire::encode(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts a hub backed by a fresh [`MemoryStore`] and returns the bound
/// address, the state, and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    auth: impl Authenticator,
) -> Result<
    (
        std::net::SocketAddr,
        Arc<HubState<MemoryStore>>,
        tokio::task::JoinHandle<()>,
    ),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let service = Service::new(Arc::new(MemoryStore::new()), Arc::new(Hub::new()));
    let state = Arc::new(HubState::new(service, auth));
    let (bound_addr, handle) = start_server_with_state(addr, Arc::clone(&state)).await?;
    Ok((bound_addr, state, handle))
}

/// Starts the hub with pre-built state.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<S: Store>(
    addr: &str,
    state: Arc<HubState<S>>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler::<S>))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler<S: Store>(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<HubState<S>>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
