//! WebSocket client for the `TaskShare` hub.
//!
//! [`HubClient::connect`] opens the socket, performs the `Authenticate`
//! handshake, and spawns a background reader. Requests and subscription
//! announcements are matched to their replies by `request_id`; pushed events
//! are queued for [`HubClient::next_event`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use taskshare_proto::ids::{ListId, UserId};
use taskshare_proto::wire::{
    self, Failure, HubEvent, HubMessage, Operation, Outcome, Payload, WireError,
};

type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

type PendingRequests = parking_lot::Mutex<HashMap<u64, oneshot::Sender<Outcome>>>;

type PendingAcks = parking_lot::Mutex<HashMap<u64, oneshot::Sender<SubscriptionAck>>>;

/// Errors returned by [`HubClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting, authenticating or waiting for a reply took too long.
    #[error("timed out waiting for the hub")]
    Timeout,

    /// The connection to the hub is gone.
    #[error("connection to the hub closed")]
    ConnectionClosed,

    /// The WebSocket connection could not be established.
    #[error("failed to connect to hub: {0}")]
    Connect(String),

    /// The hub refused the token.
    #[error("hub rejected authentication: {0}")]
    Rejected(String),

    /// The hub sent something out of protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The hub processed the request and refused it.
    #[error("request failed: {0}")]
    Failed(Failure),

    /// The hub URL is not a `ws://` or `wss://` URL.
    #[error("invalid hub URL: {0}")]
    InvalidUrl(String),
}

/// Timeouts applied by [`HubClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Limit for the WebSocket connect plus authentication.
    pub connect_timeout: Duration,
    /// Limit for each request or subscription round trip.
    pub request_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// The hub's answer to a `SubscribeLists` announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionAck {
    /// Rooms newly joined.
    pub joined: Vec<ListId>,
    /// Rooms left.
    pub left: Vec<ListId>,
}

/// State shared between the client handle and its reader task.
struct Shared {
    pending: PendingRequests,
    acks: PendingAcks,
    connected: AtomicBool,
}

/// An authenticated connection to the hub.
pub struct HubClient {
    user_id: UserId,
    ws_sender: Mutex<WsSender>,
    events: Mutex<mpsc::UnboundedReceiver<HubEvent>>,
    shared: Arc<Shared>,
    next_request: AtomicU64,
    request_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl HubClient {
    /// Connects to `hub_url` and authenticates with `token`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidUrl`] if `hub_url` is not a WebSocket URL.
    /// - [`ClientError::Timeout`] if connecting or authenticating times out.
    /// - [`ClientError::Connect`] if the socket cannot be opened.
    /// - [`ClientError::Rejected`] if the hub refuses the token.
    pub async fn connect(
        hub_url: &str,
        token: &str,
        options: ConnectOptions,
    ) -> Result<Self, ClientError> {
        validate_url(hub_url)?;

        let handshake = async {
            let (ws_stream, _response) = connect_async(hub_url).await.map_err(|e| {
                tracing::warn!(url = hub_url, err = %e, "hub WebSocket connect failed");
                map_ws_connect_error(e)
            })?;
            let (mut ws_sender, mut ws_reader) = ws_stream.split();

            let hello = wire::encode(&HubMessage::Authenticate {
                token: token.to_string(),
            })?;
            ws_sender
                .send(Message::Binary(hello.into()))
                .await
                .map_err(|_| ClientError::ConnectionClosed)?;

            let user_id = await_authenticated(&mut ws_reader).await?;
            Ok::<_, ClientError>((user_id, ws_sender, ws_reader))
        };

        let (user_id, ws_sender, ws_reader) =
            tokio::time::timeout(options.connect_timeout, handshake)
                .await
                .map_err(|_| {
                    tracing::warn!(url = hub_url, "hub connect timed out");
                    ClientError::Timeout
                })??;
        tracing::info!(user_id = %user_id, url = hub_url, "authenticated with hub");

        let shared = Arc::new(Shared {
            pending: parking_lot::Mutex::new(HashMap::new()),
            acks: parking_lot::Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
        });
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader_handle = tokio::spawn(reader_loop(ws_reader, event_tx, Arc::clone(&shared)));

        Ok(Self {
            user_id,
            ws_sender: Mutex::new(ws_sender),
            events: Mutex::new(event_rx),
            shared,
            next_request: AtomicU64::new(1),
            request_timeout: options.request_timeout,
            reader_handle,
        })
    }

    /// The user the hub authenticated this connection as.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Whether the reader still sees an open connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Performs one operation and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Failed`] with the hub's typed failure when the
    /// operation is refused, or a transport error if no outcome arrives.
    pub async fn request(&self, op: Operation) -> Result<Payload, ClientError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(request_id, tx);

        tracing::debug!(request_id, op = op.name(), "sending request");
        if let Err(e) = self.send(&HubMessage::Request { request_id, op }).await {
            self.shared.pending.lock().remove(&request_id);
            return Err(e);
        }

        let outcome = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&request_id);
                return Err(ClientError::Timeout);
            }
        };
        Result::<Payload, Failure>::from(outcome).map_err(ClientError::Failed)
    }

    /// Announces the full set of list rooms this client wants to be in.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the hub does not acknowledge in time.
    pub async fn subscribe(
        &self,
        list_ids: impl IntoIterator<Item = ListId>,
    ) -> Result<SubscriptionAck, ClientError> {
        let list_ids: Vec<ListId> = list_ids.into_iter().collect();
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.acks.lock().insert(request_id, tx);

        tracing::debug!(request_id, lists = list_ids.len(), "announcing subscriptions");
        let msg = HubMessage::SubscribeLists {
            request_id,
            list_ids,
        };
        if let Err(e) = self.send(&msg).await {
            self.shared.acks.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.shared.acks.lock().remove(&request_id);
                Err(ClientError::Timeout)
            }
        }
    }

    /// Waits for the next pushed event.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] once the connection is gone
    /// and every queued event has been taken.
    pub async fn next_event(&self) -> Result<HubEvent, ClientError> {
        let mut rx = self.events.lock().await;
        rx.recv().await.ok_or(ClientError::ConnectionClosed)
    }

    /// Closes the connection.
    pub async fn close(&self) {
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.close().await {
            tracing::debug!(err = %e, "error while closing hub connection");
        }
        self.shared.connected.store(false, Ordering::Relaxed);
    }

    async fn send(&self, msg: &HubMessage) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::ConnectionClosed);
        }
        let bytes = wire::encode(msg)?;
        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "hub send failed");
                self.shared.connected.store(false, Ordering::Relaxed);
                ClientError::ConnectionClosed
            })
    }
}

impl Drop for HubClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Reads frames until the hub answers the handshake.
async fn await_authenticated(ws_reader: &mut WsReader) -> Result<UserId, ClientError> {
    loop {
        match ws_reader.next().await {
            Some(Ok(Message::Binary(data))) => match wire::decode(&data)? {
                HubMessage::Authenticated { user_id } => return Ok(user_id),
                HubMessage::Error { reason } => {
                    tracing::warn!(reason = %reason, "hub rejected authentication");
                    return Err(ClientError::Rejected(reason));
                }
                other => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected message during handshake: {other:?}"
                    )));
                }
            },
            Some(Ok(Message::Close(_))) | None => return Err(ClientError::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ClientError::Connect(e.to_string())),
        }
    }
}

/// Background task that routes incoming frames.
///
/// Malformed frames are logged and skipped. On exit every waiter is dropped so
/// callers see [`ClientError::ConnectionClosed`] instead of a timeout.
async fn reader_loop(
    mut ws_reader: WsReader,
    events: mpsc::UnboundedSender<HubEvent>,
    shared: Arc<Shared>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match wire::decode(&data) {
                Ok(HubMessage::Response {
                    request_id,
                    outcome,
                }) => {
                    let waiter = shared.pending.lock().remove(&request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(outcome);
                        }
                        None => tracing::debug!(request_id, "response for unknown request"),
                    }
                }
                Ok(HubMessage::Subscribed {
                    request_id,
                    joined,
                    left,
                }) => {
                    let waiter = shared.acks.lock().remove(&request_id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(SubscriptionAck { joined, left });
                        }
                        None => tracing::debug!(request_id, "ack for unknown announcement"),
                    }
                }
                Ok(HubMessage::Event(event)) => {
                    tracing::debug!(event = event.name(), "hub event");
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Ok(HubMessage::Error { reason }) => {
                    tracing::warn!(reason = %reason, "hub reported error");
                }
                Ok(other) => tracing::debug!(?other, "unexpected hub message"),
                Err(e) => tracing::warn!(err = %e, "malformed hub frame, skipping"),
            },
            Ok(Message::Close(_)) => {
                tracing::info!("hub closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "hub WebSocket read error");
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
    shared.pending.lock().clear();
    shared.acks.lock().clear();
    tracing::info!("hub reader task exiting");
}

/// Checks that `hub_url` parses and uses a WebSocket scheme.
///
/// # Errors
///
/// Returns [`ClientError::InvalidUrl`] otherwise.
pub fn validate_url(hub_url: &str) -> Result<(), ClientError> {
    let parsed =
        url::Url::parse(hub_url).map_err(|e| ClientError::InvalidUrl(format!("{hub_url}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(ClientError::InvalidUrl(format!(
            "{hub_url}: unsupported scheme {other}"
        ))),
    }
}

fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ClientError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => {
            ClientError::Connect(format!("hub HTTP error: status {}", response.status()))
        }
        WsError::Url(e) => ClientError::InvalidUrl(e.to_string()),
        other => ClientError::Connect(other.to_string()),
    }
}
