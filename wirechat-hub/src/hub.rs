//! Hub server core: connection registry, message routing and the REST
//! endpoints served next to the socket.
//!
//! Each user may hold several WebSocket connections. A chat message is
//! stored (which assigns its id), delivered to every connection of the
//! recipient, echoed to the sender's connections, and acknowledged to the
//! sender once at least one recipient connection took it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use wirechat_proto::codec;
use wirechat_proto::message::{Message, MessageKind, UserId};
use wirechat_proto::records::{ApiEnvelope, HistoryRecord, UserRecord};

use crate::HubError;
use crate::store::{DEFAULT_HISTORY_LIMIT, Directory, MessageLog};

/// Default maximum inbound frame size in bytes (64 KB).
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

type Outbox = mpsc::UnboundedSender<WsMessage>;

/// Shared hub state: live connections, message log and user directory.
pub struct HubState {
    /// Per-user map of connection id to the writer channel of that socket.
    connections: RwLock<HashMap<UserId, HashMap<u64, Outbox>>>,
    next_connection: AtomicU64,
    /// Every accepted chat message.
    pub log: MessageLog,
    /// Known users and issued tokens.
    pub directory: Directory,
    max_frame_size: usize,
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

impl HubState {
    /// Creates an empty hub with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates an empty hub with a custom frame size limit.
    #[must_use]
    pub fn with_config(max_frame_size: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            log: MessageLog::new(),
            directory: Directory::new(),
            max_frame_size,
        }
    }

    /// Adds a connection for `user` and returns its id.
    pub async fn register(&self, user: UserId, outbox: Outbox) -> u64 {
        let id = self.next_connection.fetch_add(1, Ordering::SeqCst);
        let mut conns = self.connections.write().await;
        conns.entry(user).or_default().insert(id, outbox);
        id
    }

    /// Removes one connection of `user`.
    pub async fn unregister(&self, user: UserId, connection: u64) {
        let mut conns = self.connections.write().await;
        if let Some(set) = conns.get_mut(&user) {
            set.remove(&connection);
            if set.is_empty() {
                conns.remove(&user);
            }
        }
    }

    /// Number of live connections held by `user`.
    pub async fn connection_count(&self, user: UserId) -> usize {
        self.connections
            .read()
            .await
            .get(&user)
            .map_or(0, HashMap::len)
    }

    /// Writes `message` to every connection of `user`.
    ///
    /// Returns how many connections accepted it. Connections whose writer
    /// is gone are dropped from the registry.
    pub async fn deliver(&self, user: UserId, message: &Message) -> usize {
        let frame = match codec::encode(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound frame");
                return 0;
            }
        };

        let mut dead = Vec::new();
        let mut delivered = 0;
        if let Some(set) = self.connections.read().await.get(&user) {
            for (id, outbox) in set {
                if outbox.send(WsMessage::Text(frame.clone().into())).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            tracing::warn!(user = %user, connection = id, "dropping dead connection");
            self.unregister(user, id).await;
        }
        delivered
    }

    /// Writes `message` to every connection of every user.
    pub async fn broadcast(&self, message: &Message) -> usize {
        let users: Vec<UserId> = self.connections.read().await.keys().copied().collect();
        let mut delivered = 0;
        for user in users {
            delivered += self.deliver(user, message).await;
        }
        delivered
    }

    /// Send a WebSocket Close frame to every connection.
    ///
    /// Each writer task forwards the close, so clients see their link drop.
    /// Useful for graceful shutdown and for exercising client reconnects.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (user, set) in conns.iter() {
            tracing::info!(user = %user, connections = set.len(), "sending close frame");
            for outbox in set.values() {
                let _ = outbox.send(WsMessage::Close(None));
            }
        }
    }
}

/// Handles an upgraded WebSocket connection for an authenticated user.
pub async fn handle_socket(socket: WebSocket, state: Arc<HubState>, user: UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection = state.register(user, tx).await;
    tracing::info!(user = %user, connection, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Text(text) => handle_frame(user, text.as_str(), &reader_state).await,
                WsMessage::Binary(_) => {
                    tracing::warn!(user = %user, "ignoring binary frame");
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    state.unregister(user, connection).await;
    tracing::info!(user = %user, connection, "client disconnected");
}

/// Handles one text frame from `user`.
async fn handle_frame(user: UserId, frame: &str, state: &Arc<HubState>) {
    if frame.len() > state.max_frame_size {
        tracing::warn!(
            user = %user,
            size = frame.len(),
            max = state.max_frame_size,
            "frame exceeds size limit"
        );
        return;
    }

    let mut message = match codec::decode(frame) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "failed to decode frame");
            return;
        }
    };
    // The sender is whoever owns the socket, whatever the frame claims.
    message.from = Some(user);

    match message.kind {
        MessageKind::Message => route_message(state, user, message).await,
        MessageKind::Ack => {
            if let Some(id) = message.id {
                state.log.mark_delivered(id).await;
            }
        }
        MessageKind::Join | MessageKind::Leave => {
            tracing::debug!(user = %user, kind = %message.kind, "room membership not supported");
        }
        MessageKind::Unknown => {
            tracing::warn!(user = %user, "ignoring frame of unknown type");
        }
    }
}

/// Stores a chat message and fans it out.
async fn route_message(state: &Arc<HubState>, sender: UserId, message: Message) {
    let stored = state.log.append(&message).await;
    tracing::debug!(from = %sender, to = ?stored.to, id = ?stored.id, "routing message");

    let Some(recipient) = stored.to else {
        state.broadcast(&stored).await;
        return;
    };

    let delivered = state.deliver(recipient, &stored).await;
    if recipient != sender {
        state.deliver(sender, &stored).await;
    }
    if delivered == 0 {
        return;
    }
    if let Some(id) = stored.id {
        state.log.mark_delivered(id).await;
        state.deliver(sender, &Message::ack(id)).await;
    }
}

/// Error response carrying the standard envelope.
#[derive(Debug)]
pub struct Rejection {
    status: StatusCode,
    message: String,
}

impl Rejection {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of the rejection.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body: ApiEnvelope<()> = ApiEnvelope {
            message: self.message,
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Query parameters identifying a client.
#[derive(Debug, Default, Deserialize)]
pub struct IdentityParams {
    token: Option<String>,
    user_id: Option<String>,
}

/// Query parameters of the history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    user_id: Option<String>,
    with: Option<String>,
    limit: Option<String>,
}

/// Resolve the caller from the `Authorization` header, a `token` query
/// parameter, or a bare `user_id`, in that order.
async fn identify(
    state: &HubState,
    headers: &HeaderMap,
    params: &IdentityParams,
) -> Result<UserId, Rejection> {
    let header_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    if let Some(token) = header_token.or(params.token.as_deref().filter(|t| !t.is_empty())) {
        return state
            .directory
            .authenticate(token)
            .await
            .ok_or_else(|| Rejection::new(StatusCode::UNAUTHORIZED, "unauthorized: unknown token"));
    }

    let raw = params
        .user_id
        .as_deref()
        .ok_or_else(|| Rejection::new(StatusCode::BAD_REQUEST, "user_id or token required"))?;
    let user = parse_user(raw).ok_or_else(|| Rejection::new(StatusCode::BAD_REQUEST, "invalid user_id"))?;
    state.directory.ensure_user(user).await;
    Ok(user)
}

fn parse_user(raw: &str) -> Option<UserId> {
    raw.parse::<UserId>().ok().filter(|u| u.get() != 0)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<IdentityParams>,
    State(state): State<Arc<HubState>>,
) -> Response {
    match identify(&state, &headers, &params).await {
        Ok(user) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, user))
            .into_response(),
        Err(rejection) => {
            tracing::warn!(status = %rejection.status, reason = %rejection.message, "websocket rejected");
            rejection.into_response()
        }
    }
}

/// `GET /messages?user_id=<me>&with=<peer>&limit=<n>`.
///
/// # Errors
///
/// Returns a 400 rejection when `user_id` or `with` is missing or invalid.
pub async fn messages_handler(
    State(state): State<Arc<HubState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<ApiEnvelope<Vec<HistoryRecord>>>, Rejection> {
    let (Some(me), Some(with)) = (params.user_id.as_deref(), params.with.as_deref()) else {
        return Err(Rejection::new(
            StatusCode::BAD_REQUEST,
            "user_id and with are required",
        ));
    };
    let me = parse_user(me).ok_or_else(|| Rejection::new(StatusCode::BAD_REQUEST, "invalid user_id"))?;
    let with = parse_user(with).ok_or_else(|| Rejection::new(StatusCode::BAD_REQUEST, "invalid with"))?;
    let limit = params
        .limit
        .as_deref()
        .and_then(|l| l.parse::<usize>().ok())
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);

    Ok(Json(ApiEnvelope::ok(state.log.between(me, with, limit).await)))
}

/// `GET /userList`.
pub async fn user_list_handler(
    State(state): State<Arc<HubState>>,
) -> Json<ApiEnvelope<Vec<UserRecord>>> {
    Json(ApiEnvelope::ok(state.directory.list().await))
}

/// `GET /user/me`.
///
/// # Errors
///
/// Returns 401 when the caller cannot be identified, and 404 for an unknown
/// user.
pub async fn current_user_handler(
    State(state): State<Arc<HubState>>,
    headers: HeaderMap,
    Query(params): Query<IdentityParams>,
) -> Result<Json<ApiEnvelope<UserRecord>>, Rejection> {
    let user = identify(&state, &headers, &params)
        .await
        .map_err(|_| Rejection::new(StatusCode::UNAUTHORIZED, "unauthorized"))?;
    let record = state
        .directory
        .get(user)
        .await
        .ok_or_else(|| Rejection::new(StatusCode::NOT_FOUND, "failed to load user"))?;
    Ok(Json(ApiEnvelope::ok(record)))
}

/// Build the router serving the socket and the REST endpoints.
pub fn router(state: Arc<HubState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/messages", axum::routing::get(messages_handler))
        .route("/userList", axum::routing::get(user_list_handler))
        .route("/user/me", axum::routing::get(current_user_handler))
        .with_state(state)
}

/// Starts the hub on the given address and returns the bound address and a
/// join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(addr: &str) -> Result<(SocketAddr, JoinHandle<()>), HubError> {
    start_server_with_state(addr, Arc::new(HubState::new())).await
}

/// Starts the hub with a pre-configured [`HubState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<HubState>,
) -> Result<(SocketAddr, JoinHandle<()>), HubError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| HubError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr()?;
    let app = router(state);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "hub server error");
        }
    });

    Ok((bound_addr, handle))
}
