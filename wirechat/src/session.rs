//! Session coordinator: one identity, one connection, one store.
//!
//! [`SessionCoordinator`] opens a [`ConnectionManager`] when a user signs in,
//! replaces it whenever the identity changes, and feeds inbound frames into
//! the [`ReconciliationStore`]. The caller drives it from a single task by
//! awaiting [`SessionCoordinator::next_update`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use wirechat_proto::codec::{self, CodecError};
use wirechat_proto::message::{Message, MessageId, MessageKind, UserId};
use wirechat_proto::records::UserRecord;

use crate::api::{ApiError, ChatApi};
use crate::chat::{Applied, DeliveryState, ReconciliationStore};
use crate::config::ReconnectConfig;
use crate::connection::{
    ChannelObserver, ConnectionError, ConnectionEvent, ConnectionManager, ConnectionSnapshot,
    Endpoint, Identity,
};
use crate::transport::{Connector, TransportError};

/// Errors from coordinator operations that need a signed-in session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No identity is signed in.
    #[error("not signed in")]
    NotSignedIn,

    /// The local user id is not known yet.
    #[error("local user id is unknown")]
    UnknownLocalUser,

    /// No conversation is selected.
    #[error("no peer selected")]
    NoPeerSelected,

    /// Nothing to send.
    #[error("message body is empty")]
    EmptyMessage,

    /// The connection could not be opened.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A frame could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The REST collaborator failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Connectivity as presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No identity.
    SignedOut,
    /// Dialing the server.
    Connecting,
    /// Link is open.
    Connected,
    /// Link is down; a reconnect may be pending.
    Disconnected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SignedOut => "signed out",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// What changed after one connection event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Connectivity changed.
    Status(SessionStatus),
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Attempt number.
        attempt: u32,
        /// Time until the attempt.
        delay: Duration,
    },
    /// A chat message was merged into a timeline.
    Message {
        /// Conversation the message belongs to, if it could be routed.
        peer: Option<UserId>,
        /// What the store did with it.
        applied: Applied,
    },
    /// The server confirmed delivery of a message.
    Delivered(MessageId),
    /// A frame could not be decoded and was dropped.
    MalformedFrame(String),
    /// A transport problem was reported.
    TransportError(TransportError),
}

struct ActiveSession<C: Connector> {
    identity: Identity,
    manager: ConnectionManager<C>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    store: Option<ReconciliationStore>,
    status: SessionStatus,
}

/// Binds a connection manager to the signed-in identity and selected peer.
pub struct SessionCoordinator<C: Connector> {
    connector: Arc<C>,
    endpoint: Endpoint,
    reconnect: ReconnectConfig,
    history_limit: u32,
    active: Option<ActiveSession<C>>,
    peer: Option<UserId>,
}

impl<C: Connector> SessionCoordinator<C> {
    /// Signed-out coordinator for `endpoint`.
    #[must_use]
    pub fn new(connector: Arc<C>, endpoint: Endpoint, reconnect: ReconnectConfig) -> Self {
        Self {
            connector,
            endpoint,
            reconnect,
            history_limit: 50,
            active: None,
            peer: None,
        }
    }

    /// Use `limit` for history fetches.
    #[must_use]
    pub const fn with_history_limit(mut self, limit: u32) -> Self {
        self.history_limit = limit;
        self
    }

    /// Sign in as `identity`, replacing any existing session.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connection`] if the target URL is invalid.
    pub fn sign_in(&mut self, identity: Identity) -> Result<(), SessionError> {
        self.sign_out();

        let manager = ConnectionManager::new(Arc::clone(&self.connector), self.reconnect.clone());
        let (observer, events) = ChannelObserver::new();
        manager.register(Arc::new(observer));
        manager.open(&self.endpoint, &identity)?;

        info!(user_id = ?identity.user_id, token = identity.token.is_some(), "signed in");
        self.active = Some(ActiveSession {
            store: identity.user_id.map(ReconciliationStore::new),
            identity,
            manager,
            events,
            status: SessionStatus::Connecting,
        });
        Ok(())
    }

    /// Look up the local user through `api` when only a token is known.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotSignedIn`] without a session, or the API
    /// error if the lookup fails.
    pub async fn resolve_local_user(&mut self, api: &impl ChatApi) -> Result<UserId, SessionError> {
        let active = self.active.as_mut().ok_or(SessionError::NotSignedIn)?;
        if let Some(user_id) = active.identity.user_id {
            return Ok(user_id);
        }
        let user = api.current_user().await?;
        info!(user_id = %user.id, "resolved local user");
        active.identity.user_id = Some(user.id);
        active.store = Some(ReconciliationStore::new(user.id));
        Ok(user.id)
    }

    /// Close the connection and forget the session.
    pub fn sign_out(&mut self) {
        if let Some(active) = self.active.take() {
            active.manager.close();
            info!("signed out");
        }
        self.peer = None;
    }

    /// Current connectivity.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.active
            .as_ref()
            .map_or(SessionStatus::SignedOut, |a| a.status)
    }

    /// Connection manager snapshot, if signed in.
    #[must_use]
    pub fn connection(&self) -> Option<ConnectionSnapshot> {
        self.active.as_ref().map(|a| a.manager.snapshot())
    }

    /// The signed-in identity.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.active.as_ref().map(|a| &a.identity)
    }

    /// The local user id, once known.
    #[must_use]
    pub fn local_user(&self) -> Option<UserId> {
        self.active.as_ref().and_then(|a| a.identity.user_id)
    }

    /// Switch the active conversation. Other timelines are kept.
    pub fn select_peer(&mut self, peer: UserId) {
        debug!(peer = %peer, "peer selected");
        self.peer = Some(peer);
    }

    /// The active conversation.
    #[must_use]
    pub const fn selected_peer(&self) -> Option<UserId> {
        self.peer
    }

    /// Timeline of the selected peer with delivery state.
    #[must_use]
    pub fn timeline(&self) -> Vec<(Message, DeliveryState)> {
        let (Some(store), Some(peer)) = (self.store(), self.peer) else {
            return Vec::new();
        };
        store
            .timeline_for(peer)
            .into_iter()
            .map(|m| {
                let state = store.delivery_state(&m);
                (m, state)
            })
            .collect()
    }

    /// Peers with a local timeline, in ascending id order.
    #[must_use]
    pub fn conversations(&self) -> Vec<UserId> {
        self.store().map(ReconciliationStore::peers).unwrap_or_default()
    }

    /// Discard the local timeline for `peer`. The next history fetch
    /// rebuilds it from the server.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no session or local user.
    pub fn forget_peer(&mut self, peer: UserId) -> Result<bool, SessionError> {
        let forgotten = self.store_mut()?.forget(peer);
        debug!(peer = %peer, forgotten, "conversation discarded");
        Ok(forgotten)
    }

    /// Read access to the store, once the local user is known.
    #[must_use]
    pub fn store(&self) -> Option<&ReconciliationStore> {
        self.active.as_ref().and_then(|a| a.store.as_ref())
    }

    /// Reload the selected peer's timeline from the server.
    ///
    /// A failed fetch is logged and yields an empty list; the stored
    /// timeline is left as it was.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no session, local user or peer.
    pub async fn refresh_history(&mut self, api: &impl ChatApi) -> Result<Vec<Message>, SessionError> {
        let peer = self.peer.ok_or(SessionError::NoPeerSelected)?;
        let limit = self.history_limit;
        let store = self.store_mut()?;
        let me = store.local_user();

        let records = match api.fetch_history(me, peer, limit).await {
            Ok(records) => records,
            Err(e) => {
                warn!(peer = %peer, error = %e, "history fetch failed");
                return Ok(Vec::new());
            }
        };

        let mut messages = Vec::with_capacity(records.len());
        for record in records {
            let delivered = record.delivered;
            let message = record.into_message();
            if delivered {
                if let Some(id) = message.id {
                    store.apply_ack(id);
                }
            }
            messages.push(message);
        }
        store.load_history(peer, messages);
        Ok(store.timeline_for(peer))
    }

    /// Users other than the local one. A failed fetch yields an empty list.
    pub async fn list_peers(&self, api: &impl ChatApi) -> Vec<UserRecord> {
        match api.list_users().await {
            Ok(users) => {
                let me = self.local_user();
                users.into_iter().filter(|u| Some(u.id) != me).collect()
            }
            Err(e) => {
                warn!(error = %e, "user list fetch failed");
                Vec::new()
            }
        }
    }

    /// Send `body` to the selected peer.
    ///
    /// The message appears in the timeline immediately as provisional and
    /// goes to the wire now or after the next reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no session, local user or peer, or the
    /// body is blank.
    pub fn send(&mut self, body: &str) -> Result<Message, SessionError> {
        if body.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let peer = self.peer.ok_or(SessionError::NoPeerSelected)?;
        let active = self.active.as_mut().ok_or(SessionError::NotSignedIn)?;
        let store = active.store.as_mut().ok_or(SessionError::UnknownLocalUser)?;

        let frame = codec::encode(&Message::outbound(peer, body))?;
        let provisional = store.apply_optimistic(store.local_user(), peer, body);
        active.manager.send(frame);
        Ok(provisional)
    }

    /// Wait for the next connection event and apply it.
    ///
    /// Pends forever while signed out, so it can sit in a `select!`.
    /// Returns `None` if the event stream ended.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        let event = active.events.recv().await?;
        Some(self.apply_event(event))
    }

    /// Apply one connection event to the session.
    pub fn apply_event(&mut self, event: ConnectionEvent) -> SessionUpdate {
        let Some(active) = self.active.as_mut() else {
            return SessionUpdate::Status(SessionStatus::SignedOut);
        };
        match event {
            ConnectionEvent::Connecting { .. } => {
                active.status = SessionStatus::Connecting;
                SessionUpdate::Status(active.status)
            }
            ConnectionEvent::Open => {
                active.status = SessionStatus::Connected;
                SessionUpdate::Status(active.status)
            }
            ConnectionEvent::Closed { .. } => {
                active.status = SessionStatus::Disconnected;
                SessionUpdate::Status(active.status)
            }
            ConnectionEvent::ReconnectScheduled { attempt, delay } => {
                SessionUpdate::Reconnecting { attempt, delay }
            }
            ConnectionEvent::Error(error) => SessionUpdate::TransportError(error),
            ConnectionEvent::Message(frame) => match codec::decode(&frame) {
                Ok(message) => Self::apply_message(active, message),
                Err(e) => {
                    warn!(error = %e, "dropping malformed frame");
                    SessionUpdate::MalformedFrame(e.to_string())
                }
            },
        }
    }

    fn apply_message(active: &mut ActiveSession<C>, message: Message) -> SessionUpdate {
        let Some(store) = active.store.as_mut() else {
            debug!("message before local user is known, ignoring");
            return SessionUpdate::Message {
                peer: None,
                applied: Applied::Ignored,
            };
        };
        match (message.kind, message.id) {
            (MessageKind::Ack, Some(id)) => {
                store.apply_ack(id);
                SessionUpdate::Delivered(id)
            }
            _ => {
                let peer = store.peer_of(&message);
                let applied = store.apply_incoming(message);
                SessionUpdate::Message { peer, applied }
            }
        }
    }

    fn store_mut(&mut self) -> Result<&mut ReconciliationStore, SessionError> {
        self.active
            .as_mut()
            .ok_or(SessionError::NotSignedIn)?
            .store
            .as_mut()
            .ok_or(SessionError::UnknownLocalUser)
    }
}
