//! Per-conversation timelines merged from history, live frames and
//! optimistic sends.
//!
//! Every message is filed under its conversation peer: the participant that
//! is not the local user. Each timeline keeps a dedup index of
//! [`IdentityKey`]s so the same exchange never appears twice, whether it
//! arrives once from history, again from a live redelivery, or first as an
//! optimistic local insert that the server later confirms.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};
use wirechat_proto::message::{IdentityKey, Message, MessageId, MessageKind, UserId};

/// What [`ReconciliationStore::apply_incoming`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Added as a new entry.
    Appended,
    /// Replaced a matching provisional entry with the authoritative copy.
    Reconciled,
    /// Already present; nothing changed.
    Duplicate,
    /// No conversation peer could be determined; dropped.
    Unroutable,
    /// Not a chat message (ack, join, unknown kind); not stored.
    Ignored,
}

impl Applied {
    /// Whether the timeline changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::Appended | Self::Reconciled)
    }
}

/// Delivery progress of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Local only, not yet confirmed by the server.
    Pending,
    /// Stored by the server.
    Sent,
    /// Stored and acknowledged as delivered to the recipient.
    Delivered,
}

impl DeliveryState {
    /// Short marker for line-mode display.
    #[must_use]
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Pending => "…",
            Self::Sent => "✓",
            Self::Delivered => "✓✓",
        }
    }
}

#[derive(Debug, Default)]
struct Timeline {
    messages: Vec<Message>,
    seen: HashSet<IdentityKey>,
}

impl Timeline {
    fn push(&mut self, message: Message) -> bool {
        if self.seen.insert(message.identity_key()) {
            self.messages.push(message);
            true
        } else {
            false
        }
    }

    fn find_by_id(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == Some(id))
    }

    /// Remove the first provisional entry with the same content as `message`.
    fn take_provisional(&mut self, message: &Message) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|m| !m.is_authoritative() && m.same_content(message))?;
        let removed = self.messages.remove(index);
        self.seen.remove(&removed.identity_key());
        Some(removed)
    }
}

/// In-memory message timelines for one local user.
#[derive(Debug)]
pub struct ReconciliationStore {
    local: UserId,
    timelines: HashMap<UserId, Timeline>,
    delivered: HashSet<MessageId>,
}

impl ReconciliationStore {
    /// Empty store for `local`.
    #[must_use]
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            timelines: HashMap::new(),
            delivered: HashSet::new(),
        }
    }

    /// The user this store files conversations for.
    #[must_use]
    pub const fn local_user(&self) -> UserId {
        self.local
    }

    /// The participant of `message` that is not the local user.
    #[must_use]
    pub fn peer_of(&self, message: &Message) -> Option<UserId> {
        match message.from {
            Some(from) if from == self.local => message.to,
            Some(from) => Some(from),
            None => message.to.filter(|to| *to != self.local),
        }
    }

    /// Replace the timeline for `peer` with `messages`, in order.
    ///
    /// Provisional entries that are not part of `messages` are dropped. When
    /// `messages` repeats an id, the first copy wins.
    pub fn load_history(&mut self, peer: UserId, messages: impl IntoIterator<Item = Message>) {
        let mut timeline = Timeline::default();
        let mut skipped = 0_usize;
        for message in messages {
            if !timeline.push(message) {
                skipped += 1;
            }
        }
        debug!(
            peer = %peer,
            loaded = timeline.messages.len(),
            skipped,
            "history loaded"
        );
        self.timelines.insert(peer, timeline);
    }

    /// Insert a locally originated message before the server confirms it.
    ///
    /// An identical provisional message already in the timeline absorbs this
    /// one.
    pub fn apply_optimistic(
        &mut self,
        local_sender: UserId,
        peer: UserId,
        body: impl Into<String>,
    ) -> Message {
        let message = Message::provisional(local_sender, peer, body);
        let timeline = self.timelines.entry(peer).or_default();
        if !timeline.push(message.clone()) {
            debug!(peer = %peer, "identical provisional message collapsed");
        }
        message
    }

    /// Merge a message received from the server.
    pub fn apply_incoming(&mut self, message: Message) -> Applied {
        if message.kind != MessageKind::Message {
            return Applied::Ignored;
        }
        let Some(peer) = self.peer_of(&message) else {
            warn!(key = %message.identity_key(), "message has no conversation peer, dropping");
            return Applied::Unroutable;
        };
        let timeline = self.timelines.entry(peer).or_default();

        let Some(id) = message.id else {
            return if timeline.push(message) {
                Applied::Appended
            } else {
                Applied::Duplicate
            };
        };

        if timeline.seen.contains(&IdentityKey::Id(id)) {
            if let Some(stored) = timeline.find_by_id(id) {
                if stored.body != message.body {
                    warn!(id = %id, "redelivered message changed its body, keeping stored copy");
                }
            }
            return Applied::Duplicate;
        }

        let reconciled = timeline.take_provisional(&message).is_some();
        timeline.push(message);
        if reconciled {
            Applied::Reconciled
        } else {
            Applied::Appended
        }
    }

    /// Record a delivery acknowledgment. Returns `false` if already known.
    pub fn apply_ack(&mut self, id: MessageId) -> bool {
        self.delivered.insert(id)
    }

    /// Delivery progress of `message`.
    #[must_use]
    pub fn delivery_state(&self, message: &Message) -> DeliveryState {
        match message.id {
            None => DeliveryState::Pending,
            Some(id) if self.delivered.contains(&id) => DeliveryState::Delivered,
            Some(_) => DeliveryState::Sent,
        }
    }

    /// Snapshot of the timeline for `peer`.
    #[must_use]
    pub fn timeline_for(&self, peer: UserId) -> Vec<Message> {
        self.timelines
            .get(&peer)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    /// Peers that have a timeline, in ascending id order.
    #[must_use]
    pub fn peers(&self) -> Vec<UserId> {
        let mut peers: Vec<UserId> = self.timelines.keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    /// Drop the timeline for `peer`. Returns whether one existed.
    pub fn forget(&mut self, peer: UserId) -> bool {
        self.timelines.remove(&peer).is_some()
    }
}
