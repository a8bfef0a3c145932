//! In-memory persistence for the hub: the message log and the user
//! directory.
//!
//! The [`MessageLog`] assigns message ids in arrival order and answers
//! history queries between two users. The [`Directory`] knows every user
//! and the credential tokens issued to them.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use wirechat_proto::message::{Message, MessageId, UserId};
use wirechat_proto::records::{HistoryRecord, UserRecord};

/// Default number of messages returned by a history query.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Every chat message the hub has accepted, in id order.
pub struct MessageLog {
    records: RwLock<Vec<HistoryRecord>>,
    next_id: AtomicU64,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    /// Creates an empty log. The first id handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores `message` and returns it with its assigned id.
    pub async fn append(&self, message: &Message) -> Message {
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let stored = Message {
            id: Some(id),
            ..message.clone()
        };
        let created_at = chrono::Utc::now().to_rfc3339();
        if let Some(record) = HistoryRecord::from_message(&stored, Some(created_at)) {
            self.records.write().await.push(record);
        }
        stored
    }

    /// Marks `id` delivered. Returns `false` if the id is unknown.
    pub async fn mark_delivered(&self, id: MessageId) -> bool {
        let mut records = self.records.write().await;
        records
            .iter_mut()
            .find(|r| r.id == id.get())
            .map(|r| r.delivered = true)
            .is_some()
    }

    /// The latest `limit` messages exchanged between `a` and `b`, oldest first.
    pub async fn between(&self, a: UserId, b: UserId, limit: usize) -> Vec<HistoryRecord> {
        let (a, b) = (a.get(), b.get());
        let records = self.records.read().await;
        let matching: Vec<&HistoryRecord> = records
            .iter()
            .filter(|r| (r.from == a && r.to == b) || (r.from == b && r.to == a))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether nothing has been stored yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// Known users and the tokens that authenticate them.
#[derive(Default)]
pub struct Directory {
    users: RwLock<BTreeMap<UserId, UserRecord>>,
    tokens: RwLock<HashMap<String, UserId>>,
    issued: AtomicU64,
}

impl Directory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or renames a user.
    pub async fn add_user(&self, id: UserId, name: impl Into<String>) {
        let record = UserRecord {
            id,
            name: name.into(),
            avatar_url: None,
        };
        self.users.write().await.insert(id, record);
    }

    /// Makes sure `id` is listed, without touching an existing entry.
    pub async fn ensure_user(&self, id: UserId) {
        self.users.write().await.entry(id).or_insert_with(|| UserRecord {
            id,
            name: String::new(),
            avatar_url: None,
        });
    }

    /// Issues a new credential token for `id`.
    pub async fn issue_token(&self, id: UserId) -> String {
        let serial = self.issued.fetch_add(1, Ordering::SeqCst);
        let token = format!("wc-{id}-{serial:08x}");
        self.tokens.write().await.insert(token.clone(), id);
        self.ensure_user(id).await;
        token
    }

    /// Accepts a pre-shared `token` for `id`.
    pub async fn grant_token(&self, id: UserId, token: impl Into<String>) {
        self.tokens.write().await.insert(token.into(), id);
        self.ensure_user(id).await;
    }

    /// Resolves a token, accepting an optional `Bearer ` prefix.
    pub async fn authenticate(&self, token: &str) -> Option<UserId> {
        let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
        self.tokens.read().await.get(token).copied()
    }

    /// The record for `id`, if listed.
    pub async fn get(&self, id: UserId) -> Option<UserRecord> {
        self.users.read().await.get(&id).cloned()
    }

    /// Every listed user in id order.
    pub async fn list(&self) -> Vec<UserRecord> {
        self.users.read().await.values().cloned().collect()
    }
}
