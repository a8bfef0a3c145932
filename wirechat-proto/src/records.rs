//! REST records served next to the socket: message history and user list.
//!
//! Field names follow the server's persistence models, which mix upper-case
//! model columns (`ID`, `CreatedAt`, `Name`) with lower-case message columns.

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, MessageKind, UserId};

/// Standard response wrapper: `{"message": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Human-readable status text.
    #[serde(default)]
    pub message: String,
    /// Payload; absent on most error responses.
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Wraps `data` with an `ok` status message.
    pub fn ok(data: T) -> Self {
        Self {
            message: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// A stored message as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Persistent id (also the wire `id`).
    #[serde(rename = "ID")]
    pub id: u64,
    /// Creation time (RFC 3339).
    #[serde(rename = "CreatedAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Sender.
    #[serde(default)]
    pub from: u64,
    /// Recipient (0 when the message targeted a room).
    #[serde(default)]
    pub to: u64,
    /// Room name, empty for direct messages.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub room: String,
    /// Frame kind the message was sent with.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Payload text.
    #[serde(default)]
    pub body: String,
    /// Whether the recipient acknowledged delivery.
    #[serde(default)]
    pub delivered: bool,
}

impl HistoryRecord {
    /// Builds a record from an authoritative message.
    ///
    /// Returns `None` for provisional messages, which are never persisted.
    #[must_use]
    pub fn from_message(message: &Message, created_at: Option<String>) -> Option<Self> {
        let id = message.id?;
        Some(Self {
            id: id.get(),
            created_at,
            from: message.from.map_or(0, UserId::get),
            to: message.to.map_or(0, UserId::get),
            room: message.room_id.clone().unwrap_or_default(),
            kind: message.kind,
            body: message.body.clone(),
            delivered: false,
        })
    }

    /// Converts the record into the wire message shape.
    #[must_use]
    pub fn into_message(self) -> Message {
        let nonzero = |v: u64| (v != 0).then_some(v);
        Message {
            kind: self.kind,
            from: nonzero(self.from).map(UserId::new),
            to: nonzero(self.to).map(UserId::new),
            id: nonzero(self.id).map(MessageId::new),
            room_id: (!self.room.is_empty()).then_some(self.room),
            body: self.body,
        }
    }
}

/// A participant as listed by the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Participant id.
    #[serde(rename = "ID")]
    pub id: UserId,
    /// Display name; may be empty.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Avatar location, if the user uploaded one.
    #[serde(rename = "AvatarURL", default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UserRecord {
    /// Name to show for this user, falling back to `user:<id>`.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("user:{}", self.id)
        } else {
            self.name.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_envelope_parses_server_shape() {
        let json = r#"{
            "message": "ok",
            "data": [
                {"ID": 3, "CreatedAt": "2024-05-01T10:00:00Z", "UpdatedAt": "2024-05-01T10:00:00Z",
                 "DeletedAt": null, "from": 5, "to": 9, "type": "message", "body": "hi",
                 "delivered": true, "delivered_at": null}
            ]
        }"#;
        let env: ApiEnvelope<Vec<HistoryRecord>> = serde_json::from_str(json).unwrap();
        let records = env.data.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].delivered);
        let msg = records[0].clone().into_message();
        assert_eq!(
            msg,
            Message::authoritative(MessageId::new(3), UserId::new(5), UserId::new(9), "hi")
        );
    }

    #[test]
    fn error_envelope_has_no_data() {
        let env: ApiEnvelope<Vec<HistoryRecord>> =
            serde_json::from_str(r#"{"message":"user_id and with are required"}"#).unwrap();
        assert!(env.data.is_none());
    }

    #[test]
    fn provisional_messages_have_no_record() {
        let msg = Message::provisional(UserId::new(1), UserId::new(2), "x");
        assert!(HistoryRecord::from_message(&msg, None).is_none());
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let user: UserRecord = serde_json::from_str(r#"{"ID": 12, "Name": ""}"#).unwrap();
        assert_eq!(user.display_name(), "user:12");
        let named: UserRecord = serde_json::from_str(r#"{"ID": 1, "Name": "ann"}"#).unwrap();
        assert_eq!(named.display_name(), "ann");
    }
}
