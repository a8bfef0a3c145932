//! Wire format message type for the `WireChat` protocol.
//!
//! A [`Message`] is a UTF-8 JSON object. The server encodes "unset" numeric
//! fields either by omitting them or by sending `0`; both decode to `None`
//! here so the rest of the client only ever sees one shape.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Identifies a chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Creates a user identifier from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Creates a message identifier from its numeric value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frame discriminator, carried on the wire as `"type"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A chat message between two participants.
    #[default]
    Message,
    /// Delivery acknowledgment for a previously sent message id.
    Ack,
    /// Room join request (reserved).
    Join,
    /// Room leave request (reserved).
    Leave,
    /// Any kind this client does not understand.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Message => "message",
            Self::Ack => "ack",
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A single frame exchanged with the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Frame discriminator.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Sender, populated by the server.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nonzero"
    )]
    pub from: Option<UserId>,
    /// Recipient.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nonzero"
    )]
    pub to: Option<UserId>,
    /// Server-assigned id; absent until the server has stored the message.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "nonzero"
    )]
    pub id: Option<MessageId>,
    /// Room the frame targets, if any.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty"
    )]
    pub room_id: Option<String>,
    /// Opaque text payload.
    #[serde(default)]
    pub body: String,
}

impl Message {
    /// Builds the frame a client puts on the wire for "send `body` to `to`".
    ///
    /// `from` and `id` are left for the server to fill in.
    #[must_use]
    pub fn outbound(to: UserId, body: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Message,
            from: None,
            to: Some(to),
            id: None,
            room_id: None,
            body: body.into(),
        }
    }

    /// Builds a locally-originated message that has not been confirmed yet.
    #[must_use]
    pub fn provisional(from: UserId, to: UserId, body: impl Into<String>) -> Self {
        Self {
            from: Some(from),
            ..Self::outbound(to, body)
        }
    }

    /// Builds an authoritative message as the server would deliver it.
    #[must_use]
    pub fn authoritative(id: MessageId, from: UserId, to: UserId, body: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            ..Self::provisional(from, to, body)
        }
    }

    /// Builds a delivery acknowledgment frame for `id`.
    #[must_use]
    pub const fn ack(id: MessageId) -> Self {
        Self {
            kind: MessageKind::Ack,
            from: None,
            to: None,
            id: Some(id),
            room_id: None,
            body: String::new(),
        }
    }

    /// Whether the server has assigned an id to this message.
    #[must_use]
    pub const fn is_authoritative(&self) -> bool {
        self.id.is_some()
    }

    /// Key used to decide whether two messages describe the same exchange.
    #[must_use]
    pub fn identity_key(&self) -> IdentityKey {
        self.id.map_or_else(
            || IdentityKey::Composite {
                from: self.from,
                to: self.to,
                body: self.body.clone(),
            },
            IdentityKey::Id,
        )
    }

    /// Whether `other` carries the same sender, recipient and body.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to && self.body == other.body
    }
}

/// Identity of a message inside a timeline.
///
/// Distinct provisional messages with the same sender, recipient and body map
/// to the same key and therefore collapse into one timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Authoritative identity.
    Id(MessageId),
    /// Provisional identity derived from content.
    Composite {
        /// Sender.
        from: Option<UserId>,
        /// Recipient.
        to: Option<UserId>,
        /// Payload text.
        body: String,
    },
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "id:{id}"),
            Self::Composite { from, to, body } => {
                let from = from.map_or_else(String::new, |u| u.to_string());
                let to = to.map_or_else(String::new, |u| u.to_string());
                write!(f, "{from}:{to}:{body}")
            }
        }
    }
}

fn nonzero<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<u64>,
{
    Ok(Option::<u64>::deserialize(deserializer)?
        .filter(|v| *v != 0)
        .map(T::from))
}

fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.filter(|s| !s.is_empty()))
}
