//! Line-mode front end: command parsing and rendering.
//!
//! Kept free of I/O so the binary stays a thin loop around
//! [`parse_command`] and the `render_*` functions.

use wirechat_proto::message::{Message, UserId};
use wirechat_proto::records::UserRecord;

use crate::chat::{Applied, DeliveryState};
use crate::session::{SessionStatus, SessionUpdate};

/// A line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/users`: list peers.
    Users,
    /// `/peer <id>`: switch conversation.
    Peer(UserId),
    /// `/history`: reload the current conversation.
    History,
    /// `/chats`: list conversations held locally.
    Chats,
    /// `/forget`: drop the local copy of the current conversation.
    Forget,
    /// `/status`: show connectivity.
    Status,
    /// `/help`: list commands.
    Help,
    /// `/quit`: leave.
    Quit,
    /// Anything else: a message for the selected peer.
    Send(String),
}

/// Why a line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// A `/word` that is not a command.
    #[error("unknown command /{0} (try /help)")]
    Unknown(String),

    /// `/peer` without an id.
    #[error("usage: /peer <user id>")]
    MissingPeer,

    /// `/peer` with something that is not a user id.
    #[error("not a user id: {0}")]
    InvalidPeer(String),
}

/// Help text printed by `/help`.
pub const HELP: &str = "\
/users        list people you can talk to
/peer <id>    switch to a conversation
/history      reload the current conversation
/chats        list conversations held locally
/forget       drop the local copy of the current conversation
/status       show connection status
/quit         exit
anything else is sent to the selected peer";

/// Parse one input line. Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands or a bad `/peer` argument.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

    let command = match name {
        "users" => Command::Users,
        "history" => Command::History,
        "chats" => Command::Chats,
        "forget" => Command::Forget,
        "status" => Command::Status,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "peer" => {
            let arg = arg.ok_or(CommandError::MissingPeer)?;
            let peer = arg
                .parse()
                .map_err(|_| CommandError::InvalidPeer(arg.to_string()))?;
            Command::Peer(peer)
        }
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// One timeline entry, e.g. `[12:01] you: hi ✓`.
#[must_use]
pub fn render_entry(message: &Message, state: DeliveryState, local: Option<UserId>, time: &str) -> String {
    let from = match message.from {
        Some(from) if Some(from) == local => "you".to_string(),
        Some(from) => from.to_string(),
        None => "?".to_string(),
    };
    format!("[{time}] {from}: {} {}", message.body, state.marker())
}

/// A whole timeline, oldest first.
#[must_use]
pub fn render_timeline(
    entries: &[(Message, DeliveryState)],
    local: Option<UserId>,
    time: &str,
) -> Vec<String> {
    entries
        .iter()
        .map(|(message, state)| render_entry(message, *state, local, time))
        .collect()
}

/// User list, one per line.
#[must_use]
pub fn render_users(users: &[UserRecord]) -> Vec<String> {
    if users.is_empty() {
        return vec!["(nobody else here)".to_string()];
    }
    users
        .iter()
        .map(|u| format!("{:>6}  {}", u.id, u.display_name()))
        .collect()
}

/// Notice for a session update that is not a timeline change.
///
/// Timeline changes return `None`; the caller re-renders the entry instead.
#[must_use]
pub fn render_update(update: &SessionUpdate) -> Option<String> {
    match update {
        SessionUpdate::Status(status) => Some(format!("-- {status}")),
        SessionUpdate::Reconnecting { attempt, delay } => Some(format!(
            "-- reconnecting in {:.1}s (attempt {attempt})",
            delay.as_secs_f64()
        )),
        SessionUpdate::Message {
            peer: None,
            applied: Applied::Unroutable,
        } => Some("-- dropped a message with no sender".to_string()),
        SessionUpdate::Message { .. } | SessionUpdate::Delivered(_) => None,
        SessionUpdate::MalformedFrame(_) => Some("-- ignored an unreadable frame".to_string()),
        SessionUpdate::TransportError(error) => Some(format!("-- {error}")),
    }
}

/// Conversation list for `/chats`, marking the selected one.
#[must_use]
pub fn render_conversations(peers: &[UserId], selected: Option<UserId>) -> Vec<String> {
    if peers.is_empty() {
        return vec!["(no conversations yet)".to_string()];
    }
    peers
        .iter()
        .map(|peer| {
            let mark = if Some(*peer) == selected { '*' } else { ' ' };
            format!("{mark} {peer}")
        })
        .collect()
}

/// Status line for `/status`.
#[must_use]
pub fn render_status(status: SessionStatus, peer: Option<UserId>, pending: usize) -> String {
    let peer = peer.map_or_else(|| "none".to_string(), |p| p.to_string());
    format!("status: {status}, peer: {peer}, queued: {pending}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wirechat_proto::message::MessageId;

    use super::*;

    #[test]
    fn plain_text_is_a_send() {
        assert_eq!(
            parse_command("  hello there ").unwrap(),
            Some(Command::Send("hello there".into()))
        );
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn commands_parse() {
        assert_eq!(parse_command("/users").unwrap(), Some(Command::Users));
        assert_eq!(parse_command("/history").unwrap(), Some(Command::History));
        assert_eq!(parse_command("/status").unwrap(), Some(Command::Status));
        assert_eq!(parse_command("/exit").unwrap(), Some(Command::Quit));
        assert_eq!(parse_command("/chats").unwrap(), Some(Command::Chats));
        assert_eq!(parse_command("/forget").unwrap(), Some(Command::Forget));
        assert_eq!(
            parse_command("/peer  42 ").unwrap(),
            Some(Command::Peer(UserId::new(42)))
        );
    }

    #[test]
    fn bad_commands_are_errors() {
        assert_eq!(parse_command("/nope"), Err(CommandError::Unknown("nope".into())));
        assert_eq!(parse_command("/peer"), Err(CommandError::MissingPeer));
        assert_eq!(
            parse_command("/peer bob"),
            Err(CommandError::InvalidPeer("bob".into()))
        );
    }

    #[test]
    fn entries_mark_own_messages_and_state() {
        let me = UserId::new(5);
        let pending = Message::provisional(me, UserId::new(9), "hi");
        assert_eq!(
            render_entry(&pending, DeliveryState::Pending, Some(me), "10:00"),
            "[10:00] you: hi …"
        );
        let theirs = Message::authoritative(MessageId::new(1), UserId::new(9), me, "yo");
        assert_eq!(
            render_entry(&theirs, DeliveryState::Delivered, Some(me), "10:01"),
            "[10:01] 9: yo ✓✓"
        );
    }

    #[test]
    fn updates_render_notices() {
        let update = SessionUpdate::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(2000),
        };
        assert_eq!(
            render_update(&update).as_deref(),
            Some("-- reconnecting in 2.0s (attempt 2)")
        );
        assert!(render_update(&SessionUpdate::Delivered(MessageId::new(1))).is_none());
        assert_eq!(
            render_update(&SessionUpdate::Status(SessionStatus::Connected)).as_deref(),
            Some("-- connected")
        );
    }

    #[test]
    fn conversations_mark_selection() {
        let peers = [UserId::new(3), UserId::new(9)];
        assert_eq!(
            render_conversations(&peers, Some(UserId::new(9))),
            vec!["  3", "* 9"]
        );
        assert_eq!(render_conversations(&[], None), vec!["(no conversations yet)"]);
    }

    #[test]
    fn empty_user_list() {
        assert_eq!(render_users(&[]), vec!["(nobody else here)"]);
    }
}
