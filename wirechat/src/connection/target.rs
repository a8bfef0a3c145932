//! Endpoint and identity, and the WebSocket URL built from them.

use url::Url;
use wirechat_proto::message::UserId;

use super::ConnectionError;

/// Port the chat server listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8080;

/// Path of the WebSocket endpoint.
pub const WS_PATH: &str = "/ws";

/// Where the chat server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Use `wss`/`https` instead of `ws`/`http`.
    pub secure: bool,
}

impl Endpoint {
    /// Plain endpoint on the default port.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            secure: false,
        }
    }

    /// Same endpoint on `port`.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Same endpoint with TLS toggled.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Base URL of the REST API, e.g. `http://localhost:8080/`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot form a valid URL.
    pub fn http_base(&self) -> Result<Url, url::ParseError> {
        let scheme = if self.secure { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{}:{}/", self.host, self.port))
    }

    /// WebSocket URL for `identity`.
    ///
    /// The token wins over the user id; exactly one query parameter is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::MissingIdentity`] if the identity has
    /// neither a token nor a user id, and
    /// [`ConnectionError::InvalidTarget`] if the host cannot form a valid URL.
    pub fn ws_url(&self, identity: &Identity) -> Result<Url, ConnectionError> {
        let (key, value) = match (identity.token.as_deref(), identity.user_id) {
            (Some(token), _) if !token.is_empty() => ("token", token.to_string()),
            (_, Some(user_id)) => ("user_id", user_id.to_string()),
            _ => return Err(ConnectionError::MissingIdentity),
        };
        let scheme = if self.secure { "wss" } else { "ws" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}{WS_PATH}", self.host, self.port))?;
        url.query_pairs_mut().append_pair(key, &value);
        Ok(url)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("localhost")
    }
}

/// Who the client is on the server.
///
/// At least one of the fields is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque credential token.
    pub token: Option<String>,
    /// Numeric user id, if known locally.
    pub user_id: Option<UserId>,
}

impl Identity {
    /// Identity backed by a credential token.
    #[must_use]
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            user_id: None,
        }
    }

    /// Identity backed by a bare user id.
    #[must_use]
    pub const fn user(user_id: UserId) -> Self {
        Self {
            token: None,
            user_id: Some(user_id),
        }
    }

    /// Attach a known user id to a token identity.
    #[must_use]
    pub const fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Build an identity from optional parts. `None` if both are missing.
    #[must_use]
    pub fn from_parts(token: Option<String>, user_id: Option<UserId>) -> Option<Self> {
        let token = token.filter(|t| !t.is_empty());
        if token.is_none() && user_id.is_none() {
            return None;
        }
        Some(Self { token, user_id })
    }
}
