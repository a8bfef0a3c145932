//! REST collaborator: peer list, history and the signed-in user.
//!
//! The server wraps every payload in a `{"message": ..., "data": ...}`
//! envelope. [`RestClient`] unwraps it and turns non-2xx answers into
//! [`ApiError::Status`].

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use wirechat_proto::message::UserId;
use wirechat_proto::records::{ApiEnvelope, HistoryRecord, UserRecord};

use crate::connection::Endpoint;

/// Errors from the REST API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Envelope message or raw body.
        message: String,
    },

    /// The envelope carried no `data`.
    #[error("response from {0} has no data")]
    MissingData(String),

    /// The endpoint did not form a valid URL.
    #[error("invalid API url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Request/response facility the session uses besides the socket.
pub trait ChatApi: Send + Sync {
    /// All users known to the server.
    fn list_users(&self) -> impl Future<Output = Result<Vec<UserRecord>, ApiError>> + Send;

    /// Up to `limit` messages exchanged between `me` and `peer`, oldest first.
    fn fetch_history(
        &self,
        me: UserId,
        peer: UserId,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<HistoryRecord>, ApiError>> + Send;

    /// The user the credential token belongs to.
    fn current_user(&self) -> impl Future<Output = Result<UserRecord, ApiError>> + Send;
}

/// [`ChatApi`] over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl RestClient {
    /// Client for the API rooted at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(base: Url, token: Option<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            base,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Client for the API served next to `endpoint`'s socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or the HTTP client cannot be built.
    pub fn for_endpoint(endpoint: &Endpoint, token: Option<String>) -> Result<Self, ApiError> {
        Self::new(endpoint.http_base()?, token)
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.base.join(path)?;
        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                .map(|envelope| envelope.message)
                .unwrap_or(body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = response.json().await?;
        debug!(path, message = %envelope.message, "api response");
        envelope
            .data
            .ok_or_else(|| ApiError::MissingData(path.to_string()))
    }
}

impl ChatApi for RestClient {
    async fn list_users(&self) -> Result<Vec<UserRecord>, ApiError> {
        self.get_data("userList", &[]).await
    }

    async fn fetch_history(
        &self,
        me: UserId,
        peer: UserId,
        limit: u32,
    ) -> Result<Vec<HistoryRecord>, ApiError> {
        let query = [
            ("user_id", me.to_string()),
            ("with", peer.to_string()),
            ("limit", limit.to_string()),
        ];
        self.get_data("messages", &query).await
    }

    async fn current_user(&self) -> Result<UserRecord, ApiError> {
        self.get_data("user/me", &[]).await
    }
}
